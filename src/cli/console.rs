// src/cli/console.rs — Line-oriented command loop on stdin

use std::path::{Path, PathBuf};

use crate::host::Host;
use crate::scripting::cache::LoadOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Load(PathBuf),
    Unload(PathBuf),
    Run(PathBuf),
    /// Call a capability directly with integer arguments.
    Call { name: String, args: Vec<i64> },
    List,
    Plugins,
    Capabilities,
    Save(Option<PathBuf>),
    Restore(Option<PathBuf>),
    Watch(bool),
    Reload,
    Help,
    Quit,
}

impl Command {
    /// Parse one input line. `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };
        let path = |name: &str| {
            if arg.is_empty() {
                Err(format!("usage: {name} <path>"))
            } else {
                Ok(PathBuf::from(arg))
            }
        };
        let optional_path = || (!arg.is_empty()).then(|| PathBuf::from(arg));

        let command = match cmd {
            "load" => Command::Load(path("load")?),
            "unload" => Command::Unload(path("unload")?),
            "run" => Command::Run(path("run")?),
            "call" => parse_call(arg)?,
            "list" | "ls" => Command::List,
            "plugins" => Command::Plugins,
            "caps" | "capabilities" => Command::Capabilities,
            "save" => Command::Save(optional_path()),
            "restore" => Command::Restore(optional_path()),
            "watch" => match arg {
                "on" => Command::Watch(true),
                "off" => Command::Watch(false),
                _ => return Err("usage: watch on|off".into()),
            },
            "reload" => Command::Reload,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("Unknown command: {other}. Type help for commands.")),
        };
        Ok(Some(command))
    }
}

fn parse_call(arg: &str) -> Result<Command, String> {
    let mut words = arg.split_whitespace();
    let Some(name) = words.next() else {
        return Err("usage: call <capability> [int...]".into());
    };
    let args = words
        .map(|w| w.parse::<i64>().map_err(|_| format!("not an integer: {w}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Command::Call {
        name: name.to_string(),
        args,
    })
}

/// Run the console on stdin, then shut the host down. The host is torn down
/// even when the console fails; its error is returned afterwards.
pub async fn run_session(host: Host) -> anyhow::Result<()> {
    session(host, read_input).await
}

async fn session<R>(host: Host, read: R) -> anyhow::Result<()>
where
    R: Fn() -> Option<String> + Clone + Send + 'static,
{
    let result = command_loop(&host, read).await;
    host.shutdown().await;
    result
}

/// Read commands until `quit` or end of input.
async fn command_loop<R>(host: &Host, read: R) -> anyhow::Result<()>
where
    R: Fn() -> Option<String> + Clone + Send + 'static,
{
    eprintln!(
        "plugscript v{} | {} plugin(s) active | {} script(s) loaded",
        env!("CARGO_PKG_VERSION"),
        host.plugins().active_plugins().len(),
        host.scripts().len()
    );
    eprintln!("Type help for commands.");

    loop {
        let Some(line) = tokio::task::spawn_blocking(read.clone()).await? else {
            break;
        };
        match Command::parse(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => execute(host, command),
            Ok(None) => {}
            Err(msg) => eprintln!("{msg}"),
        }
    }
    Ok(())
}

fn read_input() -> Option<String> {
    use std::io::{self, BufRead, Write};

    print!("> ");
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line),
        Err(_) => None,
    }
}

pub fn execute(host: &Host, command: Command) {
    let scripts = host.scripts();
    match command {
        Command::Load(path) => match scripts.load_script(&path) {
            Ok(LoadOutcome::Loaded) => eprintln!("  loaded {}", path.display()),
            Ok(LoadOutcome::AlreadyLoaded) => eprintln!("  already loaded: {}", path.display()),
            Err(e) => eprintln!("  {e}"),
        },
        Command::Unload(path) => match scripts.unload_script(&path) {
            Ok(()) => eprintln!("  unloaded {}", path.display()),
            Err(e) => eprintln!("  {e}"),
        },
        Command::Run(path) => start_run(host, &path),
        Command::Call { name, args } => match host.call(&name, &args) {
            Ok(value) => eprintln!("  {value}"),
            Err(e) => eprintln!("  {e}"),
        },
        Command::List => {
            let paths = scripts.loaded_paths();
            if paths.is_empty() {
                eprintln!("  no scripts loaded");
            }
            let executing = scripts.executing_path();
            for path in paths {
                let marker = if executing.as_ref() == Some(&path) {
                    " (running)"
                } else {
                    ""
                };
                eprintln!("  {}{}", path.display(), marker);
            }
            eprintln!(
                "  watcher: {}",
                if scripts.is_watching() { "on" } else { "off" }
            );
        }
        Command::Plugins => {
            for record in host.plugins().plugins() {
                eprintln!("{}", super::plugins::describe(record));
                if let Some(err) = record.failure() {
                    eprintln!("      {}: {}", err.kind(), err);
                }
            }
        }
        Command::Capabilities => {
            let table = host.runtime().capabilities();
            for name in table.names() {
                let owner = table.owner_of(&name).unwrap_or_default();
                eprintln!("  {:<30} {}", name.to_string(), owner);
            }
        }
        Command::Save(file) => {
            let file = file.unwrap_or_else(|| host.config().scripts.state_path());
            match scripts.save_loaded_scripts(&file) {
                Ok(n) => eprintln!("  saved {} path(s) to {}", n, file.display()),
                Err(e) => eprintln!("  {e}"),
            }
        }
        Command::Restore(file) => {
            let file = file.unwrap_or_else(|| host.config().scripts.state_path());
            match scripts.restore_scripts(&file) {
                Ok(report) => {
                    eprintln!(
                        "  restored {}, {} already loaded, {} failed",
                        report.loaded.len(),
                        report.already_loaded.len(),
                        report.failed.len()
                    );
                    for (path, e) in report.failed {
                        eprintln!("    {}: {}", path.display(), e);
                    }
                }
                Err(e) => eprintln!("  {e}"),
            }
        }
        Command::Watch(true) => {
            if scripts.start_watching() {
                eprintln!("  watcher started");
            } else {
                eprintln!("  watcher already running");
            }
        }
        Command::Watch(false) => {
            if scripts.stop_watching() {
                eprintln!("  watcher stopping");
            } else {
                eprintln!("  watcher not running");
            }
        }
        Command::Reload => {
            let report = scripts.poll_changes();
            eprintln!(
                "  {} reloaded, {} failed, {} deferred",
                report.reloaded.len(),
                report.failed.len(),
                report.deferred.len()
            );
        }
        Command::Help => print_help(),
        Command::Quit => {}
    }
}

/// Start a script and report its result when it finishes, without blocking
/// the prompt.
fn start_run(host: &Host, path: &Path) {
    match host.run_script(path) {
        Ok(token) => {
            eprintln!("  running {} ({})", token.path().display(), token.id());
            tokio::spawn(async move {
                let path = token.path().to_path_buf();
                match token.wait().await {
                    Ok(()) => eprintln!("\n  finished {}", path.display()),
                    Err(e) => eprintln!("\n  {e}"),
                }
            });
        }
        Err(e) if e.is_retriable() => {
            eprintln!("  busy: another script is running, try again later")
        }
        Err(e) => eprintln!("  {e}"),
    }
}

fn print_help() {
    eprintln!("Commands:");
    eprintln!("  load <path>       Compile and cache a script");
    eprintln!("  unload <path>     Drop a cached script");
    eprintln!("  run <path>        Run a cached script");
    eprintln!("  call <cap> [n..]  Call a capability with integer arguments");
    eprintln!("  list              Show cached scripts");
    eprintln!("  plugins           Show plugins and their state");
    eprintln!("  caps              Show bound capabilities");
    eprintln!("  save [file]       Save the loaded script list");
    eprintln!("  restore [file]    Load scripts from a saved list");
    eprintln!("  watch on|off      Start or stop hot reload");
    eprintln!("  reload            Check for changed scripts now");
    eprintln!("  help              Show this help");
    eprintln!("  quit, exit        Shut down");
}
