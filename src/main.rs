// src/main.rs — plugscript entry point

use clap::Parser;

use plugscript::cli::{Cli, Commands};
use plugscript::host::Host;
use plugscript::infra::config::Config;
use plugscript::infra::logger;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config (falls back to defaults if no config.toml)
    let mut config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    logger::init_logging(&config.logging.level);

    if let Some(dir) = &cli.plugins {
        config.plugins.dir = Some(dir.clone());
    }
    if cli.no_watch {
        config.scripts.watch = false;
    }

    if let Some(Commands::Plugins { dir }) = &cli.command {
        let root = match dir {
            Some(dir) => plugscript::infra::paths::expand_home(dir),
            None => config.plugins.root(),
        };
        return plugscript::cli::plugins::show_plugins(&root);
    }

    config.scripts.autoload.extend(cli.scripts.iter().cloned());

    let host = Host::start(config)?;
    plugscript::cli::console::run_session(host).await
}
