// src/infra/paths.rs — Home directory layout
//
// All paths respect the PLUGSCRIPT_HOME environment variable for isolation.
// When unset, everything lives under ~/.plugscript/.

use std::path::PathBuf;

/// Returns the PLUGSCRIPT_HOME override, if set.
fn plugscript_home() -> Option<PathBuf> {
    std::env::var_os("PLUGSCRIPT_HOME").map(PathBuf::from)
}

/// Home directory, or the current directory if it cannot be determined.
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $PLUGSCRIPT_HOME/ or ~/.plugscript/
pub fn config_dir() -> PathBuf {
    if let Some(home) = plugscript_home() {
        return home;
    }
    dirs_home().join(".plugscript")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default plugin root (one subdirectory per plugin)
pub fn plugins_dir() -> PathBuf {
    config_dir().join("plugins")
}

/// Default location of the saved script list
pub fn scripts_state_path() -> PathBuf {
    config_dir().join("scripts.json")
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => {
            let rest = rest.trim_start_matches(['/', '\\']);
            if rest.is_empty() {
                dirs_home()
            } else {
                dirs_home().join(rest)
            }
        }
        None => PathBuf::from(path),
    }
}
