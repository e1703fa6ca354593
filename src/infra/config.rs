// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::infra::errors::HostError;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub scripts: ScriptsConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Plugin root; one subdirectory per plugin. Defaults to `<home>/plugins`.
    #[serde(default)]
    pub dir: Option<String>,
}

impl PluginsConfig {
    pub fn root(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => paths::expand_home(dir),
            None => paths::plugins_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    pub poll_interval_ms: u64,
    /// Where the loaded-script list is saved. Defaults to `<home>/scripts.json`.
    pub state_file: Option<String>,
    pub autoload: Vec<String>,
    pub watch: bool,
    pub restore: bool,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 750,
            state_file: None,
            autoload: Vec::new(),
            watch: true,
            restore: true,
        }
    }
}

impl ScriptsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn state_path(&self) -> PathBuf {
        match &self.state_file {
            Some(file) => paths::expand_home(file),
            None => paths::scripts_state_path(),
        }
    }
}

/// Rhai engine limits. Zero means "no limit".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_operations: u64,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 1_048_576,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self, HostError> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, HostError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| HostError::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.scripts.poll_interval_ms, 750);
        assert_eq!(c.scripts.poll_interval(), Duration::from_millis(750));
        assert!(c.scripts.watch);
        assert!(c.scripts.restore);
        assert!(c.scripts.autoload.is_empty());
        assert_eq!(c.engine.max_operations, 0);
        assert_eq!(c.logging.level, "info");
        assert!(c.plugins.dir.is_none());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scripts.poll_interval_ms, 750);
        assert_eq!(config.engine.max_expr_depth, 64);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[plugins]
dir = "/opt/host/plugins"

[scripts]
poll_interval_ms = 250
state_file = "/tmp/scripts.json"
autoload = ["main.rhai", "util.rhai"]
watch = false

[engine]
max_operations = 500000
max_expr_depth = 32
max_function_expr_depth = 16
max_string_size = 1024
max_array_size = 100
max_map_size = 100

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.plugins.root(), PathBuf::from("/opt/host/plugins"));
        assert_eq!(config.scripts.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.scripts.state_path(), PathBuf::from("/tmp/scripts.json"));
        assert_eq!(config.scripts.autoload.len(), 2);
        assert!(!config.scripts.watch);
        assert!(config.scripts.restore);
        assert_eq!(config.engine.max_operations, 500_000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let config: Config = toml::from_str("[scripts]\nwatch = false\n").unwrap();
        assert!(!config.scripts.watch);
        assert_eq!(config.scripts.poll_interval_ms, 750);
        assert!(config.scripts.restore);
    }

    #[test]
    fn test_zero_poll_interval_clamped() {
        let s = ScriptsConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(s.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.scripts.poll_interval_ms,
            config.scripts.poll_interval_ms
        );
        assert_eq!(deserialized.logging.level, config.logging.level);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scripts\npoll = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, HostError::Config(_)));
    }
}
