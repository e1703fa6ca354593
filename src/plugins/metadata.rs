// src/plugins/metadata.rs — Plugin metadata documents
//
// A plugin directory may carry `plugin.json` or `plugin.toml`:
//
//     { "name": "math", "version": "1.0", "description": "...",
//       "dependencies": [{ "name": "core" }], "library": "libmath.so" }
//
// Reading metadata never fails the plugin. A missing or unparsable document
// yields synthesized defaults and a log line.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::infra::logger::PLUGIN_TARGET;
use crate::plugins::record::Dependencies;

pub const JSON_METADATA_FILE: &str = "plugin.json";
pub const TOML_METADATA_FILE: &str = "plugin.toml";

const NO_DESCRIPTION: &str = "No description";
/// Version used when there is no metadata document at all.
const SYNTHESIZED_VERSION: &str = "0.1";
/// Version used when a document exists but omits `version`.
const UNVERSIONED: &str = "0.0.0";

/// Metadata as read from disk, before defaults.
#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    dependencies: Option<Value>,
    library: Option<String>,
}

/// Metadata with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Dependencies,
    /// Artifact file name override, relative to the plugin directory.
    pub library: Option<String>,
}

impl PluginMetadata {
    /// Defaults for a directory without a usable metadata document.
    pub fn synthesized(dir_name: &str) -> Self {
        Self {
            name: dir_name.to_string(),
            version: SYNTHESIZED_VERSION.to_string(),
            description: NO_DESCRIPTION.to_string(),
            dependencies: Dependencies::none(),
            library: None,
        }
    }

    fn from_raw(raw: RawMetadata, dir_name: &str) -> Self {
        Self {
            name: raw
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| dir_name.to_string()),
            version: raw.version.unwrap_or_else(|| UNVERSIONED.to_string()),
            description: raw
                .description
                .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
            dependencies: raw
                .dependencies
                .map(|v| parse_dependencies(&v))
                .unwrap_or_default(),
            library: raw.library.filter(|l| !l.trim().is_empty()),
        }
    }

    /// Read the metadata for the plugin directory `dir`.
    pub fn read(dir: &Path) -> Self {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let json_path = dir.join(JSON_METADATA_FILE);
        let toml_path = dir.join(TOML_METADATA_FILE);

        let parsed = if json_path.is_file() {
            Some(read_document(&json_path, |s| {
                serde_json::from_str::<RawMetadata>(s).map_err(|e| e.to_string())
            }))
        } else if toml_path.is_file() {
            Some(read_document(&toml_path, |s| {
                toml::from_str::<RawMetadata>(s).map_err(|e| e.to_string())
            }))
        } else {
            None
        };

        match parsed {
            Some(Ok(raw)) => Self::from_raw(raw, &dir_name),
            Some(Err(e)) => {
                tracing::warn!(
                    target: PLUGIN_TARGET,
                    "Unreadable metadata for {}, using defaults: {}",
                    dir_name,
                    e
                );
                Self::synthesized(&dir_name)
            }
            None => {
                tracing::debug!(target: PLUGIN_TARGET, "No metadata for {}, using defaults", dir_name);
                Self::synthesized(&dir_name)
            }
        }
    }
}

fn read_document(
    path: &Path,
    parse: impl FnOnce(&str) -> Result<RawMetadata, String>,
) -> Result<RawMetadata, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    parse(&content).map_err(|e| format!("{}: {e}", path.display()))
}

/// Interpret a `dependencies` value.
///
/// Entries are `{ "name": "..." }` objects or bare strings. A value that is
/// not a list, or any other kind of entry, makes the whole list malformed.
fn parse_dependencies(value: &Value) -> Dependencies {
    let Some(items) = value.as_array() else {
        return Dependencies::Malformed(format!("expected a list, found {}", kind_of(value)));
    };

    let mut names = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(name) => names.push(name.clone()),
            Value::Object(map) => match map.get("name").and_then(Value::as_str) {
                Some(name) => names.push(name.to_string()),
                None => {
                    return Dependencies::Malformed("dependency entry without a name".into());
                }
            },
            other => {
                return Dependencies::Malformed(format!(
                    "dependency entry of type {}",
                    kind_of(other)
                ));
            }
        }
    }
    Dependencies::Declared(names)
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
