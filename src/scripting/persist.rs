// src/scripting/persist.rs — Saving and restoring the loaded-script list
//
// The state file is a JSON object `{"scripts": ["/path/a.rhai", ...]}`.
// Only paths are stored; scripts are recompiled from disk on restore.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::infra::logger::SCRIPT_TARGET;
use crate::scripting::cache::{LoadOutcome, ScriptCache};
use crate::scripting::runtime::ScriptError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptList {
    #[serde(default)]
    pub scripts: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub loaded: Vec<PathBuf>,
    pub already_loaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, ScriptError)>,
}

impl ScriptCache {
    /// Write the cached script paths to `file`. Returns how many were saved.
    pub fn save_loaded_scripts(&self, file: &Path) -> Result<usize, ScriptError> {
        let list = ScriptList {
            scripts: self.loaded_paths(),
        };
        write_atomic(file, &list).map_err(|e| ScriptError::Persist {
            path: file.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::info!(
            target: SCRIPT_TARGET,
            "Saved {} script path(s) to {}",
            list.scripts.len(),
            file.display()
        );
        Ok(list.scripts.len())
    }

    /// Load every script listed in `file`.
    ///
    /// A missing state file is not an error (nothing to restore). Scripts
    /// that fail to compile are reported and skipped.
    pub fn restore_scripts(&self, file: &Path) -> Result<RestoreReport, ScriptError> {
        let Some(list) = read_list(file)? else {
            tracing::debug!(target: SCRIPT_TARGET, "No script state at {}", file.display());
            return Ok(RestoreReport::default());
        };

        let mut report = RestoreReport::default();
        for path in list.scripts {
            match self.load_script(&path) {
                Ok(LoadOutcome::Loaded) => report.loaded.push(path),
                Ok(LoadOutcome::AlreadyLoaded) => report.already_loaded.push(path),
                Err(e) => {
                    tracing::warn!(target: SCRIPT_TARGET, "Could not restore script: {}", e);
                    report.failed.push((path, e));
                }
            }
        }
        Ok(report)
    }
}

fn read_list(file: &Path) -> Result<Option<ScriptList>, ScriptError> {
    let content = match std::fs::read_to_string(file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ScriptError::Persist {
                path: file.to_path_buf(),
                message: e.to_string(),
            })
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| ScriptError::Persist {
            path: file.to_path_buf(),
            message: e.to_string(),
        })
}

/// Temp file + rename, so a crash never leaves a half-written list.
fn write_atomic(file: &Path, list: &ScriptList) -> anyhow::Result<()> {
    if let Some(dir) = file.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let json = serde_json::to_string_pretty(list)?;
    let mut tmp = file.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut f = std::fs::File::create(&tmp)?;
    f.write_all(json.as_bytes())?;
    f.flush()?;
    f.sync_all()?;
    std::fs::rename(&tmp, file)?;
    Ok(())
}
