// src/plugins/registry.rs — Plugin discovery and catalog
//
// Every immediate subdirectory of the plugin root is one plugin. Discovery
// reads metadata only; it never loads native code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::infra::logger::PLUGIN_TARGET;
use crate::plugins::metadata::PluginMetadata;
use crate::plugins::record::PluginRecord;

/// Default artifact file name for this platform (`plugin.so`, `plugin.dylib`,
/// `plugin.dll`).
pub fn default_artifact_name() -> String {
    format!("plugin.{}", std::env::consts::DLL_EXTENSION)
}

/// Discovered plugins in discovery order, names unique.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    records: Vec<PluginRecord>,
    by_name: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `root` and build a catalog.
    ///
    /// Subdirectories are visited in file-name order. A missing root yields
    /// an empty catalog.
    pub fn discover(root: &Path) -> Self {
        let mut registry = Self::new();

        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    target: PLUGIN_TARGET,
                    "Plugin directory {} not readable: {}",
                    root.display(),
                    e
                );
                return registry;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        for dir in dirs {
            let meta = PluginMetadata::read(&dir);
            let library = meta.library.clone().unwrap_or_else(default_artifact_name);

            let mut record = PluginRecord::new(meta.name, dir.clone(), dir.join(library));
            record.version = meta.version;
            record.description = meta.description;
            record.dependencies = meta.dependencies;

            tracing::debug!(
                target: PLUGIN_TARGET,
                "Discovered plugin {} v{} at {}",
                record.name,
                record.version,
                dir.display()
            );
            registry.insert(record);
        }

        tracing::info!(
            target: PLUGIN_TARGET,
            "Discovered {} plugin(s) in {}",
            registry.len(),
            root.display()
        );
        registry
    }

    /// Add a record. A name collision is skipped and logged; returns whether
    /// the record was added.
    pub fn insert(&mut self, record: PluginRecord) -> bool {
        if let Some(&existing) = self.by_name.get(&record.name) {
            tracing::warn!(
                target: PLUGIN_TARGET,
                "Skipping duplicate plugin '{}' at {} (already found at {})",
                record.name,
                record.directory.display(),
                self.records[existing].directory.display()
            );
            return false;
        }
        self.by_name.insert(record.name.clone(), self.records.len());
        self.records.push(record);
        true
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.by_name.get(name).map(|&i| &self.records[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginRecord> {
        match self.by_name.get(name) {
            Some(&i) => self.records.get_mut(i),
            None => None,
        }
    }

    pub fn records(&self) -> &[PluginRecord] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [PluginRecord] {
        &mut self.records
    }

    pub fn names(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
