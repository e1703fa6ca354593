// src/plugins/record.rs — Plugin records and activation state

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::infra::errors::LoadError;
use crate::plugins::loader::LoadedModule;
use crate::scripting::capability::{CapabilityHandle, CapabilityName};

/// Lifecycle position of a plugin. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActivationState {
    Discovered,
    Resolved,
    Loaded,
    Active,
    Failed,
}

impl ActivationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActivationState::Active | ActivationState::Failed)
    }

    fn can_advance_to(self, next: ActivationState) -> bool {
        use ActivationState::*;
        matches!(
            (self, next),
            (Discovered, Resolved)
                | (Resolved, Loaded)
                | (Loaded, Active)
                | (Discovered | Resolved | Loaded, Failed)
        )
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActivationState::Discovered => "discovered",
            ActivationState::Resolved => "resolved",
            ActivationState::Loaded => "loaded",
            ActivationState::Active => "active",
            ActivationState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Plugin '{plugin}' cannot move from {from} to {to}")]
pub struct TransitionError {
    pub plugin: String,
    pub from: ActivationState,
    pub to: ActivationState,
}

/// Declared dependency list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependencies {
    Declared(Vec<String>),
    /// The metadata had a `dependencies` value that is not a list. Such a
    /// plugin can never be resolved.
    Malformed(String),
}

impl Dependencies {
    pub fn none() -> Self {
        Dependencies::Declared(Vec::new())
    }

    pub fn names(&self) -> &[String] {
        match self {
            Dependencies::Declared(names) => names,
            Dependencies::Malformed(_) => &[],
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Dependencies::Malformed(_))
    }
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::none()
    }
}

/// One discovered plugin.
pub struct PluginRecord {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Dependencies,
    pub directory: PathBuf,
    pub library_path: PathBuf,
    state: ActivationState,
    failure: Option<LoadError>,
    pub(crate) module: Option<LoadedModule>,
    pub(crate) exported: BTreeMap<CapabilityName, CapabilityHandle>,
}

impl PluginRecord {
    pub fn new(name: impl Into<String>, directory: PathBuf, library_path: PathBuf) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            description: String::new(),
            dependencies: Dependencies::none(),
            directory,
            library_path,
            state: ActivationState::Discovered,
            failure: None,
            module: None,
            exported: BTreeMap::new(),
        }
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Why the plugin failed, once it is `Failed` for a load reason.
    pub fn failure(&self) -> Option<&LoadError> {
        self.failure.as_ref()
    }

    /// Move to `next`. Regressions and skips are refused and logged.
    pub fn advance(&mut self, next: ActivationState) -> Result<(), TransitionError> {
        if !self.state.can_advance_to(next) {
            let err = TransitionError {
                plugin: self.name.clone(),
                from: self.state,
                to: next,
            };
            tracing::warn!(target: crate::infra::logger::PLUGIN_TARGET, "{}", err);
            return Err(err);
        }
        tracing::debug!(
            target: crate::infra::logger::PLUGIN_TARGET,
            "{}: {} -> {}",
            self.name,
            self.state,
            next
        );
        self.state = next;
        Ok(())
    }

    pub(crate) fn fail(&mut self, err: LoadError) {
        // Failing a terminal plugin is a no-op; the first failure wins.
        if self.advance(ActivationState::Failed).is_ok() {
            self.failure = Some(err);
        }
    }

    /// Capabilities this plugin bound during activation.
    pub fn exported_capabilities(&self) -> impl Iterator<Item = &CapabilityName> {
        self.exported.keys()
    }

    pub fn is_loaded(&self) -> bool {
        self.module.is_some()
    }
}

impl std::fmt::Debug for PluginRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRecord")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("library_path", &self.library_path)
            .field("state", &self.state)
            .field("exported", &self.exported.len())
            .finish()
    }
}
