// src/plugins/manager.rs — Plugin lifecycle orchestration
//
// discover -> resolve -> load/activate each plugin in order. One plugin
// failing to load is recorded and the rest continue; only a resolution
// failure aborts the run.

use std::path::Path;
use std::sync::Arc;

use crate::infra::errors::LoadError;
use crate::infra::logger::PLUGIN_TARGET;
use crate::plugins::loader::{self, ModuleLoader, NativeLoader};
use crate::plugins::record::{ActivationState, PluginRecord};
use crate::plugins::registry::PluginRegistry;
use crate::plugins::resolver::{self, ResolutionError};
use crate::scripting::runtime::ScriptRuntime;

/// Final state of one attempted plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOutcome {
    Active,
    Failed(LoadError),
}

impl PluginOutcome {
    pub fn is_active(&self) -> bool {
        matches!(self, PluginOutcome::Active)
    }

    pub fn label(&self) -> &'static str {
        match self {
            PluginOutcome::Active => "Active",
            PluginOutcome::Failed(e) => e.kind(),
        }
    }
}

/// Outcome of `run_all`, in load order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub outcomes: Vec<(String, PluginOutcome)>,
}

impl LoadReport {
    pub fn get(&self, name: &str) -> Option<&PluginOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    /// Names that reached `Active`, in activation order.
    pub fn active(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_active())
            .map(|(n, _)| n.as_str())
            .collect()
    }

    pub fn failed(&self) -> Vec<(&str, &LoadError)> {
        self.outcomes
            .iter()
            .filter_map(|(n, o)| match o {
                PluginOutcome::Failed(e) => Some((n.as_str(), e)),
                PluginOutcome::Active => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

pub struct PluginManager {
    runtime: Arc<ScriptRuntime>,
    loader: NativeLoader,
    registry: PluginRegistry,
    activation_order: Vec<String>,
}

impl PluginManager {
    /// Manager backed by real shared libraries.
    pub fn new(runtime: Arc<ScriptRuntime>) -> Self {
        Self::with_loader(runtime, NativeLoader::default())
    }

    pub fn with_backend(runtime: Arc<ScriptRuntime>, backend: Arc<dyn ModuleLoader>) -> Self {
        Self::with_loader(runtime, NativeLoader::new(backend))
    }

    pub fn with_loader(runtime: Arc<ScriptRuntime>, loader: NativeLoader) -> Self {
        Self {
            runtime,
            loader,
            registry: PluginRegistry::new(),
            activation_order: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.runtime
    }

    /// Discover plugins under `root`, resolve their order, and activate them.
    pub fn run_all(&mut self, root: &Path) -> Result<LoadReport, ResolutionError> {
        tracing::info!(target: PLUGIN_TARGET, "Loading plugins from {}", root.display());
        let registry = PluginRegistry::discover(root);
        self.run_catalog(registry)
    }

    /// Resolve and activate an already-built catalog.
    ///
    /// Plugins activated by an earlier run are shut down first.
    pub fn run_catalog(&mut self, registry: PluginRegistry) -> Result<LoadReport, ResolutionError> {
        if !self.activation_order.is_empty() {
            self.shutdown();
        }
        self.registry = registry;

        let order = resolver::resolve(self.registry.records())?;
        let records = self.registry.records_mut();
        for &i in &order {
            // Fresh records are always Discovered.
            let _ = records[i].advance(ActivationState::Resolved);
        }

        let mut report = LoadReport::default();
        for i in order {
            let record = &mut self.registry.records_mut()[i];
            let name = record.name.clone();
            match self.loader.load(record, &self.runtime) {
                Ok(()) => {
                    tracing::info!(
                        target: PLUGIN_TARGET,
                        "Activated {} v{} ({} capabilit{})",
                        name,
                        record.version,
                        record.exported.len(),
                        if record.exported.len() == 1 { "y" } else { "ies" }
                    );
                    self.activation_order.push(name.clone());
                    report.outcomes.push((name, PluginOutcome::Active));
                }
                Err(e) => {
                    tracing::error!(target: PLUGIN_TARGET, "Plugin {} failed: {}", name, e);
                    report.outcomes.push((name, PluginOutcome::Failed(e)));
                }
            }
        }

        tracing::info!(
            target: PLUGIN_TARGET,
            "{} of {} plugin(s) active",
            report.active().len(),
            report.len()
        );
        Ok(report)
    }

    /// Deactivate every active plugin in reverse activation order.
    pub fn shutdown(&mut self) {
        while let Some(name) = self.activation_order.pop() {
            if let Some(record) = self.registry.get_mut(&name) {
                loader::unload(record, &self.runtime);
            }
        }
    }

    /// The catalog in discovery order.
    pub fn plugins(&self) -> &[PluginRecord] {
        self.registry.records()
    }

    pub fn get(&self, name: &str) -> Option<&PluginRecord> {
        self.registry.get(name)
    }

    /// Active plugin names in activation order.
    pub fn active_plugins(&self) -> &[String] {
        &self.activation_order
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.registry.names())
            .field("active", &self.activation_order)
            .finish()
    }
}
