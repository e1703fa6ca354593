// src/host.rs — The host process context
//
// Owns every long-lived component. Construction follows the dependency
// order (runtime, plugins, script cache, watcher); teardown reverses it so
// no script or watcher pass can reach a plugin binding after its library
// is gone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::infra::config::Config;
use crate::infra::errors::HostError;
use crate::infra::logger::{PLUGIN_TARGET, SCRIPT_TARGET};
use crate::plugins::loader::ModuleLoader;
use crate::plugins::manager::{LoadReport, PluginManager};
use crate::scripting::cache::{ExecutionToken, ScriptCache};
use crate::scripting::persist::RestoreReport;
use crate::scripting::runtime::ScriptRuntime;

pub struct Host {
    config: Config,
    runtime: Arc<ScriptRuntime>,
    plugins: PluginManager,
    scripts: Arc<ScriptCache>,
    load_report: Option<LoadReport>,
}

impl Host {
    /// Build the components without loading anything.
    pub fn new(config: Config) -> Self {
        let runtime = Arc::new(ScriptRuntime::new(&config.engine));
        let plugins = PluginManager::new(runtime.clone());
        Self::assemble(config, runtime, plugins)
    }

    /// Like `new`, with a custom native module backend.
    pub fn with_backend(config: Config, backend: Arc<dyn ModuleLoader>) -> Self {
        let runtime = Arc::new(ScriptRuntime::new(&config.engine));
        let plugins = PluginManager::with_backend(runtime.clone(), backend);
        Self::assemble(config, runtime, plugins)
    }

    fn assemble(config: Config, runtime: Arc<ScriptRuntime>, plugins: PluginManager) -> Self {
        let scripts = Arc::new(ScriptCache::new(
            runtime.clone(),
            config.scripts.poll_interval(),
        ));
        Self {
            config,
            runtime,
            plugins,
            scripts,
            load_report: None,
        }
    }

    /// Build the host and bring it up: plugins, saved scripts, autoload
    /// scripts, then the watcher. Must be called within a Tokio runtime
    /// when watching is enabled.
    pub fn start(config: Config) -> Result<Self, HostError> {
        let mut host = Self::new(config);
        host.bring_up()?;
        Ok(host)
    }

    /// The startup sequence of `start`, for a host built with `new` or
    /// `with_backend`.
    ///
    /// A resolution failure aborts the plugin run only; scripts still load.
    pub fn bring_up(&mut self) -> Result<(), HostError> {
        if let Err(e) = self.load_plugins() {
            tracing::error!(target: PLUGIN_TARGET, "No plugins activated: {}", e);
        }

        if self.config.scripts.restore {
            let report = self.restore_scripts()?;
            if !report.failed.is_empty() {
                tracing::warn!(
                    target: SCRIPT_TARGET,
                    "{} saved script(s) could not be restored",
                    report.failed.len()
                );
            }
        }

        let autoload: Vec<PathBuf> = self
            .config
            .scripts
            .autoload
            .iter()
            .map(|p| crate::infra::paths::expand_home(p))
            .collect();
        for path in autoload {
            if let Err(e) = self.scripts.load_script(&path) {
                tracing::warn!(target: SCRIPT_TARGET, "Autoload failed: {}", e);
            }
        }

        if self.config.scripts.watch {
            self.scripts.start_watching();
        }
        Ok(())
    }

    /// Discover and activate plugins from the configured root.
    pub fn load_plugins(&mut self) -> Result<&LoadReport, HostError> {
        let root = self.config.plugins.root();
        self.load_plugins_from(&root)
    }

    pub fn load_plugins_from(&mut self, root: &Path) -> Result<&LoadReport, HostError> {
        let report = self.plugins.run_all(root)?;
        for (name, err) in report.failed() {
            tracing::warn!(target: PLUGIN_TARGET, "{}: {} ({})", name, err.kind(), err);
        }
        Ok(self.load_report.insert(report))
    }

    /// Start a cached script. `Busy` is retriable; see `HostError::is_retriable`.
    pub fn run_script(&self, path: &Path) -> Result<ExecutionToken, HostError> {
        Ok(self.scripts.run(path)?)
    }

    /// Call a bound capability by qualified name (`ns.name` or `name`).
    pub fn call(&self, qualified: &str, args: &[i64]) -> Result<i64, HostError> {
        Ok(self.runtime.call(qualified, args)?)
    }

    pub fn restore_scripts(&self) -> Result<RestoreReport, HostError> {
        let file = self.config.scripts.state_path();
        Ok(self.scripts.restore_scripts(&file)?)
    }

    pub fn save_scripts(&self) -> Result<usize, HostError> {
        let file = self.config.scripts.state_path();
        Ok(self.scripts.save_loaded_scripts(&file)?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.runtime
    }

    pub fn scripts(&self) -> &Arc<ScriptCache> {
        &self.scripts
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn load_report(&self) -> Option<&LoadReport> {
        self.load_report.as_ref()
    }

    /// Tear down in reverse order: watcher, in-flight script, saved state,
    /// then plugins.
    pub async fn shutdown(mut self) {
        self.scripts.stop_watching_and_wait().await;

        // No cancellation of a running script; wait for it to finish.
        self.scripts.wait_idle().await;

        if self.config.scripts.restore {
            if let Err(e) = self.save_scripts() {
                tracing::warn!(target: SCRIPT_TARGET, "{}", e);
            }
        }

        self.plugins.shutdown();
        tracing::info!("Host stopped");
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("plugins", &self.plugins)
            .field("scripts", &self.scripts)
            .finish()
    }
}
