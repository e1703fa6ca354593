// src/plugins/loader.rs — Native module loading and activation
//
// Loads a plugin's shared library, resolves its entry points, and runs
// `activate` with a fresh capability context. The library backend sits
// behind `ModuleLoader` so the lifecycle can run against in-process modules.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use libloading::Library;

use crate::infra::errors::LoadError;
use crate::infra::logger::PLUGIN_TARGET;
use crate::plugins::abi::{EntryPointFn, ACTIVATE_SYMBOL, DEACTIVATE_SYMBOL, STATUS_OK};
use crate::plugins::context::PluginContext;
use crate::plugins::record::{ActivationState, PluginRecord};
use crate::scripting::runtime::ScriptRuntime;

/// An opened native module.
pub trait NativeModule: Send + Sync {
    /// Look up an entry point by its unmangled name.
    fn symbol(&self, name: &str) -> Option<EntryPointFn>;
}

/// Opens native modules from artifact paths.
pub trait ModuleLoader: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, String>;
}

/// Shared-library backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibloadingLoader;

struct LibraryModule {
    lib: Library,
}

impl ModuleLoader for LibloadingLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, String> {
        // SAFETY: loading a plugin runs its initializers; plugins are trusted
        // native code.
        let lib = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;
        Ok(Box::new(LibraryModule { lib }))
    }
}

impl NativeModule for LibraryModule {
    fn symbol(&self, name: &str) -> Option<EntryPointFn> {
        let mut symbol = Vec::with_capacity(name.len() + 1);
        symbol.extend_from_slice(name.as_bytes());
        symbol.push(0);
        // SAFETY: entry points are declared with the `EntryPointFn` signature.
        // The copied pointer is only used while the library stays loaded.
        unsafe { self.lib.get::<EntryPointFn>(&symbol).ok().map(|s| *s) }
    }
}

/// An active plugin's context, which owns its library. Dropping it releases
/// the library once no capability call into the plugin is still running.
pub struct LoadedModule {
    pub(crate) context: PluginContext,
    pub(crate) deactivate: Option<EntryPointFn>,
}

impl LoadedModule {
    pub fn has_deactivate(&self) -> bool {
        self.deactivate.is_some()
    }

    /// Call `deactivate` if the plugin exported it. Returns its status.
    pub(crate) fn deactivate(&self) -> Option<i32> {
        let deactivate = self.deactivate?;
        let ctx = self.context.as_ptr();
        // SAFETY: the library is still loaded and `ctx` outlives the call.
        let status = catch_unwind(AssertUnwindSafe(|| unsafe { deactivate(ctx) }));
        Some(status.unwrap_or(-1))
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("context", &self.context)
            .field("has_deactivate", &self.has_deactivate())
            .finish()
    }
}

/// Loads and activates plugins through a `ModuleLoader`.
#[derive(Clone)]
pub struct NativeLoader {
    backend: Arc<dyn ModuleLoader>,
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::new(Arc::new(LibloadingLoader))
    }
}

impl NativeLoader {
    pub fn new(backend: Arc<dyn ModuleLoader>) -> Self {
        Self { backend }
    }

    /// Load and activate `record`, which must be `Resolved`.
    ///
    /// On success the record is `Active` and owns its module. On failure it
    /// is `Failed`, any bindings made during activation are revoked, and the
    /// library is released.
    pub fn load(
        &self,
        record: &mut PluginRecord,
        runtime: &Arc<ScriptRuntime>,
    ) -> Result<(), LoadError> {
        let result = self.load_inner(record, runtime);
        if let Err(e) = &result {
            record.fail(e.clone());
        }
        result
    }

    fn load_inner(
        &self,
        record: &mut PluginRecord,
        runtime: &Arc<ScriptRuntime>,
    ) -> Result<(), LoadError> {
        let path = record.library_path.clone();
        if !path.is_file() {
            return Err(LoadError::ArtifactNotFound { path });
        }

        tracing::debug!(target: PLUGIN_TARGET, "Loading {} from {}", record.name, path.display());
        let module: Arc<dyn NativeModule> = self
            .backend
            .open(&path)
            .map_err(|message| LoadError::LibraryLoadFailed {
                path: path.clone(),
                message,
            })?
            .into();
        advance(record, ActivationState::Loaded)?;

        let activate = module
            .symbol(ACTIVATE_SYMBOL)
            .ok_or_else(|| LoadError::MissingRequiredEntryPoint {
                symbol: ACTIVATE_SYMBOL.to_string(),
            })?;
        let deactivate = module.symbol(DEACTIVATE_SYMBOL);
        if deactivate.is_none() {
            tracing::debug!(target: PLUGIN_TARGET, "{} has no {}", record.name, DEACTIVATE_SYMBOL);
        }

        let context = PluginContext::with_module(&record.name, runtime, module);
        let ctx = context.as_ptr();
        // SAFETY: `activate` comes from the loaded module and `ctx` stays
        // valid for the duration of the call.
        let outcome = catch_unwind(AssertUnwindSafe(|| unsafe { activate(ctx) }));
        context.seal();

        let failure = match outcome {
            Ok(STATUS_OK) => None,
            Ok(status) => Some(format!("{} returned status {}", ACTIVATE_SYMBOL, status)),
            Err(_) => Some(format!("{} panicked", ACTIVATE_SYMBOL)),
        };
        if let Some(reason) = failure {
            let revoked = runtime.capabilities().revoke_owner(&record.name);
            if !revoked.is_empty() {
                tracing::debug!(
                    target: PLUGIN_TARGET,
                    "Revoked {} binding(s) of failed plugin {}",
                    revoked.len(),
                    record.name
                );
            }
            // Bindings are gone before the library is.
            drop(context);
            return Err(LoadError::ActivationFailed { reason });
        }

        record.exported = context.bindings().into_iter().collect();
        record.module = Some(LoadedModule {
            context,
            deactivate,
        });
        advance(record, ActivationState::Active)
    }
}

fn advance(record: &mut PluginRecord, next: ActivationState) -> Result<(), LoadError> {
    record
        .advance(next)
        .map_err(|e| LoadError::ActivationFailed {
            reason: e.to_string(),
        })
}

/// Deactivate an active plugin: call `deactivate`, revoke its bindings, then
/// release its library. A capability call still running inside the plugin
/// keeps the library loaded until it returns.
pub(crate) fn unload(record: &mut PluginRecord, runtime: &ScriptRuntime) {
    let Some(loaded) = record.module.take() else {
        return;
    };

    match loaded.deactivate() {
        Some(STATUS_OK) => {
            tracing::info!(target: PLUGIN_TARGET, "Deactivated {}", record.name)
        }
        Some(status) => tracing::warn!(
            target: PLUGIN_TARGET,
            "{} {} returned status {}",
            record.name,
            DEACTIVATE_SYMBOL,
            status
        ),
        None => tracing::debug!(target: PLUGIN_TARGET, "Unloading {}", record.name),
    }

    runtime.capabilities().revoke_owner(&record.name);
    record.exported.clear();
    let in_flight = loaded.context.holders().saturating_sub(1);
    if in_flight > 0 {
        tracing::debug!(
            target: PLUGIN_TARGET,
            "{} stays mapped until {} running call(s) return",
            record.name,
            in_flight
        );
    }
    drop(loaded);
}
