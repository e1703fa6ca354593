// src/plugins/context.rs — Host side of the plugin capability context
//
// A `PluginContext` owns the `HostContext` a plugin receives, the state its
// callbacks reach through `user_data`, and the plugin's opened module. All
// three sit in one shared allocation. Every capability the plugin binds holds
// a reference to it, so unloading the plugin while one of its functions is
// still running leaves the library mapped until that call returns. Binding is
// accepted only until the context is sealed, which the loader does as soon as
// `activate` returns.

use std::ffi::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::infra::logger::PLUGIN_TARGET;
use crate::plugins::abi::{
    self, ForeignFn, HostContext, NativeFn, StrRef, STATUS_ERROR, STATUS_INVALID_ARGUMENT,
    STATUS_OK, STATUS_SEALED,
};
use crate::plugins::loader::NativeModule;
use crate::scripting::capability::{CapabilityHandle, CapabilityName, NativeCallable};
use crate::scripting::runtime::ScriptRuntime;

struct ContextState {
    plugin: String,
    // Weak: the runtime's capability table holds this context through the
    // plugin's bindings.
    runtime: Weak<ScriptRuntime>,
    sealed: AtomicBool,
    bindings: Mutex<Vec<(CapabilityName, CapabilityHandle)>>,
    this: Weak<Shared>,
}

impl ContextState {
    fn bind(&self, ns: Option<&str>, name: &str, func: NativeFn) -> i32 {
        if self.sealed.load(Ordering::Acquire) {
            tracing::warn!(
                target: PLUGIN_TARGET,
                "{} tried to bind '{}' after activation",
                self.plugin,
                name
            );
            return STATUS_SEALED;
        }
        let (Some(runtime), Some(shared)) = (self.runtime.upgrade(), self.this.upgrade()) else {
            return STATUS_ERROR;
        };

        let qualified = match ns {
            Some(ns) => format!("{ns}.{name}"),
            None => name.to_string(),
        };
        let callable: Arc<dyn NativeCallable> = Arc::new(ForeignFn {
            name: qualified.clone(),
            func,
            pin: shared,
        });
        let bound = match ns {
            Some(ns) => runtime.bind_namespaced(ns, name, &self.plugin, callable),
            None => runtime.bind(name, &self.plugin, callable),
        };

        match bound {
            Ok(handle) => {
                tracing::info!(target: PLUGIN_TARGET, "{} bound {}", self.plugin, qualified);
                // Parsing cannot fail here: the runtime already validated it.
                if let Ok(cap) = CapabilityName::parse(&qualified) {
                    self.lock_bindings().push((cap, handle));
                }
                STATUS_OK
            }
            Err(e) => {
                tracing::warn!(target: PLUGIN_TARGET, "{}: bind failed: {}", self.plugin, e);
                abi::status_for(&e)
            }
        }
    }

    fn call(&self, qualified: &str, args: &[i64], out: &mut i64) -> i32 {
        let Some(runtime) = self.runtime.upgrade() else {
            return STATUS_ERROR;
        };
        match runtime.call(qualified, args) {
            Ok(value) => {
                *out = value;
                STATUS_OK
            }
            Err(e) => {
                tracing::debug!(target: PLUGIN_TARGET, "{}: call failed: {}", self.plugin, e);
                abi::status_for(&e)
            }
        }
    }

    fn lock_bindings(&self) -> std::sync::MutexGuard<'_, Vec<(CapabilityName, CapabilityHandle)>> {
        self.bindings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Everything a plugin's native code can reach. Fields drop in order, so
/// the module is released last.
struct Shared {
    raw: Box<HostContext>,
    state: Box<ContextState>,
    module: Option<Arc<dyn NativeModule>>,
}

// SAFETY: `raw` only points into `state`, which the same value owns, and
// every piece of shared state behind it is synchronized.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

/// The capability context of one plugin.
pub struct PluginContext {
    shared: Arc<Shared>,
}

impl PluginContext {
    /// A context with no module attached.
    pub fn new(plugin: &str, runtime: &Arc<ScriptRuntime>) -> Self {
        Self::build(plugin, runtime, None)
    }

    /// A context that keeps `module` loaded for as long as the context or
    /// any capability bound through it is alive.
    pub fn with_module(
        plugin: &str,
        runtime: &Arc<ScriptRuntime>,
        module: Arc<dyn NativeModule>,
    ) -> Self {
        Self::build(plugin, runtime, Some(module))
    }

    fn build(
        plugin: &str,
        runtime: &Arc<ScriptRuntime>,
        module: Option<Arc<dyn NativeModule>>,
    ) -> Self {
        let shared = Arc::new_cyclic(|this: &Weak<Shared>| {
            let state = Box::new(ContextState {
                plugin: plugin.to_string(),
                runtime: Arc::downgrade(runtime),
                sealed: AtomicBool::new(false),
                bindings: Mutex::new(Vec::new()),
                this: this.clone(),
            });
            let user_data = &*state as *const ContextState as *mut c_void;
            let raw = Box::new(HostContext::new(
                user_data,
                host_bind,
                host_bind_namespaced,
                host_call,
            ));
            Shared { raw, state, module }
        });
        Self { shared }
    }

    pub fn plugin(&self) -> &str {
        &self.shared.state.plugin
    }

    pub fn module(&self) -> Option<&Arc<dyn NativeModule>> {
        self.shared.module.as_ref()
    }

    /// The pointer passed to `activate` / `deactivate`.
    pub fn as_ptr(&self) -> *const HostContext {
        &*self.shared.raw
    }

    pub fn host_context(&self) -> &HostContext {
        &self.shared.raw
    }

    /// Refuse further binds. Calls are still allowed.
    pub fn seal(&self) {
        self.shared.state.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.shared.state.sealed.load(Ordering::Acquire)
    }

    /// Capabilities bound through this context, in bind order.
    pub fn bindings(&self) -> Vec<(CapabilityName, CapabilityHandle)> {
        self.shared.state.lock_bindings().clone()
    }

    /// Live references to this context, its own included. Above one means a
    /// bound capability (or a call through it) still holds the module.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.shared)
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin())
            .field("sealed", &self.is_sealed())
            .field("bindings", &self.shared.state.lock_bindings().len())
            .field("has_module", &self.shared.module.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ABI callbacks
// ---------------------------------------------------------------------------

/// # Safety
///
/// `user_data` must be null or the state pointer of a live `PluginContext`.
unsafe fn state_from<'a>(user_data: *mut c_void) -> Option<&'a ContextState> {
    (user_data as *const ContextState).as_ref()
}

unsafe extern "C" fn host_bind(user_data: *mut c_void, name: StrRef, func: NativeFn) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        let (Some(state), Some(name)) = (state_from(user_data), name.as_str()) else {
            return STATUS_INVALID_ARGUMENT;
        };
        state.bind(None, name, func)
    }))
    .unwrap_or(STATUS_ERROR)
}

unsafe extern "C" fn host_bind_namespaced(
    user_data: *mut c_void,
    ns: StrRef,
    name: StrRef,
    func: NativeFn,
) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        let (Some(state), Some(ns), Some(name)) = (state_from(user_data), ns.as_str(), name.as_str())
        else {
            return STATUS_INVALID_ARGUMENT;
        };
        state.bind(Some(ns), name, func)
    }))
    .unwrap_or(STATUS_ERROR)
}

unsafe extern "C" fn host_call(
    user_data: *mut c_void,
    qualified: StrRef,
    args: *const i64,
    argc: usize,
    out: *mut i64,
) -> i32 {
    catch_unwind(AssertUnwindSafe(|| {
        let (Some(state), Some(qualified)) = (state_from(user_data), qualified.as_str()) else {
            return STATUS_INVALID_ARGUMENT;
        };
        let Some(out) = out.as_mut() else {
            return STATUS_INVALID_ARGUMENT;
        };
        state.call(qualified, abi::args_slice(args, argc), out)
    }))
    .unwrap_or(STATUS_ERROR)
}
