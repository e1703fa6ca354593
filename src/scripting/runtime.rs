// src/scripting/runtime.rs — The embedded Rhai runtime
//
// One engine per process. Plugins and the host bind integer functions into
// it, either globally (`add(1, 2)`) or inside a namespace module
// (`math::add(1, 2)`). Script closures never hold the native function
// directly: they go through the capability table, so a revoked binding
// fails with an error instead of jumping into unloaded code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use rhai::{Engine, EvalAltResult, Module, AST, INT};
use thiserror::Error;

use crate::infra::config::EngineConfig;
use crate::infra::logger::SCRIPT_TARGET;
use crate::scripting::capability::{
    CapabilityError, CapabilityHandle, CapabilityName, CapabilityTable, NativeCallable, HOST_OWNER,
};

/// Highest arity a bound capability can be called with from a script.
pub const MAX_SCRIPT_ARGS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Failed to read script {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("Failed to compile script {}: {message}", path.display())]
    Compile { path: PathBuf, message: String },

    #[error("Script {} failed: {message}", path.display())]
    Runtime { path: PathBuf, message: String },

    #[error("Script {} panicked", path.display())]
    Panicked { path: PathBuf },

    #[error("Script {} is currently executing", path.display())]
    Executing { path: PathBuf },

    #[error("Script {} is not loaded", path.display())]
    NotLoaded { path: PathBuf },

    #[error("Failed to persist script list {}: {message}", path.display())]
    Persist { path: PathBuf, message: String },
}

/// Register one closure per arity (0..=MAX_SCRIPT_ARGS), each dispatching
/// through `handle`. Works for both `Engine::register_fn` and
/// `Module::set_native_fn`.
macro_rules! register_arities {
    ($target:expr, $method:ident, $name:expr, $table:expr, $handle:expr) => {{
        let (t, h) = ($table.clone(), $handle);
        let _ = $target.$method($name, move || -> Result<INT, Box<EvalAltResult>> {
            dispatch(&t, h, &[])
        });
        let (t, h) = ($table.clone(), $handle);
        let _ = $target.$method($name, move |a: INT| -> Result<INT, Box<EvalAltResult>> {
            dispatch(&t, h, &[a])
        });
        let (t, h) = ($table.clone(), $handle);
        let _ = $target.$method($name, move |a: INT, b: INT| -> Result<INT, Box<EvalAltResult>> {
            dispatch(&t, h, &[a, b])
        });
        let (t, h) = ($table.clone(), $handle);
        let _ = $target.$method(
            $name,
            move |a: INT, b: INT, c: INT| -> Result<INT, Box<EvalAltResult>> {
                dispatch(&t, h, &[a, b, c])
            },
        );
        let (t, h) = ($table.clone(), $handle);
        let _ = $target.$method(
            $name,
            move |a: INT, b: INT, c: INT, d: INT| -> Result<INT, Box<EvalAltResult>> {
                dispatch(&t, h, &[a, b, c, d])
            },
        );
    }};
}

/// Owns the engine, the per-namespace modules, and the capability table.
pub struct ScriptRuntime {
    engine: RwLock<Engine>,
    namespaces: Mutex<HashMap<String, Module>>,
    capabilities: Arc<CapabilityTable>,
}

impl ScriptRuntime {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            engine: RwLock::new(create_engine(config)),
            namespaces: Mutex::new(HashMap::new()),
            capabilities: Arc::new(CapabilityTable::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&EngineConfig::default())
    }

    pub fn capabilities(&self) -> &Arc<CapabilityTable> {
        &self.capabilities
    }

    /// Bind a global function for `owner`.
    pub fn bind(
        &self,
        name: &str,
        owner: &str,
        callable: Arc<dyn NativeCallable>,
    ) -> Result<CapabilityHandle, CapabilityError> {
        self.install(CapabilityName::global(name)?, owner, callable)
    }

    /// Bind a function inside namespace `ns` for `owner`.
    pub fn bind_namespaced(
        &self,
        ns: &str,
        name: &str,
        owner: &str,
        callable: Arc<dyn NativeCallable>,
    ) -> Result<CapabilityHandle, CapabilityError> {
        self.install(CapabilityName::namespaced(ns, name)?, owner, callable)
    }

    /// Bind a host-side Rust closure under `name` or `ns.name`.
    pub fn bind_host_fn<F>(&self, qualified: &str, f: F) -> Result<CapabilityHandle, CapabilityError>
    where
        F: Fn(&[i64]) -> Result<i64, CapabilityError> + Send + Sync + 'static,
    {
        self.install(CapabilityName::parse(qualified)?, HOST_OWNER, Arc::new(f))
    }

    fn install(
        &self,
        name: CapabilityName,
        owner: &str,
        callable: Arc<dyn NativeCallable>,
    ) -> Result<CapabilityHandle, CapabilityError> {
        let mut engine = self.engine.write().unwrap_or_else(|e| e.into_inner());
        let handle = self.capabilities.insert(name.clone(), owner, callable)?;
        let table = &self.capabilities;

        match &name.namespace {
            None => {
                register_arities!(engine, register_fn, name.name.as_str(), table, handle);
            }
            Some(ns) => {
                let mut namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
                let module = namespaces.entry(ns.clone()).or_default();
                register_arities!(module, set_native_fn, name.name.as_str(), table, handle);
                engine.register_static_module(ns.as_str(), module.clone().into());
            }
        }

        tracing::debug!(target: SCRIPT_TARGET, "Bound capability {} (owner: {})", name, owner);
        Ok(handle)
    }

    /// Call a bound capability by `name`, `ns.name` or `ns::name`.
    pub fn call(&self, qualified: &str, args: &[i64]) -> Result<i64, CapabilityError> {
        let name = CapabilityName::parse(qualified)?;
        self.capabilities.call(&name, args)
    }

    /// Compile source text; `path` is used for error context only.
    pub fn compile(&self, path: &Path, source: &str) -> Result<AST, ScriptError> {
        let engine = self.engine.read().unwrap_or_else(|e| e.into_inner());
        let mut ast = engine.compile(source).map_err(|e| ScriptError::Compile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        ast.set_source(path.to_string_lossy().to_string());
        Ok(ast)
    }

    /// Read and compile a script file.
    pub fn compile_file(&self, path: &Path) -> Result<AST, ScriptError> {
        let source = std::fs::read_to_string(path).map_err(|e| ScriptError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        self.compile(path, &source)
    }

    /// Run a compiled script to completion on the calling thread.
    pub fn execute(&self, path: &Path, ast: &AST) -> Result<(), ScriptError> {
        let engine = self.engine.read().unwrap_or_else(|e| e.into_inner());
        engine.run_ast(ast).map_err(|e| ScriptError::Runtime {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Evaluate a one-off expression returning an integer.
    pub fn eval_int(&self, source: &str) -> Result<INT, ScriptError> {
        let engine = self.engine.read().unwrap_or_else(|e| e.into_inner());
        engine.eval::<INT>(source).map_err(|e| ScriptError::Runtime {
            path: PathBuf::from("<eval>"),
            message: e.to_string(),
        })
    }

    /// Namespaces that currently have at least one binding registered.
    pub fn namespaces(&self) -> Vec<String> {
        let namespaces = self.namespaces.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = namespaces.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("capabilities", &self.capabilities)
            .field("namespaces", &self.namespaces())
            .finish()
    }
}

/// Forward a script call to the capability table.
fn dispatch(
    table: &CapabilityTable,
    handle: CapabilityHandle,
    args: &[INT],
) -> Result<INT, Box<EvalAltResult>> {
    table.invoke(handle, args).map_err(|e| e.to_string().into())
}


// ---------------------------------------------------------------------------
// Engine factory
// ---------------------------------------------------------------------------

/// Create the engine with configured limits and logging hooks.
pub fn create_engine(config: &EngineConfig) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(config.max_expr_depth, config.max_function_expr_depth);
    engine.set_max_operations(config.max_operations);
    engine.set_max_string_size(config.max_string_size);
    engine.set_max_array_size(config.max_array_size);
    engine.set_max_map_size(config.max_map_size);

    engine.on_print(|msg| {
        tracing::info!(target: "script", "{}", msg);
    });
    engine.on_debug(|msg, source, pos| {
        tracing::debug!(target: "script", "{} @ {:?} {}", msg, source, pos);
    });

    engine.register_fn("log", |msg: &str| {
        tracing::info!(target: "script", "{}", msg);
    });
    engine.register_fn("log_debug", |msg: &str| {
        tracing::debug!(target: "script", "{}", msg);
    });
    engine.register_fn("log_warn", |msg: &str| {
        tracing::warn!(target: "script", "{}", msg);
    });

    engine
}
