// tests/plugins_test.rs — Integration test: plugin lifecycle with in-process modules

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;

use plugscript::infra::errors::LoadError;
use plugscript::plugins::abi::{
    args_slice, EntryPointFn, HostContext, ACTIVATE_SYMBOL, DEACTIVATE_SYMBOL, STATUS_ERROR,
    STATUS_OK,
};
use plugscript::plugins::registry::default_artifact_name;
use plugscript::plugins::{
    ActivationState, ModuleLoader, NativeModule, PluginManager, PluginOutcome,
};
use plugscript::scripting::{CapabilityName, ScriptRuntime};

// ─── Fake native modules ────────────────────────────────────────────────────

/// Symbols of one fake library.
struct MockModule {
    symbols: HashMap<&'static str, EntryPointFn>,
    /// Set when the library is released.
    released: Option<&'static AtomicBool>,
}

impl NativeModule for MockModule {
    fn symbol(&self, name: &str) -> Option<EntryPointFn> {
        self.symbols.get(name).copied()
    }
}

impl Drop for MockModule {
    fn drop(&mut self) {
        if let Some(flag) = self.released {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Serves fake libraries keyed by plugin directory name.
#[derive(Default)]
struct MockModuleLoader {
    modules: HashMap<String, Vec<(&'static str, EntryPointFn)>>,
    release_flags: HashMap<String, &'static AtomicBool>,
}

impl MockModuleLoader {
    fn with(mut self, dir: &str, symbols: Vec<(&'static str, EntryPointFn)>) -> Self {
        self.modules.insert(dir.to_string(), symbols);
        self
    }

    fn track_release(mut self, dir: &str, flag: &'static AtomicBool) -> Self {
        self.release_flags.insert(dir.to_string(), flag);
        self
    }
}

impl ModuleLoader for MockModuleLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn NativeModule>, String> {
        let dir = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let symbols = self
            .modules
            .get(&dir)
            .ok_or_else(|| format!("cannot open {}", path.display()))?;
        Ok(Box::new(MockModule {
            symbols: symbols.iter().copied().collect(),
            released: self.release_flags.get(&dir).copied(),
        }))
    }
}

/// Create `root/<dir>` with an (empty) artifact and optional metadata.
fn plugin_dir(root: &Path, dir: &str, metadata: Option<&str>) {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join(default_artifact_name()), b"").unwrap();
    if let Some(json) = metadata {
        std::fs::write(path.join("plugin.json"), json).unwrap();
    }
}

fn manager(loader: MockModuleLoader) -> (Arc<ScriptRuntime>, PluginManager) {
    let runtime = Arc::new(ScriptRuntime::with_defaults());
    let manager = PluginManager::with_backend(runtime.clone(), Arc::new(loader));
    (runtime, manager)
}

// ─── Plugin entry points ────────────────────────────────────────────────────

unsafe extern "C" fn add(args: *const i64, argc: usize, out: *mut i64) -> i32 {
    *out = args_slice(args, argc).iter().sum();
    STATUS_OK
}

unsafe extern "C" fn mul(args: *const i64, argc: usize, out: *mut i64) -> i32 {
    *out = args_slice(args, argc).iter().product();
    STATUS_OK
}

unsafe extern "C" fn core_activate(ctx: *const HostContext) -> i32 {
    (*ctx).bind_namespaced("core", "add", add)
}

unsafe extern "C" fn noop_activate(_ctx: *const HostContext) -> i32 {
    STATUS_OK
}

unsafe extern "C" fn failing_activate(_ctx: *const HostContext) -> i32 {
    STATUS_ERROR
}

unsafe extern "C" fn mul_activate(ctx: *const HostContext) -> i32 {
    (*ctx).bind("mul", mul)
}

// The consumer keeps its context to call `core.add` when its own capability
// runs; the context lives as long as the plugin is loaded.
static CONSUMER_CTX: AtomicPtr<HostContext> = AtomicPtr::new(std::ptr::null_mut());

unsafe extern "C" fn add_then_double(args: *const i64, argc: usize, out: *mut i64) -> i32 {
    let Some(ctx) = CONSUMER_CTX.load(Ordering::Acquire).as_ref() else {
        return STATUS_ERROR;
    };
    match ctx.call("core.add", args_slice(args, argc)) {
        Ok(sum) => {
            *out = sum * 2;
            STATUS_OK
        }
        Err(status) => status,
    }
}

unsafe extern "C" fn consumer_activate(ctx: *const HostContext) -> i32 {
    // Dependencies are active before us, so their capabilities resolve.
    if (*ctx).call("core.add", &[1, 1]) != Ok(2) {
        return STATUS_ERROR;
    }
    CONSUMER_CTX.store(ctx as *mut HostContext, Ordering::Release);
    (*ctx).bind_namespaced("consumer", "add_then_double", add_then_double)
}

static DEACTIVATED: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

unsafe extern "C" fn first_deactivate(_ctx: *const HostContext) -> i32 {
    DEACTIVATED.lock().unwrap().push("first");
    STATUS_OK
}

unsafe extern "C" fn second_deactivate(_ctx: *const HostContext) -> i32 {
    DEACTIVATED.lock().unwrap().push("second");
    STATUS_OK
}

static SLOW_STARTED: AtomicBool = AtomicBool::new(false);
static SLOW_LIB_RELEASED: AtomicBool = AtomicBool::new(false);
static SLOW_RAN_AFTER_RELEASE: AtomicBool = AtomicBool::new(false);

unsafe extern "C" fn slow(args: *const i64, argc: usize, out: *mut i64) -> i32 {
    SLOW_STARTED.store(true, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(300));
    if SLOW_LIB_RELEASED.load(Ordering::SeqCst) {
        SLOW_RAN_AFTER_RELEASE.store(true, Ordering::SeqCst);
    }
    *out = args_slice(args, argc).first().copied().unwrap_or(0);
    STATUS_OK
}

unsafe extern "C" fn slow_activate(ctx: *const HostContext) -> i32 {
    (*ctx).bind("slow", slow)
}

fn entry(f: unsafe extern "C" fn(*const HostContext) -> i32) -> EntryPointFn {
    f
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[test]
fn test_resolution_order_follows_dependencies() {
    let root = tempfile::tempdir().unwrap();
    // Discovery order is c, b, a; load order must be a, b, c.
    plugin_dir(
        root.path(),
        "1_c",
        Some(r#"{"name": "C", "dependencies": [{"name": "A"}, {"name": "B"}]}"#),
    );
    plugin_dir(
        root.path(),
        "2_b",
        Some(r#"{"name": "B", "dependencies": [{"name": "A"}]}"#),
    );
    plugin_dir(root.path(), "3_a", Some(r#"{"name": "A"}"#));

    let loader = MockModuleLoader::default()
        .with("1_c", vec![(ACTIVATE_SYMBOL, entry(noop_activate))])
        .with("2_b", vec![(ACTIVATE_SYMBOL, entry(noop_activate))])
        .with("3_a", vec![(ACTIVATE_SYMBOL, entry(noop_activate))]);
    let (_runtime, mut manager) = manager(loader);

    let report = manager.run_all(root.path()).unwrap();
    assert_eq!(report.active(), vec!["A", "B", "C"]);
    assert_eq!(manager.active_plugins(), &["A", "B", "C"]);
}

#[test]
fn test_cycle_aborts_whole_run() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(
        root.path(),
        "a",
        Some(r#"{"dependencies": [{"name": "b"}]}"#),
    );
    plugin_dir(
        root.path(),
        "b",
        Some(r#"{"dependencies": [{"name": "a"}]}"#),
    );
    plugin_dir(root.path(), "free", None);

    let loader = MockModuleLoader::default()
        .with("free", vec![(ACTIVATE_SYMBOL, entry(noop_activate))]);
    let (_runtime, mut manager) = manager(loader);

    let err = manager.run_all(root.path()).unwrap_err();
    let unresolved: Vec<&str> = err.unresolved().iter().map(|u| u.name.as_str()).collect();
    assert_eq!(unresolved, vec!["a", "b"]);
    // No partial order is applied.
    assert_eq!(manager.get("free").unwrap().state(), ActivationState::Discovered);
    assert!(manager.active_plugins().is_empty());
}

#[test]
fn test_duplicate_plugin_names_first_wins() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(root.path(), "a_math", Some(r#"{"name": "math", "version": "1.0"}"#));
    plugin_dir(root.path(), "b_math", Some(r#"{"name": "math", "version": "2.0"}"#));

    let loader = MockModuleLoader::default()
        .with("a_math", vec![(ACTIVATE_SYMBOL, entry(mul_activate))])
        .with("b_math", vec![(ACTIVATE_SYMBOL, entry(mul_activate))]);
    let (_runtime, mut manager) = manager(loader);

    let report = manager.run_all(root.path()).unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(manager.plugins().len(), 1);
    let math = manager.get("math").unwrap();
    assert_eq!(math.version, "1.0");
    assert!(math.directory.ends_with("a_math"));
}

#[test]
fn test_missing_entry_point_fails_only_that_plugin() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(root.path(), "a_broken", None);
    plugin_dir(root.path(), "b_core", Some(r#"{"name": "core"}"#));
    plugin_dir(root.path(), "c_mul", None);

    let loader = MockModuleLoader::default()
        .with("a_broken", vec![(DEACTIVATE_SYMBOL, entry(noop_activate))])
        .with("b_core", vec![(ACTIVATE_SYMBOL, entry(core_activate))])
        .with("c_mul", vec![(ACTIVATE_SYMBOL, entry(mul_activate))]);
    let (runtime, mut manager) = manager(loader);

    let report = manager.run_all(root.path()).unwrap();
    assert_eq!(
        report.get("a_broken"),
        Some(&PluginOutcome::Failed(LoadError::MissingRequiredEntryPoint {
            symbol: "activate".into()
        }))
    );
    assert_eq!(report.active(), vec!["core", "c_mul"]);
    assert_eq!(
        manager.get("a_broken").unwrap().state(),
        ActivationState::Failed
    );
    assert_eq!(runtime.eval_int("core::add(2, 3) + mul(4, 5)").unwrap(), 25);
}

#[test]
fn test_failed_activation_and_unopenable_library() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(root.path(), "a_fails", None);
    plugin_dir(root.path(), "b_unknown", None);
    plugin_dir(root.path(), "c_ok", None);

    let loader = MockModuleLoader::default()
        .with("a_fails", vec![(ACTIVATE_SYMBOL, entry(failing_activate))])
        .with("c_ok", vec![(ACTIVATE_SYMBOL, entry(noop_activate))]);
    let (_runtime, mut manager) = manager(loader);

    let report = manager.run_all(root.path()).unwrap();
    let labels: Vec<(&str, &str)> = report
        .outcomes
        .iter()
        .map(|(name, outcome)| (name.as_str(), outcome.label()))
        .collect();
    assert_eq!(
        labels,
        vec![
            ("a_fails", "ActivationFailed"),
            ("b_unknown", "LibraryLoadFailed"),
            ("c_ok", "Active"),
        ]
    );
}

#[test]
fn test_dependent_plugin_calls_through_runtime() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(
        root.path(),
        "a_consumer",
        Some(r#"{"name": "consumer", "dependencies": [{"name": "core"}]}"#),
    );
    plugin_dir(root.path(), "b_core", Some(r#"{"name": "core"}"#));

    let loader = MockModuleLoader::default()
        .with("a_consumer", vec![(ACTIVATE_SYMBOL, entry(consumer_activate))])
        .with("b_core", vec![(ACTIVATE_SYMBOL, entry(core_activate))]);
    let (runtime, mut manager) = manager(loader);

    let report = manager.run_all(root.path()).unwrap();
    assert_eq!(report.active(), vec!["core", "consumer"]);

    // script -> consumer (native) -> runtime -> core (native)
    assert_eq!(
        runtime.eval_int("consumer::add_then_double(2, 3)").unwrap(),
        10
    );
    assert_eq!(runtime.call("consumer.add_then_double", &[1, 2, 3]).unwrap(), 12);

    let exported: Vec<String> = manager
        .get("consumer")
        .unwrap()
        .exported_capabilities()
        .map(|c| c.to_string())
        .collect();
    assert_eq!(exported, vec!["consumer.add_then_double"]);

    manager.shutdown();
    CONSUMER_CTX.store(std::ptr::null_mut(), Ordering::Release);
}

#[test]
fn test_shutdown_deactivates_in_reverse_and_revokes() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(
        root.path(),
        "a_second",
        Some(r#"{"name": "second", "dependencies": [{"name": "first"}]}"#),
    );
    plugin_dir(root.path(), "b_first", Some(r#"{"name": "first"}"#));

    let loader = MockModuleLoader::default()
        .with(
            "a_second",
            vec![
                (ACTIVATE_SYMBOL, entry(mul_activate)),
                (DEACTIVATE_SYMBOL, entry(second_deactivate)),
            ],
        )
        .with(
            "b_first",
            vec![
                (ACTIVATE_SYMBOL, entry(core_activate)),
                (DEACTIVATE_SYMBOL, entry(first_deactivate)),
            ],
        );
    let (runtime, mut manager) = manager(loader);

    manager.run_all(root.path()).unwrap();
    assert_eq!(runtime.call("core.add", &[1, 2]).unwrap(), 3);

    manager.shutdown();
    assert_eq!(*DEACTIVATED.lock().unwrap(), vec!["second", "first"]);
    assert!(runtime.call("core.add", &[1, 2]).is_err());
    assert!(runtime.eval_int("mul(2, 2)").is_err());
    assert!(!manager.get("first").unwrap().is_loaded());
}

#[test]
fn test_conflicting_binding_fails_later_plugin() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(root.path(), "a_mul", None);
    plugin_dir(root.path(), "b_mul_again", None);

    let loader = MockModuleLoader::default()
        .with("a_mul", vec![(ACTIVATE_SYMBOL, entry(mul_activate))])
        .with("b_mul_again", vec![(ACTIVATE_SYMBOL, entry(mul_activate))]);
    let (runtime, mut manager) = manager(loader);

    let report = manager.run_all(root.path()).unwrap();
    assert!(report.get("a_mul").unwrap().is_active());
    assert_eq!(report.get("b_mul_again").unwrap().label(), "ActivationFailed");

    // The first binding survives the second plugin's failure.
    assert_eq!(runtime.eval_int("mul(6, 7)").unwrap(), 42);
    assert_eq!(
        runtime
            .capabilities()
            .owner_of(&CapabilityName::parse("mul").unwrap())
            .as_deref(),
        Some("a_mul")
    );
}

#[test]
fn test_shutdown_during_native_call_keeps_library_until_return() {
    let root = tempfile::tempdir().unwrap();
    plugin_dir(root.path(), "sleeper", None);

    let loader = MockModuleLoader::default()
        .with("sleeper", vec![(ACTIVATE_SYMBOL, entry(slow_activate))])
        .track_release("sleeper", &SLOW_LIB_RELEASED);
    let (runtime, mut manager) = manager(loader);
    manager.run_all(root.path()).unwrap();

    let script_runtime = runtime.clone();
    let call = std::thread::spawn(move || script_runtime.eval_int("slow(7)"));
    while !SLOW_STARTED.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(5));
    }

    manager.shutdown();
    assert!(!manager.get("sleeper").unwrap().is_loaded());
    // The running call still holds the library.
    assert!(!SLOW_LIB_RELEASED.load(Ordering::SeqCst));

    assert_eq!(call.join().unwrap().unwrap(), 7);
    assert!(!SLOW_RAN_AFTER_RELEASE.load(Ordering::SeqCst));
    assert!(SLOW_LIB_RELEASED.load(Ordering::SeqCst));

    // New calls see the revocation.
    assert!(runtime.eval_int("slow(1)").is_err());
}
