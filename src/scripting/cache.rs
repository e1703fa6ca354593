// src/scripting/cache.rs — Script cache and single-slot execution
//
// Scripts are compiled once on load and kept as `Arc<AST>` keyed by path.
// At most one script executes at a time: `run` fails fast with `Busy`
// instead of queueing. The busy flag is cleared by a drop guard, so it is
// released on success, on a script error, and on a panic alike.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use rhai::AST;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::infra::logger::SCRIPT_TARGET;
use crate::scripting::runtime::{ScriptError, ScriptRuntime};
use crate::scripting::watcher::WatcherHandle;

/// Default watcher poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(750);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// The path was already in the cache; nothing changed.
    AlreadyLoaded,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("Another script is already executing")]
    Busy,

    #[error("Script {} is not loaded", path.display())]
    NotLoaded { path: PathBuf },
}

/// One compiled, independently reloadable script file.
pub(crate) struct ScriptUnit {
    pub(crate) compiled: Arc<AST>,
    pub(crate) modified: Option<SystemTime>,
    pub(crate) executing: bool,
}

/// What one watcher pass did.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub reloaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, ScriptError)>,
    /// Changed but currently executing; retried on a later pass.
    pub deferred: Vec<PathBuf>,
}

impl ReloadReport {
    pub fn is_empty(&self) -> bool {
        self.reloaded.is_empty() && self.failed.is_empty() && self.deferred.is_empty()
    }
}

pub struct ScriptCache {
    pub(crate) runtime: Arc<ScriptRuntime>,
    pub(crate) units: Mutex<BTreeMap<PathBuf, ScriptUnit>>,
    busy: AtomicBool,
    /// Signalled whenever the busy flag clears.
    idle: Notify,
    pub(crate) watcher: Mutex<Option<WatcherHandle>>,
    pub(crate) poll_interval: Duration,
}

impl ScriptCache {
    pub fn new(runtime: Arc<ScriptRuntime>, poll_interval: Duration) -> Self {
        Self {
            runtime,
            units: Mutex::new(BTreeMap::new()),
            busy: AtomicBool::new(false),
            idle: Notify::new(),
            watcher: Mutex::new(None),
            poll_interval,
        }
    }

    pub fn runtime(&self) -> &Arc<ScriptRuntime> {
        &self.runtime
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn lock_units(&self) -> MutexGuard<'_, BTreeMap<PathBuf, ScriptUnit>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Compile `path` and add it to the cache.
    ///
    /// A path that is already cached is left untouched and reported as
    /// `AlreadyLoaded`. On a compile error the cache is unchanged.
    pub fn load_script(&self, path: &Path) -> Result<LoadOutcome, ScriptError> {
        let key = cache_key(path);
        if self.lock_units().contains_key(&key) {
            tracing::debug!(target: SCRIPT_TARGET, "Script already loaded: {}", key.display());
            return Ok(LoadOutcome::AlreadyLoaded);
        }

        // Read the timestamp before the content so a concurrent edit is
        // picked up by the next watcher pass rather than missed.
        let modified = modified_time(&key);
        let ast = self.runtime.compile_file(&key)?;

        let mut units = self.lock_units();
        if units.contains_key(&key) {
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        units.insert(
            key.clone(),
            ScriptUnit {
                compiled: Arc::new(ast),
                modified,
                executing: false,
            },
        );
        tracing::info!(target: SCRIPT_TARGET, "Loaded script: {}", key.display());
        Ok(LoadOutcome::Loaded)
    }

    /// Remove a script from the cache. Refused while it is executing.
    pub fn unload_script(&self, path: &Path) -> Result<(), ScriptError> {
        let key = cache_key(path);
        let mut units = self.lock_units();
        match units.get(&key) {
            None => Err(ScriptError::NotLoaded { path: key }),
            Some(unit) if unit.executing => Err(ScriptError::Executing { path: key }),
            Some(_) => {
                units.remove(&key);
                tracing::info!(target: SCRIPT_TARGET, "Unloaded script: {}", key.display());
                Ok(())
            }
        }
    }

    /// Start executing a loaded script on a blocking task.
    ///
    /// Fails immediately with `Busy` if any script is executing, or with
    /// `NotLoaded` if `path` is not cached. Must be called from within a
    /// Tokio runtime.
    pub fn run(self: &Arc<Self>, path: &Path) -> Result<ExecutionToken, RunError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RunError::Busy);
        }

        let key = cache_key(path);
        let ast = {
            let mut units = self.lock_units();
            match units.get_mut(&key) {
                Some(unit) => {
                    unit.executing = true;
                    unit.compiled.clone()
                }
                None => {
                    self.busy.store(false, Ordering::Release);
                    self.idle.notify_waiters();
                    return Err(RunError::NotLoaded { path: key });
                }
            }
        };

        let guard = ExecutionGuard {
            cache: Arc::clone(self),
            path: key.clone(),
        };
        let runtime = self.runtime.clone();
        let task_path = key.clone();
        let id = Uuid::new_v4();

        tracing::info!(target: SCRIPT_TARGET, "Running script {} ({})", key.display(), id);
        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let result = runtime.execute(&task_path, &ast);
            match &result {
                Ok(()) => {
                    tracing::info!(target: SCRIPT_TARGET, "Script finished: {}", task_path.display())
                }
                Err(e) => tracing::warn!(target: SCRIPT_TARGET, "{}", e),
            }
            result
        });

        Ok(ExecutionToken {
            id,
            path: key,
            handle,
        })
    }

    /// Whether any script is executing right now.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Wait until no script is executing. Returns at once when idle.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            // Register before checking, or a release in between is missed.
            notified.as_mut().enable();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }

    /// Path of the executing script, if any.
    pub fn executing_path(&self) -> Option<PathBuf> {
        self.lock_units()
            .iter()
            .find(|(_, unit)| unit.executing)
            .map(|(path, _)| path.clone())
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.lock_units().contains_key(&cache_key(path))
    }

    /// Cached paths, sorted.
    pub fn loaded_paths(&self) -> Vec<PathBuf> {
        self.lock_units().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_units().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored modification time of a cached script.
    pub fn cached_modified(&self, path: &Path) -> Option<SystemTime> {
        self.lock_units()
            .get(&cache_key(path))
            .and_then(|unit| unit.modified)
    }

    /// The compiled form currently served for `path`.
    pub fn compiled(&self, path: &Path) -> Option<Arc<AST>> {
        self.lock_units()
            .get(&cache_key(path))
            .map(|unit| unit.compiled.clone())
    }

    /// One watcher pass: recompile every cached script whose on-disk
    /// modification time differs from the stored one.
    ///
    /// A failed recompilation keeps the previous compiled form and timestamp,
    /// so the script keeps working and the edit is retried next pass. A
    /// script that is executing is deferred until it is idle.
    pub fn poll_changes(&self) -> ReloadReport {
        let snapshot: Vec<(PathBuf, Option<SystemTime>)> = self
            .lock_units()
            .iter()
            .map(|(path, unit)| (path.clone(), unit.modified))
            .collect();

        let changed: Vec<(PathBuf, SystemTime)> = snapshot
            .into_iter()
            .filter_map(|(path, stored)| match modified_time(&path) {
                Some(current) if Some(current) != stored => Some((path, current)),
                _ => None,
            })
            .collect();

        let mut report = ReloadReport::default();
        for (path, current) in changed {
            if self.unit_executing(&path) {
                tracing::debug!(
                    target: SCRIPT_TARGET,
                    "Deferring reload of executing script {}",
                    path.display()
                );
                report.deferred.push(path);
                continue;
            }

            match self.runtime.compile_file(&path) {
                Ok(ast) => {
                    let mut units = self.lock_units();
                    match units.get_mut(&path) {
                        Some(unit) if !unit.executing => {
                            unit.compiled = Arc::new(ast);
                            unit.modified = Some(current);
                            tracing::info!(target: SCRIPT_TARGET, "Reloaded script: {}", path.display());
                            report.reloaded.push(path);
                        }
                        Some(_) => report.deferred.push(path),
                        // Unloaded while we were compiling.
                        None => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(target: SCRIPT_TARGET, "Keeping last good version: {}", e);
                    report.failed.push((path, e));
                }
            }
        }

        report
    }

    fn unit_executing(&self, path: &Path) -> bool {
        self.lock_units().get(path).is_some_and(|unit| unit.executing)
    }
}

impl Drop for ScriptCache {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

impl std::fmt::Debug for ScriptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCache")
            .field("scripts", &self.loaded_paths())
            .field("busy", &self.is_busy())
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Clears the busy flag (and the unit's executing mark) when dropped.
struct ExecutionGuard {
    cache: Arc<ScriptCache>,
    path: PathBuf,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if let Some(unit) = self.cache.lock_units().get_mut(&self.path) {
            unit.executing = false;
        }
        self.cache.busy.store(false, Ordering::Release);
        self.cache.idle.notify_waiters();
    }
}

/// Handle to an in-flight script execution.
#[derive(Debug)]
pub struct ExecutionToken {
    id: Uuid,
    path: PathBuf,
    handle: JoinHandle<Result<(), ScriptError>>,
}

impl ExecutionToken {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the script to finish and return its result.
    pub async fn wait(self) -> Result<(), ScriptError> {
        match self.handle.await {
            Ok(result) => result,
            Err(_) => Err(ScriptError::Panicked { path: self.path }),
        }
    }
}

/// Cache key for a script path: canonical when the file exists.
pub(crate) fn cache_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub(crate) fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cache() -> Arc<ScriptCache> {
        Arc::new(ScriptCache::new(
            Arc::new(ScriptRuntime::with_defaults()),
            DEFAULT_POLL_INTERVAL,
        ))
    }

    #[test]
    fn test_load_twice_is_already_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rhai");
        fs::write(&path, "let x = 1;").unwrap();

        let cache = cache();
        assert_eq!(cache.load_script(&path).unwrap(), LoadOutcome::Loaded);
        assert_eq!(cache.load_script(&path).unwrap(), LoadOutcome::AlreadyLoaded);
        assert_eq!(cache.len(), 1);
        assert!(cache.cached_modified(&path).is_some());
    }

    #[test]
    fn test_compile_error_leaves_cache_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.rhai");
        fs::write(&path, "fn broken( {").unwrap();

        let cache = cache();
        let err = cache.load_script(&path).unwrap_err();
        assert!(matches!(err, ScriptError::Compile { .. }));
        assert!(cache.is_empty());
        assert!(!cache.is_loaded(&path));
    }

    #[test]
    fn test_load_missing_file() {
        let cache = cache();
        let err = cache
            .load_script(Path::new("/nonexistent/script.rhai"))
            .unwrap_err();
        assert!(matches!(err, ScriptError::Io { .. }));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rhai");
        fs::write(&path, "1").unwrap();

        let cache = cache();
        cache.load_script(&path).unwrap();
        cache.unload_script(&path).unwrap();
        assert!(cache.is_empty());
        assert!(matches!(
            cache.unload_script(&path),
            Err(ScriptError::NotLoaded { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_not_loaded_releases_flag() {
        let cache = cache();
        let err = cache.run(Path::new("/nonexistent/x.rhai")).unwrap_err();
        assert!(matches!(err, RunError::NotLoaded { .. }));
        assert!(!cache.is_busy());
    }

    #[tokio::test]
    async fn test_runtime_error_clears_busy_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("throws.rhai");
        fs::write(&path, r#"throw "bad";"#).unwrap();

        let cache = cache();
        cache.load_script(&path).unwrap();
        let token = cache.run(&path).unwrap();
        let result = token.wait().await;
        assert!(matches!(result, Err(ScriptError::Runtime { .. })));
        assert!(!cache.is_busy());
        assert!(cache.executing_path().is_none());

        // Runnable again after the failure.
        assert!(cache.run(&path).is_ok());
    }

    #[tokio::test]
    async fn test_wait_idle_returns_when_idle() {
        let cache = cache();
        tokio::time::timeout(Duration::from_secs(1), cache.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_idle_waits_for_running_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.rhai");
        fs::write(&path, "nap(); nap();").unwrap();

        let cache = cache();
        cache
            .runtime
            .bind_host_fn("nap", |_| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(0)
            })
            .unwrap();
        cache.load_script(&path).unwrap();

        let token = cache.run(&path).unwrap();
        tokio::time::timeout(Duration::from_secs(5), cache.wait_idle())
            .await
            .unwrap();
        assert!(!cache.is_busy());
        assert!(token.wait().await.is_ok());
    }

    #[test]
    fn test_poll_without_changes_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rhai");
        fs::write(&path, "1").unwrap();

        let cache = cache();
        cache.load_script(&path).unwrap();
        assert!(cache.poll_changes().is_empty());
    }

    #[test]
    fn test_deleted_file_keeps_last_good() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rhai");
        fs::write(&path, "1").unwrap();

        let cache = cache();
        cache.load_script(&path).unwrap();
        let key = cache.loaded_paths()[0].clone();
        fs::remove_file(&path).unwrap();

        assert!(cache.poll_changes().is_empty());
        assert!(cache.compiled(&key).is_some());
    }
}
