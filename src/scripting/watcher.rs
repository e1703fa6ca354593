// src/scripting/watcher.rs — Background hot-reload watcher
//
// Polls cached scripts every `poll_interval` and recompiles the ones whose
// modification time changed. Stopping is cooperative: the stop flag is
// checked at the top of every cycle, and the shutdown signal cuts the sleep
// short so the task exits promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::infra::logger::SCRIPT_TARGET;
use crate::scripting::cache::{ReloadReport, ScriptCache};

pub(crate) struct WatcherHandle {
    stop: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    fn signal(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.shutdown_tx.send(());
    }
}

impl ScriptCache {
    /// Start the watcher task. Returns `false` if one is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_watching(self: &Arc<Self>) -> bool {
        let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return false;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(watch_loop(
            Arc::downgrade(self),
            stop.clone(),
            shutdown_rx,
            self.poll_interval,
        ));

        *slot = Some(WatcherHandle {
            stop,
            shutdown_tx,
            task,
        });
        true
    }

    /// Ask the watcher to stop. Returns `false` if none was running.
    ///
    /// The task exits at the start of its next cycle; a pass that is already
    /// in progress completes first.
    pub fn stop_watching(&self) -> bool {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match handle {
            Some(handle) => {
                handle.signal();
                true
            }
            None => false,
        }
    }

    /// Stop the watcher and wait for its task to exit.
    pub async fn stop_watching_and_wait(&self) {
        let handle = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.signal();
            let _ = handle.task.await;
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }
}

async fn watch_loop(
    cache: Weak<ScriptCache>,
    stop: Arc<AtomicBool>,
    mut shutdown_rx: broadcast::Receiver<()>,
    interval: Duration,
) {
    tracing::info!(
        target: SCRIPT_TARGET,
        "Script watcher started ({}ms interval)",
        interval.as_millis()
    );

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        // The watcher never keeps the cache alive on its own.
        let Some(cache) = cache.upgrade() else {
            break;
        };

        match tokio::task::spawn_blocking(move || cache.poll_changes()).await {
            Ok(report) => log_report(&report),
            Err(e) => tracing::warn!(target: SCRIPT_TARGET, "Watcher pass failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.recv() => break,
        }
    }

    tracing::info!(target: SCRIPT_TARGET, "Script watcher stopped");
}

fn log_report(report: &ReloadReport) {
    if report.is_empty() {
        return;
    }
    tracing::debug!(
        target: SCRIPT_TARGET,
        "Watcher pass: {} reloaded, {} failed, {} deferred",
        report.reloaded.len(),
        report.failed.len(),
        report.deferred.len()
    );
}
