// src/scripting/mod.rs — Embedded script runtime and hot-reloading cache

pub mod cache;
pub mod capability;
pub mod persist;
pub mod runtime;
pub mod watcher;

pub use cache::{ExecutionToken, LoadOutcome, ReloadReport, RunError, ScriptCache};
pub use capability::{CapabilityError, CapabilityName, CapabilityTable, NativeCallable};
pub use persist::{RestoreReport, ScriptList};
pub use runtime::{ScriptError, ScriptRuntime};
