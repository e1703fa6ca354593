// src/plugins/mod.rs — Native plugin system: discovery, ordering, loading

pub mod abi;
pub mod context;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod record;
pub mod registry;
pub mod resolver;

pub use loader::{LibloadingLoader, ModuleLoader, NativeLoader, NativeModule};
pub use manager::{LoadReport, PluginManager, PluginOutcome};
pub use record::{ActivationState, Dependencies, PluginRecord};
pub use registry::PluginRegistry;
pub use resolver::{resolve, ResolutionError};
