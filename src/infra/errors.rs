// src/infra/errors.rs — Error types for plugscript

use std::path::PathBuf;

use thiserror::Error;

use crate::plugins::resolver::ResolutionError;
use crate::scripting::capability::CapabilityError;
use crate::scripting::cache::RunError;
use crate::scripting::runtime::ScriptError;

/// Why a single plugin failed to load or activate. Fatal to that plugin only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Plugin artifact not found: {}", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("Failed to load library {}: {message}", path.display())]
    LibraryLoadFailed { path: PathBuf, message: String },

    #[error("Missing required entry point '{symbol}'")]
    MissingRequiredEntryPoint { symbol: String },

    #[error("Activation failed: {reason}")]
    ActivationFailed { reason: String },
}

impl LoadError {
    /// Short, stable name of the failure kind (used in reports and logs).
    pub fn kind(&self) -> &'static str {
        match self {
            LoadError::ArtifactNotFound { .. } => "ArtifactNotFound",
            LoadError::LibraryLoadFailed { .. } => "LibraryLoadFailed",
            LoadError::MissingRequiredEntryPoint { .. } => "MissingRequiredEntryPoint",
            LoadError::ActivationFailed { .. } => "ActivationFailed",
        }
    }
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Errors the caller is expected to retry rather than report.
    pub fn is_retriable(&self) -> bool {
        matches!(self, HostError::Run(RunError::Busy))
    }
}
