//! Runtime error types.

use thiserror::Error;

use lattice_core::PluginError;
use lattice_framework::ConfigError;

/// Errors that can occur during runtime orchestration.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration loading or merging failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A plugin operation failed.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
