//! Unified error types for the Lattice core contracts.
//!
//! Framework-level errors (service resolution, configuration sources) are
//! defined alongside their components in `lattice-framework`.

use thiserror::Error;

/// Type-erased error returned by plugin hook implementations.
///
/// Hooks (`on_initialize`, `on_start`, …) may fail with any error type; the
/// lifecycle drivers convert the failure into the matching [`PluginError`]
/// variant, preserving the rendered cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the plugin lifecycle and the plugin manager.
///
/// Every variant names the plugin (or dependency) involved so that callers
/// never have to reconstruct context from a bare message.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// A plugin failed to load.
    #[error("failed to load plugin '{plugin}': {cause}")]
    Load {
        /// Name of the plugin that failed.
        plugin: String,
        /// Rendered underlying cause.
        cause: String,
    },

    /// A dependency cycle was detected during dependency resolution.
    #[error("dependency cycle detected involving plugin '{plugin}'")]
    DependencyCycle {
        /// A plugin participating in the cycle.
        plugin: String,
    },

    /// A declared dependency is absent from the discovered set.
    #[error("dependency '{dependency}' required by '{plugin}' was not found")]
    MissingDependency {
        /// Plugin that declared the dependency.
        plugin: String,
        /// The dependency that could not be found.
        dependency: String,
    },

    /// Plugin configuration failed schema validation.
    #[error("invalid configuration for plugin '{plugin}': {message}")]
    Config {
        /// Plugin whose configuration is invalid.
        plugin: String,
        /// What is wrong with the configuration.
        message: String,
    },

    /// `on_initialize` failed.
    #[error("failed to initialize plugin '{plugin}': {cause}")]
    Init {
        /// Plugin that failed to initialize.
        plugin: String,
        /// Rendered underlying cause.
        cause: String,
    },

    /// `on_start` failed, or `start` was called out of order.
    #[error("failed to start plugin '{plugin}': {cause}")]
    Startup {
        /// Plugin that failed to start.
        plugin: String,
        /// Rendered underlying cause.
        cause: String,
    },

    /// `on_stop` failed.
    #[error("failed to stop plugin '{plugin}': {cause}")]
    Shutdown {
        /// Plugin that failed to stop.
        plugin: String,
        /// Rendered underlying cause.
        cause: String,
    },

    /// The named plugin is not loaded / not discovered.
    #[error("plugin '{plugin}' not found")]
    NotFound {
        /// The missing plugin.
        plugin: String,
    },

    /// An attempt was made to load a plugin that is already loaded.
    #[error("plugin '{plugin}' is already loaded")]
    AlreadyLoaded {
        /// The duplicate plugin.
        plugin: String,
    },

    /// Two discovered implementations of the same plugin disagree on version.
    #[error(
        "version conflict for plugin '{plugin}': requested {requested}, available {available}"
    )]
    VersionConflict {
        /// Plugin with conflicting versions.
        plugin: String,
        /// Version requested by the caller or manifest.
        requested: String,
        /// Version actually available.
        available: String,
    },

    /// Hot-reload was requested but is unsupported or failed.
    #[error("hot-reload failed for plugin '{plugin}': {message}")]
    HotReload {
        /// Plugin that could not be reloaded.
        plugin: String,
        /// Why the reload failed.
        message: String,
    },
}

/// Result type for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;
