//! # Lattice Runtime
//!
//! Orchestration layer for the Lattice plugin runtime:
//!
//! - [`LatticeRuntime`] — explicitly constructed runtime object owning the
//!   event bus, service container, configuration manager, and plugin
//!   manager; initialized once at process start, torn down once at
//!   shutdown.
//! - [`RuntimeBuilder`] — wires configuration files and plugin
//!   implementations into the runtime.
//! - [`logging`] — tracing-subscriber initialization from the `logging.*`
//!   configuration section.

pub mod error;
pub mod logging;
pub mod runtime;

pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LogFormat, LogOutput, LoggingBuilder, LoggingConfig};
pub use runtime::{LatticeRuntime, RuntimeBuilder};

// Re-export tracing for use by plugin crates.
pub use tracing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
