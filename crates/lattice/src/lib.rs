//! # Lattice
//!
//! A modular runtime that loads, wires, supervises, and hot-swaps
//! capability-typed plugins inside a long-running service.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   discovers    ┌─────────────────┐
//! │ PluginManager │ ─────────────► │ PluginDiscovery │──► manifests, load order
//! │               │                └─────────────────┘
//! │  lifecycle:   │   registers    ┌──────────────────┐
//! │  initialize → │ ─────────────► │ ServiceContainer │──► typed services
//! │  start → stop │                └──────────────────┘
//! │               │   publishes    ┌──────────┐
//! │               │ ─────────────► │ EventBus │──► external observers
//! └───────────────┘                └──────────┘
//!         ▲ config                 ┌───────────────┐
//!         └─────────────────────── │ ConfigManager │──► sources, env, reload
//!                                  └───────────────┘
//! ```
//!
//! - **Capability contracts**: every plugin implements the base lifecycle
//!   contract; agents, embedders, and memory providers implement the
//!   specialized contracts and are dispatched by capability tag.
//! - **Dependency order**: manifests declare dependencies; loads happen in
//!   topological order and fail before instantiation on cycles.
//! - **Loose coupling**: components observe each other through bus events
//!   (`plugin.loaded`, `system.config_changed`, …), never direct references.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use lattice::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let runtime = LatticeRuntime::builder()
//!         .config_file("lattice.yaml")
//!         .register_plugin("echo", || PluginInstance::Agent(Arc::new(EchoAgent::default())))
//!         .build();
//!     runtime.run().await
//! }
//! ```

pub use lattice_core::{
    AgentPlugin, BoxError, ConfigSchema, DEFAULT_NAMESPACE, EmbeddingPlugin, Event, EventPriority,
    MemoryPlugin, Plugin, PluginConfig, PluginError, PluginInstance, PluginMetadata, PluginResult,
    PluginState, PluginStatus, PluginType, SchemaField, SchemaType, SearchHit, event_types,
};
pub use lattice_framework::{
    BusStats, ConfigError, ConfigFormat, ConfigManager, ConfigResult, ConfigSource, Dispose,
    EventBus, HandlerId, HandlerOptions, ManifestError, PluginDiscovery, PluginFactory,
    PluginLoader, PluginManager, PluginManifest, ScopedContainer, ServiceContainer, ServiceError,
    ServiceLifetime, ServiceResult, StaticPluginLoader, WatcherId,
};
pub use lattice_runtime::{
    LatticeRuntime, LogFormat, LogOutput, LoggingBuilder, LoggingConfig, RuntimeBuilder,
    RuntimeError, RuntimeResult,
};

/// Commonly used imports for building plugins and hosting the runtime.
pub mod prelude {
    pub use lattice_core::{
        AgentPlugin, BoxError, EmbeddingPlugin, Event, EventPriority, MemoryPlugin, Plugin,
        PluginConfig, PluginInstance, PluginMetadata, PluginState, PluginStatus, PluginType,
        event_types,
    };
    pub use lattice_framework::{
        EventBus, HandlerOptions, PluginLoader, PluginManager, ServiceContainer,
        StaticPluginLoader,
    };
    pub use lattice_runtime::{LatticeRuntime, RuntimeResult};
    pub use lattice_runtime::tracing::{debug, error, info, trace, warn};
}
