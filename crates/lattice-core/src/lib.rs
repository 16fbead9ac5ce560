//! # Lattice Core
//!
//! Core contracts for the Lattice plugin runtime.
//!
//! This crate defines the pieces every other layer builds on:
//! - The base lifecycle contract ([`Plugin`]) and the specialized capability
//!   contracts ([`AgentPlugin`], [`EmbeddingPlugin`], [`MemoryPlugin`]).
//! - Plugin identity and the configuration schema ([`PluginMetadata`],
//!   [`ConfigSchema`]).
//! - The event model shared by the bus and the manager ([`Event`],
//!   [`EventPriority`], [`event_types`]).
//! - The plugin error kinds ([`PluginError`]).
//!
//! It has no dependency on the framework components; the framework depends
//! on it.

pub mod error;
pub mod event;
pub mod metadata;
pub mod plugin;

pub use error::{BoxError, PluginError, PluginResult};
pub use event::{Event, EventPriority, event_types};
pub use metadata::{
    ConfigSchema, PluginConfig, PluginMetadata, PluginStatus, PluginType, SchemaField, SchemaType,
    validate_config,
};
pub use plugin::{
    AgentPlugin, DEFAULT_NAMESPACE, EmbeddingPlugin, MemoryPlugin, Plugin, PluginInstance,
    PluginState, SearchHit,
};
