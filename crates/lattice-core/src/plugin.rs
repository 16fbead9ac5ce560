//! Capability contracts implemented by every plugin.
//!
//! [`Plugin`] is the base lifecycle contract. Implementations provide the
//! `on_*` hooks and embed a [`PluginState`]; the provided lifecycle drivers
//! (`initialize`, `start`, `stop`, `health_check`, `reload`) own the status
//! transitions, configuration validation, and error mapping, so every plugin
//! moves through the same state machine without re-implementing it.
//!
//! Three specialized contracts extend the base: [`AgentPlugin`],
//! [`EmbeddingPlugin`], and [`MemoryPlugin`]. A live plugin is carried as a
//! [`PluginInstance`] — a tagged union whose variant mirrors
//! [`PluginMetadata::plugin_type`], so capability dispatch is a `match`
//! rather than downcast probing.
//!
//! # Example
//!
//! ```rust,ignore
//! struct EchoAgent {
//!     meta: PluginMetadata,
//!     state: PluginState,
//! }
//!
//! #[async_trait]
//! impl Plugin for EchoAgent {
//!     fn metadata(&self) -> &PluginMetadata { &self.meta }
//!     fn state(&self) -> &PluginState { &self.state }
//!     async fn on_initialize(&self, _config: &PluginConfig) -> Result<(), BoxError> { Ok(()) }
//!     async fn on_start(&self) -> Result<(), BoxError> { Ok(()) }
//!     async fn on_stop(&self) -> Result<(), BoxError> { Ok(()) }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{BoxError, PluginError, PluginResult};
use crate::metadata::{PluginConfig, PluginMetadata, PluginStatus, PluginType, validate_config};

/// Namespace used by memory operations when the caller has no better choice.
pub const DEFAULT_NAMESPACE: &str = "default";

// =============================================================================
// PluginState
// =============================================================================

/// Mutable lifecycle state embedded in every plugin implementation.
///
/// Owns the current [`PluginStatus`] and a copy of the configuration the
/// plugin was last initialized with. Both are only written by the provided
/// lifecycle drivers on [`Plugin`].
#[derive(Debug, Default)]
pub struct PluginState {
    status: Mutex<PluginStatus>,
    config: Mutex<PluginConfig>,
}

impl PluginState {
    /// Creates state in the `Inactive` status with an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> PluginStatus {
        *self.status.lock()
    }

    /// Replaces the lifecycle status.
    pub fn set_status(&self, status: PluginStatus) {
        *self.status.lock() = status;
    }

    /// Copy of the configuration the plugin was initialized with.
    pub fn config(&self) -> PluginConfig {
        self.config.lock().clone()
    }

    /// Stores the resolved configuration.
    pub fn set_config(&self, config: PluginConfig) {
        *self.config.lock() = config;
    }
}

// =============================================================================
// Plugin — base lifecycle contract
// =============================================================================

/// Base contract implemented by every plugin.
///
/// Implementations supply [`metadata`](Plugin::metadata), an embedded
/// [`PluginState`], and the `on_*` hooks; the lifecycle drivers are provided
/// and must not be overridden — they enforce the status state machine:
///
/// ```text
/// Inactive ──initialize──► Loading ──start──► Active ──stop──► Stopping ──► Stopped
///     any step failure ──► Error
/// ```
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Immutable plugin identity.
    fn metadata(&self) -> &PluginMetadata;

    /// Lifecycle state owned by this instance.
    fn state(&self) -> &PluginState;

    /// Plugin-specific initialization. Runs after schema validation.
    async fn on_initialize(&self, config: &PluginConfig) -> Result<(), BoxError>;

    /// Plugin-specific startup.
    async fn on_start(&self) -> Result<(), BoxError>;

    /// Plugin-specific shutdown.
    async fn on_stop(&self) -> Result<(), BoxError>;

    /// Plugin-specific health probe. Defaults to healthy.
    async fn on_health_check(&self) -> Result<bool, BoxError> {
        Ok(true)
    }

    /// Plugin-specific refresh performed between stop and re-initialize
    /// during [`reload`](Plugin::reload).
    async fn on_reload(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Current lifecycle status.
    fn status(&self) -> PluginStatus {
        self.state().status()
    }

    /// Copy of the resolved configuration.
    fn config(&self) -> PluginConfig {
        self.state().config()
    }

    /// Validates `config` against the metadata schema and runs
    /// [`on_initialize`](Plugin::on_initialize).
    ///
    /// Moves the plugin into `Loading` on success and `Error` on failure.
    async fn initialize(&self, config: PluginConfig) -> PluginResult<()> {
        let name = &self.metadata().name;
        self.state().set_status(PluginStatus::Loading);
        self.state().set_config(config.clone());

        if let Err(e) = validate_config(name, &self.metadata().config_schema, &config) {
            self.state().set_status(PluginStatus::Error);
            error!(plugin = %name, error = %e, "Plugin configuration rejected");
            return Err(e);
        }

        match self.on_initialize(&config).await {
            Ok(()) => {
                info!(plugin = %name, "Plugin initialized");
                Ok(())
            }
            Err(e) => {
                self.state().set_status(PluginStatus::Error);
                error!(plugin = %name, error = %e, "Plugin initialization failed");
                Err(PluginError::Init {
                    plugin: name.clone(),
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Runs [`on_start`](Plugin::on_start) and moves the plugin to `Active`.
    ///
    /// Calling `start` on a plugin that is not `Loading` is a contract
    /// violation by the caller; the plugin is moved to `Error` and a startup
    /// error is returned.
    async fn start(&self) -> PluginResult<()> {
        let name = &self.metadata().name;
        if self.status() != PluginStatus::Loading {
            self.state().set_status(PluginStatus::Error);
            return Err(PluginError::Startup {
                plugin: name.clone(),
                cause: "plugin must be initialized before starting".to_string(),
            });
        }

        match self.on_start().await {
            Ok(()) => {
                self.state().set_status(PluginStatus::Active);
                info!(plugin = %name, "Plugin started");
                Ok(())
            }
            Err(e) => {
                self.state().set_status(PluginStatus::Error);
                error!(plugin = %name, error = %e, "Plugin start failed");
                Err(PluginError::Startup {
                    plugin: name.clone(),
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Runs [`on_stop`](Plugin::on_stop), moving through `Stopping` to
    /// `Stopped`.
    async fn stop(&self) -> PluginResult<()> {
        let name = &self.metadata().name;
        self.state().set_status(PluginStatus::Stopping);

        match self.on_stop().await {
            Ok(()) => {
                self.state().set_status(PluginStatus::Stopped);
                info!(plugin = %name, "Plugin stopped");
                Ok(())
            }
            Err(e) => {
                self.state().set_status(PluginStatus::Error);
                error!(plugin = %name, error = %e, "Plugin stop failed");
                Err(PluginError::Shutdown {
                    plugin: name.clone(),
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Probes plugin health. Never fails: a plugin that is not `Active`, or
    /// whose probe errors, reports unhealthy.
    async fn health_check(&self) -> bool {
        if self.status() != PluginStatus::Active {
            return false;
        }
        match self.on_health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(plugin = %self.metadata().name, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Hot-reloads the plugin: stop → [`on_reload`](Plugin::on_reload) →
    /// re-initialize with the saved configuration → start.
    ///
    /// Rejected unless the metadata advertises hot-reload support. There is
    /// no rollback: if any step fails the plugin is left in `Error`.
    async fn reload(&self) -> PluginResult<()> {
        let name = &self.metadata().name;
        if !self.metadata().hot_reload {
            return Err(PluginError::HotReload {
                plugin: name.clone(),
                message: "plugin does not support hot-reload".to_string(),
            });
        }

        info!(plugin = %name, "Reloading plugin");
        self.stop().await?;

        if let Err(e) = self.on_reload().await {
            self.state().set_status(PluginStatus::Error);
            error!(plugin = %name, error = %e, "Plugin reload hook failed");
            return Err(PluginError::HotReload {
                plugin: name.clone(),
                message: e.to_string(),
            });
        }

        let config = self.config();
        self.initialize(config).await?;
        self.start().await?;
        info!(plugin = %name, "Plugin reloaded");
        Ok(())
    }
}

// =============================================================================
// Specialized capability contracts
// =============================================================================

/// Contract for conversational agent plugins.
#[async_trait]
pub trait AgentPlugin: Plugin {
    /// Memory namespace isolating this agent's stored data.
    fn memory_namespace(&self) -> &str;

    /// Processes one message and returns the agent's response.
    async fn process_message(&self, message: &str, context: &Value) -> Result<String, BoxError>;

    /// Capability labels advertised by this agent.
    async fn capabilities(&self) -> Result<Vec<String>, BoxError>;
}

/// Contract for text embedding plugins.
#[async_trait]
pub trait EmbeddingPlugin: Plugin {
    /// Dimension of the produced vectors.
    fn dimension(&self) -> usize;

    /// Maximum accepted input length, in characters.
    fn max_input_length(&self) -> usize;

    /// Embeds a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, BoxError>;

    /// Embeds a batch of texts. The default implementation embeds each text
    /// sequentially through [`embed_text`](EmbeddingPlugin::embed_text).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BoxError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed_text(text).await?);
        }
        Ok(vectors)
    }
}

/// One result from [`MemoryPlugin::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Storage id of the matching record.
    pub id: String,
    /// Stored content.
    pub content: Value,
    /// Similarity score, higher is closer.
    pub score: f32,
}

/// Contract for namespaced storage plugins.
///
/// All operations are namespaced by a caller-supplied string; callers with
/// no namespace of their own pass [`DEFAULT_NAMESPACE`].
#[async_trait]
pub trait MemoryPlugin: Plugin {
    /// Stores `value` under `key` and returns the storage id.
    async fn store(&self, key: &str, value: Value, namespace: &str) -> Result<String, BoxError>;

    /// Retrieves a record by storage id, or `None` if absent.
    async fn retrieve(&self, id: &str, namespace: &str) -> Result<Option<Value>, BoxError>;

    /// Searches for content similar to `query`.
    async fn search(
        &self,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, BoxError>;

    /// Deletes a record; returns whether it existed.
    async fn delete(&self, id: &str, namespace: &str) -> Result<bool, BoxError>;

    /// Namespaces known to this provider.
    async fn namespaces(&self) -> Result<Vec<String>, BoxError> {
        Ok(vec![DEFAULT_NAMESPACE.to_string()])
    }
}

// =============================================================================
// PluginInstance — capability-tagged live plugin
// =============================================================================

/// A live plugin carried under its capability tag.
///
/// The variant always matches [`PluginMetadata::plugin_type`]; registries and
/// the manager dispatch on the variant instead of probing trait objects.
/// `Middleware` and `Extension` plugins satisfy only the base contract.
#[derive(Clone)]
pub enum PluginInstance {
    /// An agent plugin.
    Agent(Arc<dyn AgentPlugin>),
    /// An embedding plugin.
    Embedding(Arc<dyn EmbeddingPlugin>),
    /// A memory plugin.
    Memory(Arc<dyn MemoryPlugin>),
    /// Middleware satisfying only the base contract.
    Middleware(Arc<dyn Plugin>),
    /// An extension satisfying only the base contract.
    Extension(Arc<dyn Plugin>),
}

impl PluginInstance {
    /// The plugin viewed through the base lifecycle contract.
    pub fn as_plugin(&self) -> Arc<dyn Plugin> {
        match self {
            Self::Agent(p) => p.clone(),
            Self::Embedding(p) => p.clone(),
            Self::Memory(p) => p.clone(),
            Self::Middleware(p) | Self::Extension(p) => p.clone(),
        }
    }

    /// Capability tag of this instance.
    pub fn capability(&self) -> PluginType {
        match self {
            Self::Agent(_) => PluginType::Agent,
            Self::Embedding(_) => PluginType::Embedding,
            Self::Memory(_) => PluginType::Memory,
            Self::Middleware(_) => PluginType::Middleware,
            Self::Extension(_) => PluginType::Extension,
        }
    }

    /// Plugin name, from the metadata.
    pub fn name(&self) -> String {
        self.as_plugin().metadata().name.clone()
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let plugin = self.as_plugin();
        f.debug_struct("PluginInstance")
            .field("name", &plugin.metadata().name)
            .field("capability", &self.capability())
            .field("status", &plugin.status())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
