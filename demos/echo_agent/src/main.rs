//! Echo Agent Example
//!
//! A small demonstration of the Lattice runtime: two plugins (an agent and a
//! memory provider) are discovered from bundled manifests, loaded in
//! dependency order, and exercised through the capability registries.
//!
//! # Plugins
//!
//! ```text
//! demos/echo_agent/plugins/
//! ├── echo/plugin.yaml          agent, depends on memory-store
//! └── memory_store/plugin.yaml  memory provider
//! ```
//!
//! The echo agent's greeting comes from the `plugins.echo` configuration
//! section in `lattice.yaml`; change it while the process runs and the file
//! watcher picks it up.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-agent   # from the repository root
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};

use lattice::prelude::*;
use lattice::{BoxError, ConfigSchema, HandlerOptions, SchemaField, SchemaType};
use lattice_plugin_memory_store::MemoryStorePlugin;

// ============================================================================
// EchoAgent
// ============================================================================

/// An agent that replies with a configured greeting prefix.
struct EchoAgent {
    meta: PluginMetadata,
    state: PluginState,
    greeting: RwLock<String>,
}

impl EchoAgent {
    fn new() -> Self {
        let mut schema = ConfigSchema::new();
        schema.insert(
            "greeting".to_string(),
            SchemaField {
                value_type: Some(SchemaType::String),
                default: Some(json!("echo")),
                description: "Prefix applied to every reply".to_string(),
                ..Default::default()
            },
        );

        Self {
            meta: PluginMetadata::new("echo", "0.1.0", PluginType::Agent)
                .with_description("Replies with a configured greeting prefix")
                .with_dependencies(vec!["memory-store".to_string()])
                .with_config_schema(schema),
            state: PluginState::new(),
            greeting: RwLock::new("echo".to_string()),
        }
    }

    fn instance() -> PluginInstance {
        PluginInstance::Agent(Arc::new(Self::new()))
    }
}

#[async_trait]
impl Plugin for EchoAgent {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn state(&self) -> &PluginState {
        &self.state
    }

    async fn on_initialize(&self, config: &PluginConfig) -> Result<(), BoxError> {
        if let Some(greeting) = config.get("greeting").and_then(Value::as_str) {
            *self.greeting.write() = greeting.to_string();
        }
        Ok(())
    }

    async fn on_start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[async_trait]
impl AgentPlugin for EchoAgent {
    fn memory_namespace(&self) -> &str {
        "echo-agent"
    }

    async fn process_message(&self, message: &str, _context: &Value) -> Result<String, BoxError> {
        Ok(format!("{}: {}", self.greeting.read(), message))
    }

    async fn capabilities(&self) -> Result<Vec<String>, BoxError> {
        Ok(vec!["echo".to_string()])
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let runtime = LatticeRuntime::builder()
        .config_file("demos/echo_agent/lattice.yaml")
        .register_plugin("echo", EchoAgent::instance)
        .register_plugin("memory-store", MemoryStorePlugin::instance)
        .build();

    // Observe lifecycle events the way an external layer would.
    runtime.bus().subscribe_global(HandlerOptions::new(), |event| async move {
        info!(event_type = %event.event_type, plugin = ?event.plugin(), "bus event");
        Ok(())
    });

    runtime.initialize().await?;
    let manager = runtime.manager();

    // Talk to the agent through its capability registry entry.
    let agent = manager
        .agents()
        .get("echo")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("echo agent not loaded"))?;
    for message in ["hello there", "how are you?"] {
        let reply = agent
            .process_message(message, &Value::Null)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        info!(reply = %reply, "agent replied");
    }

    // Remember the conversation through the memory provider.
    let store = manager
        .memory_providers()
        .get("memory-store")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("memory store not loaded"))?;
    let namespace = agent.memory_namespace();
    store
        .store("conversation", json!({"last_reply": "hello there"}), namespace)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let hits = store
        .search("hello", namespace, 5)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!(hits = hits.len(), "memory search complete");

    runtime.shutdown().await;
    Ok(())
}
