//! In-memory storage plugin for Lattice.
//!
//! Provides the `memory-store` plugin: a namespaced key-value store held
//! entirely in process memory, with a naive substring search. Useful as a
//! memory provider for demos and tests; anything that should survive a
//! restart belongs in a real storage engine behind the same contract.
//!
//! Configure the capacity via the `plugins.memory-store` section:
//!
//! ```yaml
//! plugins:
//!   memory-store:
//!     max_entries: 4096
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use lattice::prelude::*;
use lattice::{BoxError, ConfigSchema, SchemaField, SchemaType, SearchHit};

const DEFAULT_MAX_ENTRIES: usize = 1024;

struct Record {
    key: String,
    value: Value,
}

/// A [`MemoryPlugin`] backed by an in-process map of namespaces.
pub struct MemoryStorePlugin {
    meta: PluginMetadata,
    state: PluginState,
    namespaces: RwLock<HashMap<String, HashMap<String, Record>>>,
    max_entries: RwLock<usize>,
    next_id: AtomicU64,
}

impl Default for MemoryStorePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorePlugin {
    /// Creates the plugin with its default capacity.
    pub fn new() -> Self {
        let mut schema = ConfigSchema::new();
        schema.insert(
            "max_entries".to_string(),
            SchemaField {
                value_type: Some(SchemaType::Integer),
                default: Some(Value::from(DEFAULT_MAX_ENTRIES)),
                description: "Maximum records kept across all namespaces".to_string(),
                ..Default::default()
            },
        );

        Self {
            meta: PluginMetadata::new("memory-store", "0.1.0", PluginType::Memory)
                .with_description("In-memory namespaced key-value store")
                .with_config_schema(schema),
            state: PluginState::new(),
            namespaces: RwLock::new(HashMap::new()),
            max_entries: RwLock::new(DEFAULT_MAX_ENTRIES),
            next_id: AtomicU64::new(0),
        }
    }

    /// A factory suitable for loader registration.
    pub fn instance() -> PluginInstance {
        PluginInstance::Memory(std::sync::Arc::new(Self::new()))
    }

    fn total_entries(&self) -> usize {
        self.namespaces.read().values().map(HashMap::len).sum()
    }
}

#[async_trait]
impl Plugin for MemoryStorePlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.meta
    }

    fn state(&self) -> &PluginState {
        &self.state
    }

    async fn on_initialize(&self, config: &PluginConfig) -> Result<(), BoxError> {
        if let Some(max) = config.get("max_entries").and_then(Value::as_u64) {
            *self.max_entries.write() = max as usize;
        }
        Ok(())
    }

    async fn on_start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), BoxError> {
        let dropped = self.total_entries();
        self.namespaces.write().clear();
        debug!(records = dropped, "Memory store cleared");
        Ok(())
    }
}

#[async_trait]
impl MemoryPlugin for MemoryStorePlugin {
    async fn store(&self, key: &str, value: Value, namespace: &str) -> Result<String, BoxError> {
        if self.total_entries() >= *self.max_entries.read() {
            return Err(format!("memory store is full ({} records)", self.total_entries()).into());
        }

        let id = format!("{namespace}-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.namespaces.write().entry(namespace.to_string()).or_default().insert(
            id.clone(),
            Record {
                key: key.to_string(),
                value,
            },
        );
        Ok(id)
    }

    async fn retrieve(&self, id: &str, namespace: &str) -> Result<Option<Value>, BoxError> {
        Ok(self
            .namespaces
            .read()
            .get(namespace)
            .and_then(|records| records.get(id))
            .map(|record| record.value.clone()))
    }

    async fn search(
        &self,
        query: &str,
        namespace: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, BoxError> {
        let query = query.to_lowercase();
        let namespaces = self.namespaces.read();
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        // Substring match over the key and the rendered value; score by how
        // much of the haystack the query covers.
        let mut hits: Vec<SearchHit> = records
            .iter()
            .filter_map(|(id, record)| {
                let haystack = format!("{} {}", record.key, record.value).to_lowercase();
                haystack.contains(&query).then(|| SearchHit {
                    id: id.clone(),
                    content: record.value.clone(),
                    score: query.len() as f32 / haystack.len().max(1) as f32,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, id: &str, namespace: &str) -> Result<bool, BoxError> {
        Ok(self
            .namespaces
            .write()
            .get_mut(namespace)
            .and_then(|records| records.remove(id))
            .is_some())
    }

    async fn namespaces(&self) -> Result<Vec<String>, BoxError> {
        Ok(self.namespaces.read().keys().cloned().collect())
    }
}
