//! Plugin implementation loading.
//!
//! Obtaining "version N+1" of a plugin implementation is platform-specific
//! (recompiled binary, dynamically loaded library, plugin-process restart),
//! so it is abstracted behind [`PluginLoader`]: load an implementation by
//! entry-point key, atomically swap to the newest registered version on
//! reload.
//!
//! [`StaticPluginLoader`] is the in-process implementation: entry points map
//! to registered factory closures, each key keeping a version stack.
//! Registering a factory for an existing key pushes version N+1 without
//! disturbing the running version; `reload` activates the newest.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use lattice_core::{PluginError, PluginInstance, PluginResult};

/// Factory producing a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> PluginInstance + Send + Sync>;

/// Resolves entry-point keys to plugin implementations.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Instantiates the active implementation registered under `entry_point`.
    async fn load(&self, entry_point: &str) -> PluginResult<PluginInstance>;

    /// Swaps the active implementation to the newest available version.
    /// Subsequent [`load`](PluginLoader::load) calls produce the new version.
    async fn reload(&self, entry_point: &str) -> PluginResult<()>;

    /// Whether an implementation is registered under `entry_point`.
    async fn contains(&self, entry_point: &str) -> bool;
}

struct FactoryVersions {
    versions: Vec<PluginFactory>,
    /// Index of the version `load` instantiates.
    active: usize,
}

/// In-process [`PluginLoader`] backed by registered factory closures.
#[derive(Default)]
pub struct StaticPluginLoader {
    factories: RwLock<HashMap<String, FactoryVersions>>,
}

impl StaticPluginLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `entry_point`.
    ///
    /// The first registration becomes active immediately. Later
    /// registrations stack as newer versions that take effect at the next
    /// [`reload`](PluginLoader::reload) of the entry point.
    pub fn register<F>(&self, entry_point: impl Into<String>, factory: F)
    where
        F: Fn() -> PluginInstance + Send + Sync + 'static,
    {
        let entry_point = entry_point.into();
        let mut factories = self.factories.write();
        let slot = factories
            .entry(entry_point.clone())
            .or_insert_with(|| FactoryVersions {
                versions: Vec::new(),
                active: 0,
            });
        slot.versions.push(Arc::new(factory));
        debug!(
            entry_point = %entry_point,
            versions = slot.versions.len(),
            "Plugin factory registered"
        );
    }
}

#[async_trait]
impl PluginLoader for StaticPluginLoader {
    async fn load(&self, entry_point: &str) -> PluginResult<PluginInstance> {
        let factories = self.factories.read();
        let slot = factories
            .get(entry_point)
            .ok_or_else(|| PluginError::NotFound {
                plugin: entry_point.to_string(),
            })?;
        let factory = slot
            .versions
            .get(slot.active)
            .or_else(|| slot.versions.last())
            .ok_or_else(|| PluginError::NotFound {
                plugin: entry_point.to_string(),
            })?
            .clone();
        drop(factories);
        Ok(factory())
    }

    async fn reload(&self, entry_point: &str) -> PluginResult<()> {
        let mut factories = self.factories.write();
        let slot = factories
            .get_mut(entry_point)
            .ok_or_else(|| PluginError::NotFound {
                plugin: entry_point.to_string(),
            })?;
        let newest = slot.versions.len().saturating_sub(1);
        if slot.active != newest {
            info!(
                entry_point = %entry_point,
                version = newest + 1,
                "Activated newer plugin implementation"
            );
        }
        slot.active = newest;
        Ok(())
    }

    async fn contains(&self, entry_point: &str) -> bool {
        self.factories.read().contains_key(entry_point)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lattice_core::{
        BoxError, Plugin, PluginConfig, PluginMetadata, PluginState, PluginType,
    };

    struct Versioned {
        meta: PluginMetadata,
        state: PluginState,
    }

    #[async_trait]
    impl Plugin for Versioned {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }
        fn state(&self) -> &PluginState {
            &self.state
        }
        async fn on_initialize(&self, _config: &PluginConfig) -> Result<(), BoxError> {
            Ok(())
        }
        async fn on_start(&self) -> Result<(), BoxError> {
            Ok(())
        }
        async fn on_stop(&self) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn factory_for(version: &'static str) -> impl Fn() -> PluginInstance {
        move || {
            PluginInstance::Extension(Arc::new(Versioned {
                meta: PluginMetadata::new("versioned", version, PluginType::Extension),
                state: PluginState::new(),
            }))
        }
    }

    #[tokio::test]
    async fn missing_entry_point_is_not_found() {
        let loader = StaticPluginLoader::new();
        assert!(!loader.contains("ghost").await);
        assert!(matches!(
            loader.load("ghost").await.unwrap_err(),
            PluginError::NotFound { .. }
        ));
        assert!(loader.reload("ghost").await.is_err());
    }

    #[tokio::test]
    async fn reload_activates_the_newest_version() {
        let loader = StaticPluginLoader::new();
        loader.register("versioned", factory_for("1.0.0"));

        let v1 = loader.load("versioned").await.unwrap();
        assert_eq!(v1.as_plugin().metadata().version, "1.0.0");

        // A newer registration does not disturb the active version…
        loader.register("versioned", factory_for("2.0.0"));
        let still_v1 = loader.load("versioned").await.unwrap();
        assert_eq!(still_v1.as_plugin().metadata().version, "1.0.0");

        // …until reload swaps it in.
        loader.reload("versioned").await.unwrap();
        let v2 = loader.load("versioned").await.unwrap();
        assert_eq!(v2.as_plugin().metadata().version, "2.0.0");
    }
}
