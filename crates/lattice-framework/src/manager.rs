//! Plugin lifecycle orchestration.
//!
//! [`PluginManager`] is the central owner of all loaded plugins. It:
//!
//! - Drives [`PluginDiscovery`](crate::discovery::PluginDiscovery) to find
//!   manifests and computes dependency load order before anything is
//!   instantiated.
//! - Walks every plugin through the lifecycle state machine, publishing
//!   `plugin.loading` / `plugin.starting` / `plugin.started` /
//!   `plugin.loaded` (and the stopping/stopped mirror) on the event bus.
//! - Registers loaded instances into the [`ServiceContainer`] under their
//!   capability trait object type, and into a capability-keyed registry
//!   (agents / embeddings / memory providers) matched on the
//!   [`PluginInstance`] tag.
//! - Cleans up partial state when a load fails midway, and re-raises the
//!   failure as a load error naming the plugin and cause.
//! - Runs a periodic health-check loop publishing aggregate
//!   `plugin.health_check` events until shutdown cancels it.
//!
//! Batch loads are not transactional: when one plugin in a
//! [`load_plugins`](PluginManager::load_plugins) batch fails, plugins loaded
//! earlier in the same batch stay active and the error propagates.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lattice_core::{
    AgentPlugin, EmbeddingPlugin, Event, MemoryPlugin, Plugin, PluginConfig, PluginError,
    PluginInstance, PluginResult, PluginStatus, PluginType, event_types,
};

use crate::bus::EventBus;
use crate::config::ConfigManager;
use crate::container::ServiceContainer;
use crate::discovery::{PluginDiscovery, PluginLoader, PluginManifest};

/// Source identifier stamped on every event the manager publishes.
const EVENT_SOURCE: &str = "plugin-manager";

/// Pause before the health loop retries after an unexpected failure.
const HEALTH_RETRY_BACKOFF: Duration = Duration::from_secs(5);

// =============================================================================
// PluginManager
// =============================================================================

/// Central plugin management: discovery, lifecycle, registries, health.
pub struct PluginManager {
    container: Arc<ServiceContainer>,
    bus: Arc<EventBus>,
    config: Arc<ConfigManager>,
    discovery: tokio::sync::RwLock<PluginDiscovery>,

    plugins: tokio::sync::RwLock<HashMap<String, PluginInstance>>,
    load_order: Mutex<Vec<String>>,

    agents: RwLock<HashMap<String, Arc<dyn AgentPlugin>>>,
    embeddings: RwLock<HashMap<String, Arc<dyn EmbeddingPlugin>>>,
    memory_providers: RwLock<HashMap<String, Arc<dyn MemoryPlugin>>>,

    shutdown_initiated: AtomicBool,
    health_task: Mutex<Option<JoinHandle<()>>>,
    health_token: CancellationToken,
}

impl PluginManager {
    /// Creates a manager wired to the given container, bus, configuration,
    /// and implementation loader.
    pub fn new(
        container: Arc<ServiceContainer>,
        bus: Arc<EventBus>,
        config: Arc<ConfigManager>,
        loader: Arc<dyn PluginLoader>,
    ) -> Self {
        Self {
            container,
            bus,
            config,
            discovery: tokio::sync::RwLock::new(PluginDiscovery::new(loader)),
            plugins: tokio::sync::RwLock::new(HashMap::new()),
            load_order: Mutex::new(Vec::new()),
            agents: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(HashMap::new()),
            memory_providers: RwLock::new(HashMap::new()),
            shutdown_initiated: AtomicBool::new(false),
            health_task: Mutex::new(None),
            health_token: CancellationToken::new(),
        }
    }

    /// Discovers plugins on the configured paths, auto-loads them when
    /// `plugins.auto_load` is set, and starts health monitoring when
    /// `plugins.health_monitoring` is set.
    pub async fn initialize(self: &Arc<Self>) -> PluginResult<()> {
        info!("Initializing plugin manager");

        let discovered = self.discover_plugins(None).await?;

        if self
            .config
            .get_or("plugins.auto_load", json!(true))
            .as_bool()
            .unwrap_or(true)
        {
            let names: Vec<String> = discovered.keys().cloned().collect();
            self.load_plugins(&names).await?;
        }

        if self
            .config
            .get_or("plugins.health_monitoring", json!(true))
            .as_bool()
            .unwrap_or(true)
        {
            self.start_health_monitoring();
        }

        info!("Plugin manager initialization complete");
        Ok(())
    }

    /// Scans for plugin manifests. `paths` defaults to
    /// `plugins.discovery_paths` from the configuration.
    pub async fn discover_plugins(
        &self,
        paths: Option<Vec<PathBuf>>,
    ) -> PluginResult<BTreeMap<String, PluginManifest>> {
        let paths = paths.unwrap_or_else(|| self.configured_discovery_paths());
        let mut discovery = self.discovery.write().await;
        Ok(discovery.discover(&paths).await)
    }

    fn configured_discovery_paths(&self) -> Vec<PathBuf> {
        self.config
            .get("plugins.discovery_paths")
            .and_then(|v| {
                v.as_array().map(|paths| {
                    paths
                        .iter()
                        .filter_map(|p| p.as_str().map(PathBuf::from))
                        .collect::<Vec<_>>()
                })
            })
            .unwrap_or_else(|| vec![PathBuf::from("./plugins")])
    }

    /// Loads `names` and their dependencies in topological order.
    ///
    /// The order is resolved before any load; a cycle or missing dependency
    /// fails the whole batch up front. A failure while loading one plugin
    /// aborts the remainder of the batch; plugins already loaded stay loaded.
    pub async fn load_plugins(&self, names: &[String]) -> PluginResult<()> {
        let order = self.discovery.read().await.resolve_dependencies(names)?;
        info!(order = ?order, "Loading plugins in dependency order");

        for name in &order {
            let already_loaded = self.plugins.read().await.contains_key(name);
            if !already_loaded {
                self.load_plugin(name).await?;
            }
        }

        info!(count = order.len(), "Plugin batch loaded");
        Ok(())
    }

    /// Loads a single plugin by name: instantiate, initialize with its
    /// effective configuration, register, start.
    ///
    /// Any failure cleans up partial state, publishes `plugin.error`, and is
    /// returned as [`PluginError::Load`] naming the plugin and cause.
    pub async fn load_plugin(&self, name: &str) -> PluginResult<PluginInstance> {
        if self.plugins.read().await.contains_key(name) {
            return Err(PluginError::AlreadyLoaded {
                plugin: name.to_string(),
            });
        }

        match self.try_load(name).await {
            Ok(instance) => {
                let version = instance.as_plugin().metadata().version.clone();
                self.bus
                    .publish(
                        Event::for_plugin(event_types::PLUGIN_LOADED, name)
                            .with_metadata("version", Value::String(version))
                            .with_source(EVENT_SOURCE),
                    )
                    .await;
                info!(plugin = %name, "Plugin loaded");
                Ok(instance)
            }
            Err(e) => {
                self.bus
                    .publish(
                        Event::for_plugin(event_types::PLUGIN_ERROR, name)
                            .with_data(json!({"error": e.to_string()}))
                            .with_source(EVENT_SOURCE),
                    )
                    .await;
                self.cleanup_failed_plugin(name).await;
                error!(plugin = %name, error = %e, "Failed to load plugin");
                Err(PluginError::Load {
                    plugin: name.to_string(),
                    cause: e.to_string(),
                })
            }
        }
    }

    async fn try_load(&self, name: &str) -> PluginResult<PluginInstance> {
        self.bus
            .publish(Event::for_plugin(event_types::PLUGIN_LOADING, name).with_source(EVENT_SOURCE))
            .await;

        let (instance, manifest) = {
            let discovery = self.discovery.read().await;
            let manifest = discovery
                .manifest(name)
                .cloned()
                .ok_or_else(|| PluginError::NotFound {
                    plugin: name.to_string(),
                })?;
            (discovery.instantiate(name).await?, manifest)
        };

        let effective = self.effective_config(name, &manifest);
        let plugin = instance.as_plugin();
        plugin.initialize(effective).await?;

        self.plugins
            .write()
            .await
            .insert(name.to_string(), instance.clone());
        self.load_order.lock().push(name.to_string());
        self.register_capability(name, &instance);

        self.bus
            .publish(
                Event::for_plugin(event_types::PLUGIN_STARTING, name).with_source(EVENT_SOURCE),
            )
            .await;
        plugin.start().await?;
        self.bus
            .publish(Event::for_plugin(event_types::PLUGIN_STARTED, name).with_source(EVENT_SOURCE))
            .await;

        Ok(instance)
    }

    /// Effective configuration: manifest schema defaults overlaid by the
    /// `plugins.<name>` section of the merged configuration.
    fn effective_config(&self, name: &str, manifest: &PluginManifest) -> PluginConfig {
        let mut config: PluginConfig = self
            .config
            .get(&format!("plugins.{name}"))
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        for (key, field) in &manifest.configuration.schema {
            if !config.contains_key(key)
                && let Some(default) = &field.default
            {
                config.insert(key.clone(), default.clone());
            }
        }
        config
    }

    /// Registers a loaded instance into the container and the registry
    /// matching its capability tag.
    fn register_capability(&self, name: &str, instance: &PluginInstance) {
        match instance {
            PluginInstance::Agent(p) => {
                self.agents.write().insert(name.to_string(), p.clone());
                self.container.register_instance::<dyn AgentPlugin>(p.clone());
            }
            PluginInstance::Embedding(p) => {
                self.embeddings.write().insert(name.to_string(), p.clone());
                self.container
                    .register_instance::<dyn EmbeddingPlugin>(p.clone());
            }
            PluginInstance::Memory(p) => {
                self.memory_providers
                    .write()
                    .insert(name.to_string(), p.clone());
                self.container.register_instance::<dyn MemoryPlugin>(p.clone());
            }
            PluginInstance::Middleware(p) | PluginInstance::Extension(p) => {
                self.container.register_instance::<dyn Plugin>(p.clone());
            }
        }
    }

    fn unregister_capability(&self, name: &str) {
        self.agents.write().remove(name);
        self.embeddings.write().remove(name);
        self.memory_providers.write().remove(name);
    }

    async fn cleanup_failed_plugin(&self, name: &str) {
        self.plugins.write().await.remove(name);
        self.load_order.lock().retain(|n| n != name);
        self.unregister_capability(name);
    }

    /// Stops a loaded plugin and removes it from every registry.
    pub async fn unload_plugin(&self, name: &str) -> PluginResult<()> {
        let instance = self
            .plugins
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                plugin: name.to_string(),
            })?;

        self.bus
            .publish(
                Event::for_plugin(event_types::PLUGIN_STOPPING, name).with_source(EVENT_SOURCE),
            )
            .await;

        if let Err(e) = instance.as_plugin().stop().await {
            self.bus
                .publish(
                    Event::for_plugin(event_types::PLUGIN_ERROR, name)
                        .with_data(json!({"error": e.to_string()}))
                        .with_source(EVENT_SOURCE),
                )
                .await;
            return Err(e);
        }

        self.unregister_capability(name);
        self.plugins.write().await.remove(name);
        self.load_order.lock().retain(|n| n != name);

        self.bus
            .publish(Event::for_plugin(event_types::PLUGIN_STOPPED, name).with_source(EVENT_SOURCE))
            .await;
        info!(plugin = %name, "Plugin unloaded");
        Ok(())
    }

    /// Hot-reloads a plugin: unload, swap the implementation to its newest
    /// version, load again under the same name.
    pub async fn reload_plugin(&self, name: &str) -> PluginResult<PluginInstance> {
        let instance = self
            .plugins
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound {
                plugin: name.to_string(),
            })?;

        if !instance.as_plugin().metadata().hot_reload {
            return Err(PluginError::HotReload {
                plugin: name.to_string(),
                message: "plugin does not support hot-reload".to_string(),
            });
        }

        info!(plugin = %name, "Hot-reloading plugin");
        self.unload_plugin(name).await?;
        self.discovery.read().await.refresh(name).await?;
        self.load_plugin(name).await
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// A loaded plugin by name.
    pub async fn plugin(&self, name: &str) -> Option<PluginInstance> {
        self.plugins.read().await.get(name).cloned()
    }

    /// All loaded plugins of the given capability type.
    pub async fn plugins_by_type(&self, plugin_type: PluginType) -> Vec<PluginInstance> {
        self.plugins
            .read()
            .await
            .values()
            .filter(|p| p.capability() == plugin_type)
            .cloned()
            .collect()
    }

    /// All loaded agent plugins, by name.
    pub fn agents(&self) -> HashMap<String, Arc<dyn AgentPlugin>> {
        self.agents.read().clone()
    }

    /// All loaded embedding plugins, by name.
    pub fn embeddings(&self) -> HashMap<String, Arc<dyn EmbeddingPlugin>> {
        self.embeddings.read().clone()
    }

    /// All loaded memory provider plugins, by name.
    pub fn memory_providers(&self) -> HashMap<String, Arc<dyn MemoryPlugin>> {
        self.memory_providers.read().clone()
    }

    /// Snapshot of every loaded plugin, by name.
    pub async fn loaded_plugins(&self) -> HashMap<String, PluginInstance> {
        self.plugins.read().await.clone()
    }

    /// Lifecycle status of a loaded plugin.
    pub async fn plugin_status(&self, name: &str) -> Option<PluginStatus> {
        self.plugins
            .read()
            .await
            .get(name)
            .map(|p| p.as_plugin().status())
    }

    /// Probes every loaded plugin. Individual failures report as unhealthy;
    /// this never fails as a whole.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let snapshot: Vec<(String, PluginInstance)> = self
            .plugins
            .read()
            .await
            .iter()
            .map(|(n, p)| (n.clone(), p.clone()))
            .collect();

        let mut results = BTreeMap::new();
        for (name, instance) in snapshot {
            results.insert(name, instance.as_plugin().health_check().await);
        }
        results
    }

    // ─── Health monitoring ───────────────────────────────────────────────────

    fn start_health_monitoring(self: &Arc<Self>) {
        let interval = self
            .config
            .get_or("plugins.health_check_interval", json!(30))
            .as_u64()
            .unwrap_or(30);
        let manager = Arc::downgrade(self);
        let token = self.health_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                }

                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if manager.shutdown_initiated.load(Ordering::SeqCst) {
                    break;
                }
                if manager.plugins.read().await.is_empty() {
                    continue;
                }

                // Run the pass in its own task so a panicking health hook
                // cannot kill the monitoring loop.
                let pass = tokio::spawn({
                    let manager = manager.clone();
                    async move { manager.health_pass().await }
                });
                if let Err(e) = pass.await {
                    error!(error = %e, "Health monitoring pass failed");
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(HEALTH_RETRY_BACKOFF) => {}
                    }
                }
            }
        });

        *self.health_task.lock() = Some(handle);
        info!(interval_secs = interval, "Health monitoring started");
    }

    /// One health-monitoring pass: probe every plugin, warn about unhealthy
    /// ones, publish the aggregate results.
    async fn health_pass(&self) {
        let results = self.health_check_all().await;
        let unhealthy: Vec<&str> = results
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| name.as_str())
            .collect();
        if !unhealthy.is_empty() {
            warn!(plugins = ?unhealthy, "Unhealthy plugins detected");
        }

        self.bus
            .publish(
                Event::new(event_types::PLUGIN_HEALTH_CHECK)
                    .with_data(json!({"results": results}))
                    .with_source(EVENT_SOURCE),
            )
            .await;
    }

    // ─── Shutdown ────────────────────────────────────────────────────────────

    /// Stops health monitoring and unloads every plugin in reverse load
    /// order. Per-plugin unload failures are logged and do not block the
    /// remaining plugins. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down plugin manager");

        self.health_token.cancel();
        let health_task = self.health_task.lock().take();
        if let Some(task) = health_task {
            let _ = task.await;
        }

        let order: Vec<String> = {
            let order = self.load_order.lock();
            order.iter().rev().cloned().collect()
        };
        for name in order {
            if let Err(e) = self.unload_plugin(&name).await {
                error!(plugin = %name, error = %e, "Error unloading plugin during shutdown");
            }
        }

        info!("Plugin manager shutdown complete");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lattice_core::{BoxError, PluginMetadata, PluginState};
    use serde_json::json;

    use crate::discovery::StaticPluginLoader;

    struct Ext {
        meta: PluginMetadata,
        state: PluginState,
        fail_init: bool,
    }

    impl Ext {
        fn new(name: &str, version: &str) -> Self {
            Self {
                meta: PluginMetadata::new(name, version, PluginType::Extension),
                state: PluginState::new(),
                fail_init: false,
            }
        }
    }

    #[async_trait]
    impl Plugin for Ext {
        fn metadata(&self) -> &PluginMetadata {
            &self.meta
        }
        fn state(&self) -> &PluginState {
            &self.state
        }
        async fn on_initialize(&self, _config: &PluginConfig) -> Result<(), BoxError> {
            if self.fail_init {
                return Err("init refused".into());
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

    struct EchoAgent {
        meta: PluginMetadata,
        state: PluginState,
    }

    #[async_trait]
    impl Plugin for EchoAgent {
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

    #[async_trait]
    impl AgentPlugin for EchoAgent {
        fn memory_namespace(&self) -> &str {
            "echo-agent"
        }
        async fn process_message(&self, message: &str, _context: &Value) -> Result<String, BoxError> {
            Ok(format!("echo: {message}"))
        }
        async fn capabilities(&self) -> Result<Vec<String>, BoxError> {
            Ok(vec!["echo".to_string()])
        }
    }

    fn write_manifest(dir: &tempfile::TempDir, name: &str, plugin_type: &str, deps: &[&str], schema: Value) {
        let plugin_dir = dir.path().join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let manifest = json!({
            "name": name,
            "version": "1.0.0",
            "type": plugin_type,
            "dependencies": deps,
            "configuration": {"schema": schema},
        });
        std::fs::write(plugin_dir.join("plugin.json"), manifest.to_string()).unwrap();
    }

    struct Harness {
        manager: Arc<PluginManager>,
        bus: Arc<EventBus>,
        config: Arc<ConfigManager>,
        container: Arc<ServiceContainer>,
        loader: Arc<StaticPluginLoader>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir, "alpha", "extension", &[], json!({}));
        write_manifest(&dir, "beta", "extension", &["alpha"], json!({}));
        write_manifest(&dir, "broken", "extension", &[], json!({}));
        write_manifest(&dir, "agent", "agent", &[], json!({}));
        write_manifest(&dir, "frozen", "extension", &[], json!({}));
        write_manifest(&dir, "reloadable", "extension", &[], json!({}));
        write_manifest(
            &dir,
            "cfg",
            "extension",
            &[],
            json!({
                "greeting": {"type": "string", "default": "hi"},
                "limit": {"type": "integer"},
            }),
        );

        let loader = Arc::new(StaticPluginLoader::new());
        loader.register("alpha", || PluginInstance::Extension(Arc::new(Ext::new("alpha", "1.0.0"))));
        loader.register("beta", || PluginInstance::Extension(Arc::new(Ext::new("beta", "1.0.0"))));
        loader.register("broken", || {
            let mut plugin = Ext::new("broken", "1.0.0");
            plugin.fail_init = true;
            PluginInstance::Extension(Arc::new(plugin))
        });
        loader.register("agent", || {
            PluginInstance::Agent(Arc::new(EchoAgent {
                meta: PluginMetadata::new("agent", "1.0.0", PluginType::Agent),
                state: PluginState::new(),
            }))
        });
        loader.register("frozen", || {
            let mut plugin = Ext::new("frozen", "1.0.0");
            plugin.meta = plugin.meta.with_hot_reload(false);
            PluginInstance::Extension(Arc::new(plugin))
        });
        loader.register("reloadable", || {
            PluginInstance::Extension(Arc::new(Ext::new("reloadable", "1.0.0")))
        });
        loader.register("cfg", || PluginInstance::Extension(Arc::new(Ext::new("cfg", "1.0.0"))));

        let bus = Arc::new(EventBus::new());
        let config = Arc::new(ConfigManager::new(None));
        let container = Arc::new(ServiceContainer::new());
        let manager = Arc::new(PluginManager::new(
            container.clone(),
            bus.clone(),
            config.clone(),
            loader.clone(),
        ));
        manager
            .discover_plugins(Some(vec![dir.path().to_path_buf()]))
            .await
            .unwrap();

        Harness {
            manager,
            bus,
            config,
            container,
            loader,
            _dir: dir,
        }
    }

    fn lifecycle_events(bus: &EventBus, kinds: &[&str]) -> Vec<(String, String)> {
        bus.event_history(None, 1000)
            .iter()
            .filter(|e| kinds.contains(&e.event_type.as_str()))
            .map(|e| {
                (
                    e.event_type.clone(),
                    e.plugin().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn dependencies_load_first_with_observable_event_sequence() {
        let h = harness().await;
        h.manager
            .load_plugins(&["beta".to_string()])
            .await
            .unwrap();

        assert_eq!(
            h.manager.plugin_status("alpha").await,
            Some(PluginStatus::Active)
        );
        assert_eq!(
            h.manager.plugin_status("beta").await,
            Some(PluginStatus::Active)
        );

        let sequence = lifecycle_events(
            &h.bus,
            &[event_types::PLUGIN_LOADING, event_types::PLUGIN_LOADED],
        );
        assert_eq!(
            sequence,
            vec![
                ("plugin.loading".to_string(), "alpha".to_string()),
                ("plugin.loaded".to_string(), "alpha".to_string()),
                ("plugin.loading".to_string(), "beta".to_string()),
                ("plugin.loaded".to_string(), "beta".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn loading_an_already_loaded_plugin_is_rejected() {
        let h = harness().await;
        h.manager.load_plugin("alpha").await.unwrap();
        let err = h.manager.load_plugin("alpha").await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded { .. }));
    }

    #[tokio::test]
    async fn failed_initialization_leaves_no_registry_residue() {
        let h = harness().await;
        let err = h.manager.load_plugin("broken").await.unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
        assert!(err.to_string().contains("broken"));

        assert!(h.manager.loaded_plugins().await.is_empty());
        assert!(h.manager.agents().is_empty());
        assert!(h.manager.plugin("broken").await.is_none());
        assert!(
            h.manager
                .plugins_by_type(PluginType::Extension)
                .await
                .is_empty()
        );

        let errors = lifecycle_events(&h.bus, &[event_types::PLUGIN_ERROR]);
        assert_eq!(errors, vec![("plugin.error".to_string(), "broken".to_string())]);
    }

    #[tokio::test]
    async fn a_batch_stops_at_the_first_failure_without_unwinding() {
        let h = harness().await;
        let err = h
            .manager
            .load_plugins(&["alpha".to_string(), "broken".to_string(), "beta".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));

        // alpha loaded before the failure and stays loaded; beta never loads.
        assert_eq!(
            h.manager.plugin_status("alpha").await,
            Some(PluginStatus::Active)
        );
        assert!(h.manager.plugin("broken").await.is_none());
        assert!(h.manager.plugin("beta").await.is_none());
    }

    #[tokio::test]
    async fn unloading_an_unknown_plugin_has_no_side_effects() {
        let h = harness().await;
        let err = h.manager.unload_plugin("ghost").await.unwrap_err();
        assert!(matches!(err, PluginError::NotFound { .. }));
        assert!(lifecycle_events(&h.bus, &[event_types::PLUGIN_STOPPING]).is_empty());
    }

    #[tokio::test]
    async fn agents_land_in_the_typed_registry_and_the_container() {
        let h = harness().await;
        h.manager.load_plugin("agent").await.unwrap();

        assert!(h.manager.agents().contains_key("agent"));
        assert_eq!(h.manager.plugins_by_type(PluginType::Agent).await.len(), 1);

        let resolved = h.container.resolve::<dyn AgentPlugin>().unwrap();
        assert_eq!(
            resolved.process_message("hi", &Value::Null).await.unwrap(),
            "echo: hi"
        );

        h.manager.unload_plugin("agent").await.unwrap();
        assert!(h.manager.agents().is_empty());
        assert!(h.manager.plugin("agent").await.is_none());
    }

    #[tokio::test]
    async fn schema_defaults_underlie_the_configured_section() {
        let h = harness().await;
        h.config.set("plugins.cfg.limit", json!(5));
        let instance = h.manager.load_plugin("cfg").await.unwrap();

        let config = instance.as_plugin().config();
        assert_eq!(config.get("greeting"), Some(&json!("hi")));
        assert_eq!(config.get("limit"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn reload_swaps_in_the_newest_implementation() {
        let h = harness().await;
        let v1 = h.manager.load_plugin("reloadable").await.unwrap();
        assert_eq!(v1.as_plugin().metadata().version, "1.0.0");

        h.loader.register("reloadable", || {
            PluginInstance::Extension(Arc::new(Ext::new("reloadable", "2.0.0")))
        });

        let v2 = h.manager.reload_plugin("reloadable").await.unwrap();
        assert_eq!(v2.as_plugin().metadata().version, "2.0.0");
        assert_eq!(
            h.manager.plugin_status("reloadable").await,
            Some(PluginStatus::Active)
        );
    }

    #[tokio::test]
    async fn reload_requires_hot_reload_support() {
        let h = harness().await;
        h.manager.load_plugin("frozen").await.unwrap();
        let err = h.manager.reload_plugin("frozen").await.unwrap_err();
        assert!(matches!(err, PluginError::HotReload { .. }));
        // The plugin was not disturbed.
        assert_eq!(
            h.manager.plugin_status("frozen").await,
            Some(PluginStatus::Active)
        );
    }

    #[tokio::test]
    async fn shutdown_unloads_in_reverse_load_order() {
        let h = harness().await;
        h.manager
            .load_plugins(&["beta".to_string()])
            .await
            .unwrap();

        h.manager.shutdown().await;

        let stopped = lifecycle_events(&h.bus, &[event_types::PLUGIN_STOPPED]);
        assert_eq!(
            stopped,
            vec![
                ("plugin.stopped".to_string(), "beta".to_string()),
                ("plugin.stopped".to_string(), "alpha".to_string()),
            ]
        );
        assert!(h.manager.loaded_plugins().await.is_empty());

        // Idempotent.
        h.manager.shutdown().await;
    }

    #[tokio::test]
    async fn initialize_auto_loads_everything_discovered() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(&dir, "alpha", "extension", &[], json!({}));
        write_manifest(&dir, "beta", "extension", &["alpha"], json!({}));

        let loader = Arc::new(StaticPluginLoader::new());
        loader.register("alpha", || PluginInstance::Extension(Arc::new(Ext::new("alpha", "1.0.0"))));
        loader.register("beta", || PluginInstance::Extension(Arc::new(Ext::new("beta", "1.0.0"))));

        let bus = Arc::new(EventBus::new());
        let config = Arc::new(ConfigManager::new(None));
        config.set(
            "plugins.discovery_paths",
            json!([dir.path().display().to_string()]),
        );
        config.set("plugins.health_monitoring", json!(false));

        let manager = Arc::new(PluginManager::new(
            Arc::new(ServiceContainer::new()),
            bus,
            config,
            loader,
        ));
        manager.initialize().await.unwrap();

        assert_eq!(manager.loaded_plugins().await.len(), 2);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn health_check_all_reports_per_plugin() {
        let h = harness().await;
        h.manager.load_plugin("alpha").await.unwrap();
        h.manager.load_plugin("agent").await.unwrap();

        let results = h.manager.health_check_all().await;
        assert_eq!(results.get("alpha"), Some(&true));
        assert_eq!(results.get("agent"), Some(&true));

        // A stopped plugin reports unhealthy but the aggregate never fails.
        h.manager
            .plugin("alpha")
            .await
            .unwrap()
            .as_plugin()
            .stop()
            .await
            .unwrap();
        let results = h.manager.health_check_all().await;
        assert_eq!(results.get("alpha"), Some(&false));
    }
}
