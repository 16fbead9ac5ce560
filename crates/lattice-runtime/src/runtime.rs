//! Runtime orchestration.
//!
//! [`LatticeRuntime`] owns one explicitly constructed instance of each core
//! component — event bus, service container, configuration manager, plugin
//! manager — and drives them through startup and shutdown. Nothing in the
//! runtime is a process-wide singleton: every component is reachable only
//! through the runtime object (or the `Arc`s it hands out), initialized once
//! at process start and torn down once at shutdown.
//!
//! # Quick start
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let runtime = LatticeRuntime::builder()
//!         .config_file("lattice.yaml")
//!         .register_plugin("echo", || PluginInstance::Agent(Arc::new(EchoAgent::new())))
//!         .build();
//!
//!     // Initializes logging and configuration, discovers and loads
//!     // plugins, then runs until Ctrl+C or SIGTERM.
//!     runtime.run().await
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tracing::info;

use lattice_core::{Event, PluginInstance, event_types};
use lattice_framework::{
    ConfigManager, EventBus, PluginLoader, PluginManager, ServiceContainer, StaticPluginLoader,
};

use crate::error::RuntimeResult;
use crate::logging::{self, LoggingConfig};

/// Configuration file names probed in each default search location.
const CONFIG_FILE_NAMES: &[&str] = &[
    "lattice.json",
    "lattice.yaml",
    "lattice.yml",
    "lattice.toml",
];

// =============================================================================
// LatticeRuntime
// =============================================================================

/// The assembled runtime: one bus, one container, one configuration
/// manager, one plugin manager.
pub struct LatticeRuntime {
    bus: Arc<EventBus>,
    container: Arc<ServiceContainer>,
    config: Arc<ConfigManager>,
    manager: Arc<PluginManager>,
}

impl LatticeRuntime {
    /// Starts building a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// The event bus shared by every component.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The service container.
    pub fn container(&self) -> &Arc<ServiceContainer> {
        &self.container
    }

    /// The configuration manager.
    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// The plugin manager.
    pub fn manager(&self) -> &Arc<PluginManager> {
        &self.manager
    }

    /// Loads configuration, initializes logging from it, and brings up the
    /// plugin manager (discovery, auto-load, health monitoring).
    pub async fn initialize(&self) -> RuntimeResult<()> {
        self.config.load_all().await?;

        let logging_config: LoggingConfig = self
            .config
            .get("logging")
            .and_then(|section| serde_json::from_value(section).ok())
            .unwrap_or_default();
        logging::init_from_config(&logging_config);

        info!("Initializing Lattice runtime");
        self.manager.initialize().await?;

        self.bus
            .publish(Event::new(event_types::SYSTEM_STARTUP).with_source("runtime"))
            .await;
        info!("Runtime initialized");
        Ok(())
    }

    /// Runs until a shutdown signal is received.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.initialize().await?;
        info!("Lattice runtime is running. Press Ctrl+C to stop.");
        wait_for_shutdown_signal().await;
        self.shutdown().await;
        Ok(())
    }

    /// Runs until the given future resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.initialize().await?;
        shutdown.await;
        self.shutdown().await;
        Ok(())
    }

    /// Publishes the shutdown event, unloads every plugin in reverse load
    /// order, and stops the configuration watchers. Idempotent.
    pub async fn shutdown(&self) {
        info!("Stopping Lattice runtime");
        self.bus
            .publish(Event::new(event_types::SYSTEM_SHUTDOWN).with_source("runtime"))
            .await;
        self.manager.shutdown().await;
        self.config.shutdown().await;
        info!("Runtime stopped");
    }
}

/// Waits for Ctrl+C or, on Unix, SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "Failed to register SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder wiring configuration sources and plugin implementations into a
/// [`LatticeRuntime`].
pub struct RuntimeBuilder {
    sources: Vec<(String, PathBuf, i64, bool)>,
    static_loader: Arc<StaticPluginLoader>,
    loader_override: Option<Arc<dyn PluginLoader>>,
    env_prefix: Option<String>,
    search_defaults: bool,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            static_loader: Arc::new(StaticPluginLoader::new()),
            loader_override: None,
            env_prefix: None,
            search_defaults: false,
        }
    }

    /// Adds a watched configuration source. Priority grows with insertion
    /// order, so later files override earlier ones.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        let priority = 100 + self.sources.len() as i64 * 100;
        let path = path.into();
        let name = format!("file-{}", self.sources.len());
        self.sources.push((name, path, priority, true));
        self
    }

    /// Also probes the working directory and the user configuration
    /// directory for `lattice.{json,yaml,yml,toml}`.
    pub fn search_default_locations(mut self) -> Self {
        self.search_defaults = true;
        self
    }

    /// Overrides the environment variable prefix (default `LATTICE_`).
    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    /// Registers an in-process plugin implementation under an entry-point
    /// key. Manifests reference it through `entry_point` (or by plugin
    /// name).
    pub fn register_plugin<F>(self, entry_point: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> PluginInstance + Send + Sync + 'static,
    {
        self.static_loader.register(entry_point, factory);
        self
    }

    /// Replaces the in-process loader with a custom [`PluginLoader`]
    /// implementation (e.g. one backed by dynamic libraries).
    pub fn loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader_override = Some(loader);
        self
    }

    /// Assembles the runtime. Configuration is not loaded until
    /// [`LatticeRuntime::initialize`].
    pub fn build(self) -> LatticeRuntime {
        let bus = Arc::new(EventBus::new());

        let mut config = ConfigManager::new(Some(bus.clone()));
        if let Some(prefix) = self.env_prefix {
            config = config.with_env_prefix(prefix);
        }
        let config = Arc::new(config);

        let mut sources = self.sources;
        if self.search_defaults {
            let mut locations = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                locations.push(cwd);
            }
            if let Some(user_dir) = dirs::config_dir() {
                locations.push(user_dir.join("lattice"));
            }
            for location in locations {
                for name in CONFIG_FILE_NAMES {
                    let candidate = location.join(name);
                    if candidate.is_file() {
                        // Defaults sit below explicitly added files.
                        sources.push(((*name).to_string(), candidate, 50, true));
                        break;
                    }
                }
            }
        }
        for (name, path, priority, watch) in sources {
            config.add_source(name, path, None, priority, watch);
        }

        let loader: Arc<dyn PluginLoader> = match self.loader_override {
            Some(custom) => custom,
            None => self.static_loader,
        };

        let container = Arc::new(ServiceContainer::new());
        let manager = Arc::new(PluginManager::new(
            container.clone(),
            bus.clone(),
            config.clone(),
            loader,
        ));

        LatticeRuntime {
            bus,
            container,
            config,
            manager,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
