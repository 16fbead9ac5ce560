//! Layered configuration manager with live reload.
//!
//! [`ConfigManager`] merges configuration from built-in defaults, registered
//! file sources (ascending priority), and an environment overlay applied
//! last. The merge itself is a figment pipeline; the extracted result is a
//! plain `serde_json::Value` queried with dotted keys.
//!
//! After every merge the manager diffs old against new configuration and
//! notifies registered watcher callbacks with `(key, old, new)` per changed
//! key, and — when a bus is attached — publishes one `system.config_changed`
//! event per key (plus `plugin.config_changed` for keys under a plugin's
//! section).
//!
//! Sources registered with `watch` are polled for modification-time changes;
//! a change triggers a full reload so priority ordering is always preserved.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use figment::Figment;
use figment::providers::Serialized;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use lattice_core::event_types;

use super::source::{ConfigError, ConfigFormat, ConfigResult, ConfigSource, env_overlay};
use crate::bus::EventBus;

/// Environment variable prefix recognized by the overlay.
pub const DEFAULT_ENV_PREFIX: &str = "LATTICE_";

/// Default interval between modification-time polls of watched sources.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Delay before a watcher retries after a failed reload.
const RELOAD_BACKOFF: Duration = Duration::from_secs(5);

/// Callback invoked with `(key, old, new)` for every changed dotted key.
pub type WatcherFn = Arc<dyn Fn(&str, Option<&Value>, Option<&Value>) + Send + Sync>;

/// Token identifying a registered watcher callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

// =============================================================================
// Built-in defaults
// =============================================================================

#[derive(Debug, Serialize)]
struct PluginsDefaults {
    discovery_paths: Vec<String>,
    auto_load: bool,
    hot_reload: bool,
    health_monitoring: bool,
    health_check_interval: u64,
}

#[derive(Debug, Serialize)]
struct LoggingDefaults {
    level: String,
    format: String,
    output: String,
}

#[derive(Debug, Serialize)]
struct SystemDefaults {
    max_concurrent_operations: usize,
}

/// Lowest-priority layer of every merge.
#[derive(Debug, Serialize)]
struct RuntimeDefaults {
    plugins: PluginsDefaults,
    logging: LoggingDefaults,
    system: SystemDefaults,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            plugins: PluginsDefaults {
                discovery_paths: vec!["./plugins".to_string()],
                auto_load: true,
                hot_reload: true,
                health_monitoring: true,
                health_check_interval: 30,
            },
            logging: LoggingDefaults {
                level: "info".to_string(),
                format: "compact".to_string(),
                output: "stdout".to_string(),
            },
            system: SystemDefaults {
                max_concurrent_operations: 10,
            },
        }
    }
}

fn defaults_value() -> Value {
    serde_json::to_value(RuntimeDefaults::default()).unwrap_or(Value::Null)
}

// =============================================================================
// ConfigManager
// =============================================================================

/// Centralized configuration with prioritized sources and live reload.
pub struct ConfigManager {
    sources: Mutex<Vec<ConfigSource>>,
    merged: Mutex<Value>,
    watchers: Mutex<Vec<(u64, WatcherFn)>>,
    next_watcher_id: Mutex<u64>,
    bus: Option<Arc<EventBus>>,
    env_prefix: String,
    poll_interval: Duration,
    /// Serializes full reloads so concurrent source changes cannot
    /// interleave a partial merge.
    reload_lock: tokio::sync::Mutex<()>,
    watch_tasks: Mutex<HashMap<PathBuf, JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl ConfigManager {
    /// Creates a manager with built-in defaults and no sources. When `bus`
    /// is given, configuration changes are additionally published as events.
    pub fn new(bus: Option<Arc<EventBus>>) -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
            merged: Mutex::new(defaults_value()),
            watchers: Mutex::new(Vec::new()),
            next_watcher_id: Mutex::new(0),
            bus,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reload_lock: tokio::sync::Mutex::new(()),
            watch_tasks: Mutex::new(HashMap::new()),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Overrides the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Overrides the modification-time polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Registers a configuration source. `format` defaults to extension
    /// detection. Sources take effect at the next [`load_all`](Self::load_all).
    pub fn add_source(
        &self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        format: Option<ConfigFormat>,
        priority: i64,
        watch: bool,
    ) {
        let path = path.into();
        let source = ConfigSource {
            name: name.into(),
            format: format.unwrap_or_else(|| ConfigFormat::detect(&path)),
            path,
            priority,
            watch,
            last_modified: None,
        };
        debug!(source = %source.name, path = %source.path.display(), "Config source added");
        let mut sources = self.sources.lock();
        sources.push(source);
        sources.sort_by_key(|s| s.priority);
    }

    /// Loads and merges every source, applies the environment overlay,
    /// notifies watchers of the differences, and (re)starts file watchers.
    pub async fn load_all(self: &Arc<Self>) -> ConfigResult<()> {
        let _serialized = self.reload_lock.lock().await;

        let sources = self.sources.lock().clone();
        let mut figment = Figment::from(Serialized::defaults(RuntimeDefaults::default()));

        for source in &sources {
            match self.load_source(source).await {
                Ok(value) => {
                    figment = figment.merge(Serialized::defaults(value));
                    debug!(source = %source.name, "Loaded configuration source");
                }
                Err(ConfigError::Read { .. }) => {
                    warn!(
                        source = %source.name,
                        path = %source.path.display(),
                        "Config file not readable — source skipped"
                    );
                }
                Err(e) => {
                    error!(source = %source.name, error = %e, "Failed to load configuration source");
                }
            }
        }

        let env = env_overlay(&self.env_prefix);
        if !env.is_null() {
            figment = figment.merge(Serialized::defaults(env));
        }

        let new_config: Value = figment
            .extract()
            .map_err(|e| ConfigError::Merge(e.to_string()))?;

        let old_config = {
            let mut merged = self.merged.lock();
            std::mem::replace(&mut *merged, new_config.clone())
        };

        self.notify_changes(&old_config, &new_config).await;
        self.start_watchers();
        Ok(())
    }

    /// Reads and parses a single source, updating its recorded mtime.
    async fn load_source(&self, source: &ConfigSource) -> ConfigResult<Value> {
        let content = tokio::fs::read_to_string(&source.path).await.map_err(|e| {
            ConfigError::Read {
                path: source.path.display().to_string(),
                cause: e.to_string(),
            }
        })?;

        if let Ok(meta) = tokio::fs::metadata(&source.path).await
            && let Ok(mtime) = meta.modified()
        {
            let mut sources = self.sources.lock();
            if let Some(s) = sources.iter_mut().find(|s| s.name == source.name) {
                s.last_modified = Some(mtime);
            }
        }

        source
            .format
            .parse(&content)
            .map_err(|cause| ConfigError::Parse {
                path: source.path.display().to_string(),
                format: source.format.as_str(),
                cause,
            })
    }

    /// Reloads after a change to the named source. The whole pipeline is
    /// re-derived so priority ordering is preserved.
    pub async fn reload_source(self: &Arc<Self>, name: &str) -> ConfigResult<()> {
        let known = self.sources.lock().iter().any(|s| s.name == name);
        if !known {
            return Err(ConfigError::SourceNotFound {
                name: name.to_string(),
            });
        }
        info!(source = %name, "Reloading configuration");
        self.load_all().await
    }

    async fn notify_changes(&self, old: &Value, new: &Value) {
        let changes = diff_values(old, new, "");
        if changes.is_empty() {
            return;
        }

        let watchers: Vec<WatcherFn> = self
            .watchers
            .lock()
            .iter()
            .map(|(_, w)| w.clone())
            .collect();

        for (key, old_value, new_value) in &changes {
            for watcher in &watchers {
                watcher(key, old_value.as_ref(), new_value.as_ref());
            }

            if let Some(bus) = &self.bus {
                let payload = json!({
                    "key": key,
                    "old": old_value,
                    "new": new_value,
                });
                bus.emit(event_types::SYSTEM_CONFIG_CHANGED, payload.clone(), "config-manager")
                    .await;
                // Changes under plugins.<name>.* also get a plugin-scoped event.
                if let Some(rest) = key.strip_prefix("plugins.")
                    && let Some((plugin, _)) = rest.split_once('.')
                {
                    bus.publish(
                        lattice_core::Event::for_plugin(event_types::PLUGIN_CONFIG_CHANGED, plugin)
                            .with_data(payload)
                            .with_source("config-manager"),
                    )
                    .await;
                }
            }
        }
    }

    // ─── Queries and programmatic updates ────────────────────────────────────

    /// Looks up a dotted key in the merged configuration.
    pub fn get(&self, key: &str) -> Option<Value> {
        let merged = self.merged.lock();
        let mut current = &*merged;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current.clone())
    }

    /// Looks up a dotted key, falling back to `default`.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Sets a dotted key in the merged configuration, creating intermediate
    /// objects, and notifies watchers. The value lasts until the next full
    /// reload re-derives the merge from the sources.
    pub fn set(&self, key: &str, value: Value) {
        let old_value = {
            let mut merged = self.merged.lock();
            let mut current = &mut *merged;
            let parts: Vec<&str> = key.split('.').collect();
            for part in &parts[..parts.len().saturating_sub(1)] {
                if !current.get(*part).is_some_and(Value::is_object) {
                    if let Some(obj) = current.as_object_mut() {
                        obj.insert((*part).to_string(), json!({}));
                    }
                }
                match current.get_mut(*part) {
                    Some(next) => current = next,
                    None => return,
                }
            }
            let Some(leaf) = parts.last() else { return };
            current
                .as_object_mut()
                .and_then(|obj| obj.insert((*leaf).to_string(), value.clone()))
        };

        let watchers: Vec<WatcherFn> = self
            .watchers
            .lock()
            .iter()
            .map(|(_, w)| w.clone())
            .collect();
        for watcher in &watchers {
            watcher(key, old_value.as_ref(), Some(&value));
        }
    }

    /// Registers a change watcher. Returns the token needed to unregister.
    pub fn watch<F>(&self, callback: F) -> WatcherId
    where
        F: Fn(&str, Option<&Value>, Option<&Value>) + Send + Sync + 'static,
    {
        let mut next = self.next_watcher_id.lock();
        let id = *next;
        *next += 1;
        self.watchers.lock().push((id, Arc::new(callback)));
        WatcherId(id)
    }

    /// Removes a watcher. Returns whether it existed.
    pub fn unwatch(&self, id: WatcherId) -> bool {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|(wid, _)| *wid != id.0);
        watchers.len() < before
    }

    /// Clone of the entire merged configuration.
    pub fn snapshot(&self) -> Value {
        self.merged.lock().clone()
    }

    // ─── File watching ───────────────────────────────────────────────────────

    fn start_watchers(self: &Arc<Self>) {
        let sources = self.sources.lock().clone();
        let mut tasks = self.watch_tasks.lock();
        for source in sources.into_iter().filter(|s| s.watch) {
            if tasks.contains_key(&source.path) {
                continue;
            }
            let path = source.path.clone();
            let handle = tokio::spawn(watch_source(
                Arc::downgrade(self),
                self.shutdown_token.clone(),
                source,
                self.poll_interval,
            ));
            tasks.insert(path, handle);
        }
    }

    /// Cancels file watchers and waits for them to exit. Idempotent.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.watch_tasks.lock();
            tasks.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        info!("Configuration manager shut down");
    }
}

/// Polls one source's modification time; any change triggers a full reload.
async fn watch_source(
    manager: Weak<ConfigManager>,
    shutdown: CancellationToken,
    source: ConfigSource,
    interval: Duration,
) {
    let mut last = source.last_modified;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };

        let mtime = match tokio::fs::metadata(&source.path).await {
            Ok(meta) => meta.modified().ok(),
            // Missing file: keep polling, it may appear.
            Err(_) => None,
        };
        let Some(mtime) = mtime else { continue };

        if last.is_none_or(|seen| mtime > seen) {
            info!(path = %source.path.display(), "Configuration file changed");
            if let Err(e) = manager.reload_source(&source.name).await {
                error!(source = %source.name, error = %e, "Reload after file change failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RELOAD_BACKOFF) => {}
                }
            }
            last = Some(mtime);
        }
    }
}

// =============================================================================
// Diffing
// =============================================================================

/// Recursively diffs two configuration trees, producing `(dotted key, old,
/// new)` for every added, changed, or removed leaf.
fn diff_values(
    old: &Value,
    new: &Value,
    prefix: &str,
) -> Vec<(String, Option<Value>, Option<Value>)> {
    let mut changes = Vec::new();

    let (Some(old_map), Some(new_map)) = (old.as_object(), new.as_object()) else {
        if old != new {
            changes.push((prefix.to_string(), Some(old.clone()), Some(new.clone())));
        }
        return changes;
    };

    for (key, new_value) in new_map {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match old_map.get(key) {
            None => changes.push((full_key, None, Some(new_value.clone()))),
            Some(old_value) if old_value.is_object() && new_value.is_object() => {
                changes.extend(diff_values(old_value, new_value, &full_key));
            }
            Some(old_value) if old_value != new_value => {
                changes.push((full_key, Some(old_value.clone()), Some(new_value.clone())));
            }
            Some(_) => {}
        }
    }

    for (key, old_value) in old_map {
        if !new_map.contains_key(key) {
            let full_key = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            changes.push((full_key, Some(old_value.clone()), None));
        }
    }

    changes
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[tokio::test]
    async fn higher_priority_source_wins_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let low = write_file(&dir, "low.json", r#"{"db": {"host": "low", "port": 5432}}"#);
        let high = write_file(&dir, "high.yaml", "db:\n  host: high\n");

        let manager = Arc::new(ConfigManager::new(None));
        manager.add_source("low", &low, None, 100, false);
        manager.add_source("high", &high, None, 200, false);
        manager.load_all().await.unwrap();

        // The priority-200 source overrides the conflicting key; keys present
        // only in one source survive the merge unchanged.
        assert_eq!(manager.get("db.host"), Some(json!("high")));
        assert_eq!(manager.get("db.port"), Some(json!(5432)));
    }

    #[tokio::test]
    async fn registration_order_does_not_matter_only_priority() {
        let dir = tempfile::tempdir().unwrap();
        let low = write_file(&dir, "low.json", r#"{"answer": 1}"#);
        let high = write_file(&dir, "high.json", r#"{"answer": 2}"#);

        let manager = Arc::new(ConfigManager::new(None));
        manager.add_source("high", &high, None, 200, false);
        manager.add_source("low", &low, None, 100, false);
        manager.load_all().await.unwrap();

        assert_eq!(manager.get("answer"), Some(json!(2)));
    }

    #[tokio::test]
    async fn missing_and_malformed_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_file(&dir, "good.json", r#"{"ok": true}"#);
        let bad = write_file(&dir, "bad.json", "{not json");

        let manager = Arc::new(ConfigManager::new(None));
        manager.add_source("absent", dir.path().join("absent.json"), None, 50, false);
        manager.add_source("bad", &bad, None, 100, false);
        manager.add_source("good", &good, None, 150, false);
        manager.load_all().await.unwrap();

        assert_eq!(manager.get("ok"), Some(json!(true)));
    }

    #[tokio::test]
    async fn defaults_are_present_before_any_source_loads() {
        let manager = Arc::new(ConfigManager::new(None));
        assert_eq!(manager.get("plugins.auto_load"), Some(json!(true)));
        assert_eq!(manager.get("plugins.health_check_interval"), Some(json!(30)));
        assert_eq!(manager.get("missing.key"), None);
        assert_eq!(manager.get_or("missing.key", json!("fallback")), json!("fallback"));
    }

    #[tokio::test]
    async fn watchers_see_changed_keys_with_old_and_new_values() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "app.json", r#"{"plugins": {"auto_load": false}}"#);

        let manager = Arc::new(ConfigManager::new(None));
        manager.add_source("app", &file, None, 100, false);

        let seen: Arc<Mutex<Vec<(String, Option<Value>, Option<Value>)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = manager.watch(move |key, old, new| {
            sink.lock()
                .push((key.to_string(), old.cloned(), new.cloned()));
        });

        manager.load_all().await.unwrap();

        let seen = seen.lock().clone();
        let change = seen
            .iter()
            .find(|(key, _, _)| key == "plugins.auto_load")
            .expect("auto_load change notified");
        assert_eq!(change.1, Some(json!(true)));
        assert_eq!(change.2, Some(json!(false)));

        assert!(manager.unwatch(id));
        assert!(!manager.unwatch(id));
    }

    #[tokio::test]
    async fn set_updates_nested_keys_and_notifies() {
        let manager = Arc::new(ConfigManager::new(None));

        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.watch(move |key, _, _| sink.lock().push(key.to_string()));

        manager.set("custom.nested.flag", json!(true));
        assert_eq!(manager.get("custom.nested.flag"), Some(json!(true)));
        assert_eq!(*seen.lock(), vec!["custom.nested.flag"]);
    }

    #[tokio::test]
    async fn config_changes_are_published_on_the_bus() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            &dir,
            "app.yaml",
            "plugins:\n  echo:\n    greeting: hello\n",
        );

        let bus = Arc::new(EventBus::new());
        let manager = Arc::new(ConfigManager::new(Some(bus.clone())));
        manager.add_source("app", &file, None, 100, false);
        manager.load_all().await.unwrap();

        let system_events = bus.event_history(Some(event_types::SYSTEM_CONFIG_CHANGED), 100);
        assert!(
            system_events
                .iter()
                .any(|e| e.data.get("key") == Some(&json!("plugins.echo.greeting")))
        );

        let plugin_events = bus.event_history(Some(event_types::PLUGIN_CONFIG_CHANGED), 100);
        assert!(plugin_events.iter().any(|e| e.plugin() == Some("echo")));
    }

    #[tokio::test]
    async fn watched_file_change_triggers_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(&dir, "app.json", r#"{"flag": 1}"#);

        let manager = Arc::new(
            ConfigManager::new(None).with_poll_interval(Duration::from_millis(20)),
        );
        manager.add_source("app", &file, None, 100, true);
        manager.load_all().await.unwrap();
        assert_eq!(manager.get("flag"), Some(json!(1)));

        // Rewrite with a strictly newer mtime.
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::write(&file, r#"{"flag": 2}"#).unwrap();
        let later = std::time::SystemTime::now() + Duration::from_secs(2);
        let _ = filetime_touch(&file, later);

        let mut reloaded = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if manager.get("flag") == Some(json!(2)) {
                reloaded = true;
                break;
            }
        }
        assert!(reloaded, "watcher should have reloaded the changed file");

        manager.shutdown().await;
        // Idempotent.
        manager.shutdown().await;
    }

    fn filetime_touch(path: &Path, time: std::time::SystemTime) -> std::io::Result<()> {
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(time)
    }

    #[test]
    fn diff_reports_added_changed_and_removed_keys() {
        let old = json!({"a": 1, "nested": {"keep": true, "gone": 1}, "same": "x"});
        let new = json!({"a": 2, "nested": {"keep": true, "fresh": 3}, "same": "x"});

        let mut changes = diff_values(&old, &new, "");
        changes.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            changes,
            vec![
                ("a".to_string(), Some(json!(1)), Some(json!(2))),
                ("nested.fresh".to_string(), None, Some(json!(3))),
                ("nested.gone".to_string(), Some(json!(1)), None),
            ]
        );
    }
}
