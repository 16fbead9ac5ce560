//! Event model shared by the bus, the plugin manager, and external observers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event type strings published by the runtime.
///
/// These names are the sole integration surface external callers use to
/// observe the runtime; an HTTP layer, for example, subscribes to them
/// rather than holding references into the manager.
pub mod event_types {
    /// A plugin load has begun.
    pub const PLUGIN_LOADING: &str = "plugin.loading";
    /// A plugin finished loading and is active.
    pub const PLUGIN_LOADED: &str = "plugin.loaded";
    /// A plugin's `start` is about to run.
    pub const PLUGIN_STARTING: &str = "plugin.starting";
    /// A plugin's `start` completed.
    pub const PLUGIN_STARTED: &str = "plugin.started";
    /// A plugin's `stop` is about to run.
    pub const PLUGIN_STOPPING: &str = "plugin.stopping";
    /// A plugin was stopped and removed from the registries.
    pub const PLUGIN_STOPPED: &str = "plugin.stopped";
    /// A lifecycle step failed; the payload carries the rendered error.
    pub const PLUGIN_ERROR: &str = "plugin.error";
    /// Aggregate health-check results, published by the monitoring loop.
    pub const PLUGIN_HEALTH_CHECK: &str = "plugin.health_check";
    /// A plugin's effective configuration changed.
    pub const PLUGIN_CONFIG_CHANGED: &str = "plugin.config_changed";

    /// The runtime finished initializing.
    pub const SYSTEM_STARTUP: &str = "system.startup";
    /// The runtime is shutting down.
    pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";
    /// A merged configuration key changed; one event per key.
    pub const SYSTEM_CONFIG_CHANGED: &str = "system.config_changed";
}

// =============================================================================
// EventPriority
// =============================================================================

/// Dispatch priority of an event handler; higher priorities run first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    /// Runs after every other handler.
    Lowest,
    /// Runs late.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Runs early.
    High,
    /// Runs before every other handler.
    Highest,
}

impl EventPriority {
    /// Numeric value of the priority level.
    pub fn value(self) -> u8 {
        match self {
            Self::Lowest => 0,
            Self::Low => 25,
            Self::Normal => 50,
            Self::High => 75,
            Self::Highest => 100,
        }
    }
}

// =============================================================================
// Event
// =============================================================================

/// Monotonic counter feeding default correlation ids.
static CORRELATION_SEQ: AtomicU64 = AtomicU64::new(0);

/// An immutable event record.
///
/// Events are constructed with [`Event::new`] and the `with_*` builders,
/// then handed to the bus; once published they are shared read-only behind
/// an `Arc` and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event type string, e.g. `plugin.loaded`.
    pub event_type: String,
    /// Arbitrary JSON payload.
    pub data: Value,
    /// Identifier of the publishing component.
    pub source: String,
    /// Wall-clock time the event was created.
    pub timestamp: SystemTime,
    /// Correlates related events; defaults to `{type}-{seq}`.
    pub correlation_id: String,
    /// Free-form annotations (e.g. `plugin`, `version`).
    pub metadata: BTreeMap<String, Value>,
}

impl Event {
    /// Creates an event of the given type with an empty payload, an
    /// `unknown` source, and a generated correlation id.
    pub fn new(event_type: impl Into<String>) -> Self {
        let event_type = event_type.into();
        let seq = CORRELATION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            correlation_id: format!("{event_type}-{seq}"),
            event_type,
            data: Value::Null,
            source: "unknown".to_string(),
            timestamp: SystemTime::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a plugin lifecycle event, recording the plugin name in the
    /// metadata map under `plugin`.
    pub fn for_plugin(event_type: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self::new(event_type).with_metadata("plugin", Value::String(plugin.into()))
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Sets the publishing source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Overrides the generated correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Adds a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The plugin name recorded by [`Event::for_plugin`], if any.
    pub fn plugin(&self) -> Option<&str> {
        self.metadata.get("plugin").and_then(Value::as_str)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn correlation_ids_are_unique_per_event() {
        let a = Event::new("plugin.loaded");
        let b = Event::new("plugin.loaded");
        assert_ne!(a.correlation_id, b.correlation_id);
        assert!(a.correlation_id.starts_with("plugin.loaded-"));
    }

    #[test]
    fn plugin_events_carry_the_plugin_name() {
        let event = Event::for_plugin(event_types::PLUGIN_LOADING, "echo")
            .with_data(json!({"version": "1.0.0"}));
        assert_eq!(event.plugin(), Some("echo"));
        assert_eq!(event.event_type, "plugin.loading");
    }

    #[test]
    fn priority_ordering_matches_numeric_values() {
        assert!(EventPriority::Highest > EventPriority::High);
        assert!(EventPriority::High > EventPriority::Normal);
        assert!(EventPriority::Normal > EventPriority::Low);
        assert!(EventPriority::Low > EventPriority::Lowest);
        assert_eq!(EventPriority::Normal.value(), 50);
    }
}
