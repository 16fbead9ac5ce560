//! Priority-ordered publish/subscribe event bus.
//!
//! Plugins and core components communicate through [`EventBus`] without
//! holding references to each other. Handlers subscribe to a single event
//! type or globally, carry a priority and an optional filter predicate, and
//! may be one-shot. Within one publish, handlers run strictly in descending
//! priority order, awaited one at a time — the bus never fans handlers out
//! concurrently.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = EventBus::new();
//! bus.subscribe(event_types::PLUGIN_LOADED, HandlerOptions::default(), |event| async move {
//!     info!(plugin = ?event.plugin(), "observed a plugin load");
//!     Ok(())
//! });
//! bus.publish(Event::for_plugin(event_types::PLUGIN_LOADED, "echo")).await;
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use lattice_core::{BoxError, Event, EventPriority};

/// Default capacity of the bounded event history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Type-erased async event handler.
pub type EventHandlerFn = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Predicate evaluated against an event before a handler runs.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Token identifying a subscription, used to unsubscribe.
///
/// Handler closures are not comparable, so subscriptions are identified by
/// the token returned at subscribe time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

// =============================================================================
// HandlerOptions
// =============================================================================

/// Subscription options: priority, one-shot behaviour, and filtering.
#[derive(Clone, Default)]
pub struct HandlerOptions {
    priority: EventPriority,
    once: bool,
    filter: Option<EventFilter>,
}

impl HandlerOptions {
    /// Options with normal priority, no filter, not one-shot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dispatch priority.
    pub fn priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Removes the handler after its first execution, successful or not.
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Skips the handler (silently) for events the predicate rejects.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }
}

struct RegisteredHandler {
    id: u64,
    priority: EventPriority,
    once: bool,
    /// Set on first execution of a one-shot handler; guarantees exactly-one
    /// delivery even when publishes race.
    consumed: AtomicBool,
    filter: Option<EventFilter>,
    handler: EventHandlerFn,
}

impl RegisteredHandler {
    fn spent(&self) -> bool {
        self.once && self.consumed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Counters and sizes reported by [`EventBus::stats`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusStats {
    /// Total events published.
    pub events_published: u64,
    /// Handler executions that completed without error.
    pub handlers_executed: u64,
    /// Handler executions that returned an error.
    pub handler_errors: u64,
    /// Live type-specific handler count.
    pub active_handlers: usize,
    /// Live global handler count.
    pub global_handlers: usize,
    /// Number of event types with at least one handler.
    pub event_types: usize,
    /// Events currently retained in history.
    pub history_size: usize,
}

// =============================================================================
// EventBus
// =============================================================================

/// Priority-ordered publish/subscribe system with bounded history.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<RegisteredHandler>>>>,
    global_handlers: RwLock<Vec<Arc<RegisteredHandler>>>,
    history: Mutex<VecDeque<Arc<Event>>>,
    history_capacity: usize,
    next_id: AtomicU64,
    events_published: AtomicU64,
    handlers_executed: AtomicU64,
    handler_errors: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the default history capacity.
    pub fn new() -> Self {
        Self::with_history_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a bus retaining at most `capacity` events of history.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            global_handlers: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            history_capacity: capacity,
            next_id: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            handlers_executed: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
        }
    }

    fn make_handler<F, Fut>(&self, opts: HandlerOptions, handler: F) -> Arc<RegisteredHandler>
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Arc::new(RegisteredHandler {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            priority: opts.priority,
            once: opts.once,
            consumed: AtomicBool::new(false),
            filter: opts.filter,
            handler: Arc::new(move |event| Box::pin(handler(event))),
        })
    }

    /// Subscribes a handler to one event type. Returns the token needed to
    /// unsubscribe.
    pub fn subscribe<F, Fut>(
        &self,
        event_type: impl Into<String>,
        opts: HandlerOptions,
        handler: F,
    ) -> HandlerId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let event_type = event_type.into();
        let registered = self.make_handler(opts, handler);
        let id = HandlerId(registered.id);

        let mut handlers = self.handlers.write();
        let list = handlers.entry(event_type.clone()).or_default();
        list.push(registered);
        // Highest priority first; stable, so equal priorities keep
        // subscription order.
        list.sort_by_key(|h| std::cmp::Reverse(h.priority));

        debug!(event_type = %event_type, "Handler subscribed");
        id
    }

    /// Subscribes a handler to every event published on the bus.
    pub fn subscribe_global<F, Fut>(&self, opts: HandlerOptions, handler: F) -> HandlerId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let registered = self.make_handler(opts, handler);
        let id = HandlerId(registered.id);

        let mut global = self.global_handlers.write();
        global.push(registered);
        global.sort_by_key(|h| std::cmp::Reverse(h.priority));

        debug!("Global handler subscribed");
        id
    }

    /// Removes a type-specific subscription. Returns whether it existed.
    pub fn unsubscribe(&self, event_type: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| h.id != id.0);
        let removed = list.len() < before;
        if list.is_empty() {
            handlers.remove(event_type);
        }
        removed
    }

    /// Removes a global subscription. Returns whether it existed.
    pub fn unsubscribe_global(&self, id: HandlerId) -> bool {
        let mut global = self.global_handlers.write();
        let before = global.len();
        global.retain(|h| h.id != id.0);
        global.len() < before
    }

    /// Publishes an event: records it in history, then runs every matching
    /// handler strictly in descending priority order.
    ///
    /// Handler errors are logged and counted; they never stop the remaining
    /// handlers from running.
    pub async fn publish(&self, event: Event) {
        let event = Arc::new(event);

        {
            let mut history = self.history.lock();
            history.push_back(event.clone());
            while history.len() > self.history_capacity {
                history.pop_front();
            }
        }
        self.events_published.fetch_add(1, Ordering::Relaxed);
        debug!(event_type = %event.event_type, source = %event.source, "Publishing event");

        // Snapshot the execution set: type-specific ∪ global, sorted by
        // descending priority. Handlers subscribed mid-dispatch see only the
        // next publish.
        let mut to_run: Vec<Arc<RegisteredHandler>> = Vec::new();
        if let Some(list) = self.handlers.read().get(event.event_type.as_str()) {
            to_run.extend(list.iter().cloned());
        }
        to_run.extend(self.global_handlers.read().iter().cloned());
        to_run.sort_by_key(|h| std::cmp::Reverse(h.priority));

        let mut any_consumed = false;
        for handler in to_run {
            if let Some(filter) = &handler.filter
                && !filter(&event)
            {
                continue;
            }
            // One-shot handlers execute exactly once across racing publishes.
            if handler.once && handler.consumed.swap(true, Ordering::SeqCst) {
                continue;
            }

            match (handler.handler)(event.clone()).await {
                Ok(()) => {
                    self.handlers_executed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.handler_errors.fetch_add(1, Ordering::Relaxed);
                    error!(
                        event_type = %event.event_type,
                        error = %e,
                        "Event handler failed"
                    );
                }
            }

            if handler.once {
                any_consumed = true;
            }
        }

        if any_consumed {
            self.remove_spent_handlers(&event.event_type);
        }
    }

    /// Publishes an event built from its parts.
    pub async fn emit(&self, event_type: &str, data: serde_json::Value, source: &str) {
        self.publish(Event::new(event_type).with_data(data).with_source(source))
            .await;
    }

    fn remove_spent_handlers(&self, event_type: &str) {
        let mut handlers = self.handlers.write();
        if let Some(list) = handlers.get_mut(event_type) {
            list.retain(|h| !h.spent());
            if list.is_empty() {
                handlers.remove(event_type);
            }
        }
        self.global_handlers.write().retain(|h| !h.spent());
    }

    /// Returns up to `limit` most recent events, optionally filtered by type.
    pub fn event_history(&self, event_type: Option<&str>, limit: usize) -> Vec<Arc<Event>> {
        let history = self.history.lock();
        let matching: Vec<Arc<Event>> = history
            .iter()
            .filter(|e| event_type.is_none_or(|t| e.event_type == t))
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).collect()
    }

    /// Current counters and sizes.
    pub fn stats(&self) -> BusStats {
        let handlers = self.handlers.read();
        BusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            handlers_executed: self.handlers_executed.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            active_handlers: handlers.values().map(Vec::len).sum(),
            global_handlers: self.global_handlers.read().len(),
            event_types: handlers.len(),
            history_size: self.history.lock().len(),
        }
    }

    /// Drops all retained history.
    pub fn clear_history(&self) {
        self.history.lock().clear();
        debug!("Event history cleared");
    }

    /// Removes every handler, type-specific and global.
    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
        self.global_handlers.write().clear();
        debug!("All event handlers cleared");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_core::event_types;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> EventHandlerFn) {
        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let log_for_make = log.clone();
        let make = move |label: &str| {
            let log = log_for_make.clone();
            let label = label.to_string();
            let f: EventHandlerFn = Arc::new(move |_event| {
                let log = log.clone();
                let label = label.clone();
                Box::pin(async move {
                    log.lock().push(label);
                    Ok(())
                })
            });
            f
        };
        (log, make)
    }

    #[tokio::test]
    async fn handlers_run_in_descending_priority_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let low = make("low");
        let high = make("high");
        let normal = make("normal");
        bus.subscribe(
            "test.event",
            HandlerOptions::new().priority(EventPriority::Low),
            move |e| (low)(e),
        );
        bus.subscribe(
            "test.event",
            HandlerOptions::new().priority(EventPriority::High),
            move |e| (high)(e),
        );
        bus.subscribe(
            "test.event",
            HandlerOptions::new().priority(EventPriority::Normal),
            move |e| (normal)(e),
        );

        bus.publish(Event::new("test.event")).await;
        assert_eq!(*log.lock(), vec!["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn once_handlers_receive_exactly_one_event() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let h = make("once");
        bus.subscribe("test.event", HandlerOptions::new().once(), move |e| (h)(e));

        bus.publish(Event::new("test.event")).await;
        bus.publish(Event::new("test.event")).await;
        bus.publish(Event::new("test.event")).await;
        assert_eq!(log.lock().len(), 1);
        assert_eq!(bus.stats().active_handlers, 0);
    }

    #[tokio::test]
    async fn filtered_handlers_are_skipped_silently() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let h = make("filtered");
        bus.subscribe(
            "test.event",
            HandlerOptions::new().filter(|e| e.source == "wanted"),
            move |e| (h)(e),
        );

        bus.publish(Event::new("test.event").with_source("other")).await;
        bus.publish(Event::new("test.event").with_source("wanted")).await;
        assert_eq!(log.lock().len(), 1);
        assert_eq!(bus.stats().handlers_executed, 1);
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_stop_the_chain() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        bus.subscribe(
            "test.event",
            HandlerOptions::new().priority(EventPriority::Highest),
            |_e| async { Err::<(), BoxError>("boom".into()) },
        );
        let h = make("survivor");
        bus.subscribe("test.event", HandlerOptions::new(), move |e| (h)(e));

        bus.publish(Event::new("test.event")).await;
        assert_eq!(*log.lock(), vec!["survivor"]);

        let stats = bus.stats();
        assert_eq!(stats.handler_errors, 1);
        assert_eq!(stats.handlers_executed, 1);
    }

    #[tokio::test]
    async fn global_handlers_see_every_event_type() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let h = make("global");
        bus.subscribe_global(HandlerOptions::new(), move |e| (h)(e));

        bus.publish(Event::new(event_types::PLUGIN_LOADED)).await;
        bus.publish(Event::new(event_types::SYSTEM_CONFIG_CHANGED)).await;
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let h = make("gone");
        let id = bus.subscribe("test.event", HandlerOptions::new(), move |e| (h)(e));

        assert!(bus.unsubscribe("test.event", id));
        assert!(!bus.unsubscribe("test.event", id));

        bus.publish(Event::new("test.event")).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn history_is_bounded_and_filterable() {
        let bus = EventBus::with_history_capacity(3);
        for i in 0..5 {
            bus.publish(Event::new("a").with_data(json!(i))).await;
        }
        bus.publish(Event::new("b")).await;

        // Capacity 3: two most recent "a" events plus the "b" event remain.
        assert_eq!(bus.stats().history_size, 3);
        let a_events = bus.event_history(Some("a"), 10);
        assert_eq!(a_events.len(), 2);
        assert_eq!(a_events.last().map(|e| e.data.clone()), Some(json!(4)));

        let limited = bus.event_history(None, 2);
        assert_eq!(limited.len(), 2);

        bus.clear_history();
        assert_eq!(bus.stats().history_size, 0);
    }
}
