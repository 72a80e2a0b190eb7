//! Query event type and the in-process notification bus.
//!
//! The data-access layer publishes one [`QueryEvent`] per executed statement.
//! [`QueryBus`] fans each event out to every live subscriber, synchronously,
//! on the publishing thread — there is no queueing and no background
//! delivery, so a subscriber callback runs as part of the same call stack
//! that issued the query.
//!
//! Subscriptions are scoped: [`QueryBus::subscribe`] returns a
//! [`Subscription`] guard that unsubscribes on drop. Because drop runs
//! during unwinding too, a panicking instrumented block can never leak its
//! callback past its own lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

/// Callback invoked once per published event.
pub type EventCallback = Arc<dyn Fn(&QueryEvent) + Send + Sync>;

/// One executed database statement, as reported by the session layer.
#[derive(Debug, Clone)]
pub struct QueryEvent {
    /// Runtime-assigned operation label, e.g. `"User Load"`. Often the
    /// generic `"SQL"` — inserts and updates are never usefully named.
    pub operation: String,
    /// The literal statement text.
    pub sql: String,
    /// When execution started.
    pub started_at: Instant,
    /// When execution finished.
    pub finished_at: Instant,
    /// True when the result was served from the statement cache and no new
    /// I/O occurred. Counters skip these.
    pub cached: bool,
}

impl QueryEvent {
    /// Build an event for a statement that just ran, with explicit timing.
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        sql: impl Into<String>,
        started_at: Instant,
        finished_at: Instant,
    ) -> Self {
        Self {
            operation: operation.into(),
            sql: sql.into(),
            started_at,
            finished_at,
            cached: false,
        }
    }

    /// Mark this event as served from the statement cache.
    #[must_use]
    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    /// Wall time the statement took. Saturates to zero if the clock
    /// readings are out of order.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.finished_at.saturating_duration_since(self.started_at)
    }
}

/// Multi-subscriber fan-out channel for query events.
///
/// Dispatch snapshots the subscriber list before invoking any callback, so
/// callbacks are free to add or remove subscriptions themselves (nested
/// counters do exactly that). Each subscriber owns its own accumulator;
/// the bus shares nothing between them.
#[derive(Default)]
pub struct QueryBus {
    subscribers: Mutex<Vec<(u64, EventCallback)>>,
    next_id: AtomicU64,
}

impl QueryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every subsequently published event.
    ///
    /// The callback stays live until the returned [`Subscription`] is
    /// dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&QueryEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push((id, Arc::new(callback)));
        tracing::debug!(subscriber_id = id, total = subs.len(), "bus subscribe");
        drop(subs);
        Subscription {
            bus: Arc::clone(self),
            id,
        }
    }

    /// Deliver one event to every live subscriber, in subscription order,
    /// on the calling thread.
    pub fn publish(&self, event: &QueryEvent) {
        // Snapshot outside the lock: callbacks may subscribe/unsubscribe.
        let snapshot: Vec<EventCallback> = {
            let subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subs.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in snapshot {
            callback(event);
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn unsubscribe(&self, id: u64) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|(sub_id, _)| *sub_id != id);
        tracing::debug!(subscriber_id = id, total = subs.len(), "bus unsubscribe");
    }
}

impl std::fmt::Debug for QueryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// RAII guard for one bus subscription. Unsubscribes on drop, including
/// drop during panic unwinding.
#[must_use = "dropping the subscription immediately unsubscribes"]
pub struct Subscription {
    bus: Arc<QueryBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Process-wide default bus, for session layers that publish to a single
/// shared channel.
pub fn global_bus() -> &'static Arc<QueryBus> {
    static BUS: LazyLock<Arc<QueryBus>> = LazyLock::new(|| Arc::new(QueryBus::new()));
    &BUS
}
