//! In-process publish/subscribe router for gateway events.
//!
//! DESIGN
//! ======
//! Topics are dot-delimited (`agent.status`). A subscription pattern is either
//! an exact topic or a prefix wildcard ending in `.*`. Matching compares split
//! segments, never raw substrings:
//! - `agent.status` matches only `agent.status`
//! - `agent.*` matches `agent.status`, `agent.run.done`, but NOT bare `agent`
//! - `*` matches every non-empty topic
//!
//! Dispatch is synchronous and in registration order. The registry lock is
//! released before any handler runs, so handlers may subscribe or unsubscribe
//! freely; a registration removed mid-dispatch is skipped when its turn comes.
//!
//! ERROR HANDLING
//! ==============
//! A panicking handler is caught and logged; delivery continues with the next
//! handler.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Connection lifecycle topics published by the connection manager.
pub mod topics {
    /// `{ mode }` once a connection (re)opens.
    pub const WS_CONNECTED: &str = "ws.connected";
    /// `{ reason, terminal }` on every failed open, drop, or when retries run out.
    pub const WS_FAILED: &str = "ws.failed";
    /// `{ attempt, maxAttempts, delayMs }` before each retry.
    pub const WS_RECONNECTING: &str = "ws.reconnecting";
    /// Pushed by the gateway to start the connect handshake.
    pub const CONNECT_CHALLENGE: &str = "connect.challenge";
}

type Handler = Arc<dyn Fn(&str, &Value) + Send + Sync>;

// =============================================================================
// TOPIC PATTERN
// =============================================================================

/// Parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    /// Matches exactly this segment list.
    Exact(Vec<String>),
    /// Matches any topic that starts with these segments and has at least one more.
    Prefix(Vec<String>),
}

impl TopicPattern {
    /// Parse a pattern. Never fails: anything that is not `*` or `<prefix>.*`
    /// is an exact topic, including a `*` in a non-final segment.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            return Self::Prefix(Vec::new());
        }
        match pattern.strip_suffix(".*") {
            Some(prefix) => Self::Prefix(split_topic(prefix)),
            None => Self::Exact(split_topic(pattern)),
        }
    }

    /// Structural match against a topic already split on `.`.
    #[must_use]
    pub fn matches_segments(&self, topic: &[&str]) -> bool {
        match self {
            Self::Exact(segments) => segments.len() == topic.len() && segments.iter().zip(topic).all(|(a, b)| a == b),
            Self::Prefix(prefix) => {
                topic.len() > prefix.len() && prefix.iter().zip(topic).all(|(a, b)| a == b) && !topic[0].is_empty()
            }
        }
    }

    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        let segments: Vec<&str> = topic.split('.').collect();
        self.matches_segments(&segments)
    }
}

impl From<&str> for TopicPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

fn split_topic(topic: &str) -> Vec<String> {
    topic.split('.').map(str::to_owned).collect()
}

// =============================================================================
// REGISTRY
// =============================================================================

struct Registration {
    id: u64,
    pattern: TopicPattern,
    handler: Handler,
    active: AtomicBool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Arc<Registration>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`EventBus::on`]. Dropping it does NOT unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Remove exactly this registration. Calling it again, or after the bus
    /// is gone, is a no-op.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(pos) = registry.entries.iter().position(|r| r.id == self.id) {
            let removed = registry.entries.remove(pos);
            removed.active.store(false, Ordering::Release);
        }
    }

    /// Whether the registration is still live.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| lock(&registry).entries.iter().any(|r| r.id == self.id))
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish_non_exhaustive()
    }
}

/// One delivered event, as yielded by [`EventBus::stream`].
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
}

// =============================================================================
// EVENT BUS
// =============================================================================

/// Cheap to clone; all clones share one registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern`.
    pub fn on<F>(&self, pattern: &str, handler: F) -> Subscription
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.entries.push(Arc::new(Registration {
            id,
            pattern: TopicPattern::parse(pattern),
            handler: Arc::new(handler),
            active: AtomicBool::new(true),
        }));

        Subscription { id, registry: Arc::downgrade(&self.registry) }
    }

    /// Async adapter over [`EventBus::on`]: matching events are forwarded into
    /// an unbounded channel. The forwarder stays registered until the returned
    /// subscription is unsubscribed; sends to a dropped receiver are ignored.
    pub fn stream(&self, pattern: &str) -> (Subscription, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.on(pattern, move |topic, payload| {
            let _ = tx.send(BusEvent { topic: topic.to_owned(), payload: payload.clone() });
        });
        (sub, rx)
    }

    /// Deliver `payload` to every handler whose pattern matches `topic`, in
    /// registration order. Returns the number of handlers invoked.
    pub fn emit(&self, topic: &str, payload: &Value) -> usize {
        let segments: Vec<&str> = topic.split('.').collect();
        let matching: Vec<Arc<Registration>> = lock(&self.registry)
            .entries
            .iter()
            .filter(|r| r.pattern.matches_segments(&segments))
            .cloned()
            .collect();

        let mut delivered = 0;
        for registration in matching {
            if !registration.active.load(Ordering::Acquire) {
                continue;
            }
            delivered += 1;
            let handler = &registration.handler;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(topic, payload))) {
                error!(topic, subscription = registration.id, panic = panic_message(&*panic), "bus: handler panicked");
            }
        }

        trace!(topic, delivered, "bus: emitted");
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).entries.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
#[path = "bus_test.rs"]
mod tests;
