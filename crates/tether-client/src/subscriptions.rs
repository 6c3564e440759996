//! Event-type to subscriber fan-out.
//!
//! Callbacks for one event type run synchronously in subscription order.
//! A callback that returns an error or panics is reported to the error sink
//! and the remaining callbacks still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde_json::Value;
use tether_core::{SubscriptionId, TetherError};
use tracing::debug;

use crate::sink::{ErrorSink, TracingErrorSink};

/// Outcome of one callback invocation.
pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Subscriber callback. Receives the frame's `data`.
pub type Callback = Arc<dyn Fn(&Value) -> CallbackResult + Send + Sync>;

struct Entry {
    id: SubscriptionId,
    callback: Callback,
}

/// Subscribers of one event type in insertion order. Removal leaves a
/// tombstone; the slots are compacted once tombstones outnumber live
/// entries, which keeps subscribe and unsubscribe amortized `O(1)`.
#[derive(Default)]
struct Slots {
    entries: Vec<Option<Entry>>,
    live: usize,
}

impl Slots {
    fn push(&mut self, entry: Entry) -> usize {
        self.entries.push(Some(entry));
        self.live += 1;
        self.entries.len() - 1
    }

    fn remove(&mut self, slot: usize) -> bool {
        match self.entries.get_mut(slot).and_then(Option::take) {
            Some(_) => {
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    fn needs_compaction(&self) -> bool {
        self.entries.len() > 2 * self.live
    }

    fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter().flatten()
    }
}

/// Registry of subscriptions keyed by event type.
pub struct SubscriptionRegistry {
    by_type: HashMap<String, Slots>,
    index: HashMap<SubscriptionId, (String, usize)>,
    sink: Arc<dyn ErrorSink>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("event_types", &self.by_type.len())
            .field("subscriptions", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(TracingErrorSink))
    }
}

impl SubscriptionRegistry {
    /// Empty registry reporting callback failures to `sink`.
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            by_type: HashMap::new(),
            index: HashMap::new(),
            sink,
        }
    }

    /// Replace the error sink.
    pub fn set_sink(&mut self, sink: Arc<dyn ErrorSink>) {
        self.sink = sink;
    }

    /// Register `callback` for `event_type` under a fresh ID.
    pub fn subscribe(&mut self, event_type: impl Into<String>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.subscribe_with_id(id.clone(), event_type, callback);
        id
    }

    /// Register `callback` under a caller-chosen ID. An existing
    /// subscription with the same ID is replaced.
    pub fn subscribe_with_id(
        &mut self,
        id: SubscriptionId,
        event_type: impl Into<String>,
        callback: Callback,
    ) {
        let _ = self.unsubscribe(&id);
        let event_type = event_type.into();
        debug!(subscription_id = %id, event_type, "subscribed");
        let slot = self.by_type.entry(event_type.clone()).or_default().push(Entry {
            id: id.clone(),
            callback,
        });
        let _ = self.index.insert(id, (event_type, slot));
    }

    /// Remove a subscription. Returns whether one was removed.
    pub fn unsubscribe(&mut self, id: &SubscriptionId) -> bool {
        let Some((event_type, slot)) = self.index.remove(id) else {
            return false;
        };
        if let Some(slots) = self.by_type.get_mut(&event_type) {
            let _ = slots.remove(slot);
            if slots.live == 0 {
                let _ = self.by_type.remove(&event_type);
            } else if slots.needs_compaction() {
                slots.entries.retain(Option::is_some);
                for (position, entry) in slots.entries.iter().flatten().enumerate() {
                    if let Some(location) = self.index.get_mut(&entry.id) {
                        location.1 = position;
                    }
                }
            }
        }
        debug!(subscription_id = %id, event_type, "unsubscribed");
        true
    }

    /// Invoke every callback for `event_type` in subscription order.
    /// Returns how many callbacks ran.
    pub fn dispatch(&self, event_type: &str, data: &Value) -> usize {
        let Some(slots) = self.by_type.get(event_type) else {
            return 0;
        };
        let targets: Vec<(SubscriptionId, Callback)> = slots
            .iter()
            .map(|e| (e.id.clone(), Arc::clone(&e.callback)))
            .collect();

        for (id, callback) in &targets {
            let message = match catch_unwind(AssertUnwindSafe(|| callback(data))) {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => panic_message(payload.as_ref()),
            };
            self.sink.report(&TetherError::Subscriber {
                event_type: event_type.to_owned(),
                subscription_id: id.clone(),
                message,
            });
        }
        targets.len()
    }

    /// Remove every subscription.
    pub fn clear(&mut self) {
        self.by_type.clear();
        self.index.clear();
    }

    /// Total number of subscriptions.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of subscriptions for one event type.
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.by_type.get(event_type).map_or(0, |slots| slots.live)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}
