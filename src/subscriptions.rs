//! Local subscription registry and dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

/// Callback invoked for every publication delivered to a subscribed topic.
pub type SubscriberCallback = Arc<dyn Fn(&str, &Bytes) + Send + Sync + 'static>;

/// Maps topics to their callbacks, in registration order.
///
/// Subscribes (writes) may race with inbound delivery (reads) from handler
/// tasks. Delivery snapshots the callback list under the read lock and runs
/// the callbacks with no lock held, so a slow or panicking subscriber cannot
/// block registration or poison the map.
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: RwLock<HashMap<String, Vec<SubscriberCallback>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `topic`. Duplicate registrations are kept and
    /// each fires on every delivery.
    pub fn add(&self, topic: &str, callback: SubscriberCallback) {
        self.topics
            .write()
            .entry(topic.to_owned())
            .or_default()
            .push(callback);
    }

    /// Invoke every callback registered for `topic`, in registration order,
    /// on the calling task. Returns the number of callbacks invoked.
    pub fn deliver(&self, topic: &str, payload: &Bytes) -> usize {
        let callbacks: Vec<SubscriberCallback> = match self.topics.read().get(topic) {
            Some(list) => list.clone(),
            None => return 0,
        };

        for callback in &callbacks {
            callback(topic, payload);
        }
        trace!(topic, delivered = callbacks.len(), "local delivery");
        callbacks.len()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.read().contains_key(topic)
    }
}
