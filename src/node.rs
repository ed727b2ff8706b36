//! Shared engine state for one gossip node.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::connection_pool::ConnectionPool;
use crate::framing;
use crate::subscriptions::{SubscriberCallback, SubscriptionRegistry};
use crate::GossipConfig;

/// State shared by the public handle, the server loop, the gossip loop and
/// every per-connection handler.
///
/// Lock discipline: the catalog mutex is only ever held for in-memory work,
/// never across socket I/O or user callbacks. The pool mutex is async and is
/// held across sends, which keeps each pooled socket single-writer.
pub struct GossipNode {
    /// Address the listener actually bound; doubles as the catalog identity.
    pub bind_addr: SocketAddr,
    pub config: GossipConfig,
    catalog: Mutex<Catalog>,
    subscriptions: SubscriptionRegistry,
    pub(crate) connection_pool: tokio::sync::Mutex<ConnectionPool>,
    shutdown: AtomicBool,
    pub(crate) shutdown_signal: Notify,
}

impl GossipNode {
    pub(crate) fn new(bind_addr: SocketAddr, config: GossipConfig) -> Self {
        Self {
            bind_addr,
            catalog: Mutex::new(Catalog::new(bind_addr.ip().to_string(), bind_addr.port())),
            subscriptions: SubscriptionRegistry::new(),
            connection_pool: tokio::sync::Mutex::new(ConnectionPool::new(config.clone())),
            shutdown: AtomicBool::new(false),
            shutdown_signal: Notify::new(),
            config,
        }
    }

    /// Register a callback for `topic` and declare the topic in the local
    /// catalog record, so gossip advertises the interest to the mesh.
    pub fn subscribe<F>(&self, topic: &str, callback: F)
    where
        F: Fn(&str, &Bytes) + Send + Sync + 'static,
    {
        let callback: SubscriberCallback = Arc::new(callback);
        self.subscriptions.add(topic, callback);
        self.catalog.lock().declare_topic(topic);
    }

    /// Fan a publication out to every known peer, then deliver it locally.
    ///
    /// Best-effort by contract: a peer that cannot be dialed is skipped, a
    /// failing send evicts its pooled connection, and nothing is retried or
    /// reported back to the caller.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) {
        if self.is_shutdown() {
            debug!(topic, "publish after shutdown ignored");
            return;
        }
        let payload = payload.into();

        let peers: Vec<(String, u16)> = {
            let catalog = self.catalog.lock();
            catalog
                .known
                .iter()
                .map(|n| (n.ip.clone(), n.port))
                .collect()
        };

        for (ip, port) in peers {
            let Some(addr) = peer_addr(&ip, port) else {
                debug!(peer_ip = %ip, peer_port = port, "skipping peer with unparseable address");
                continue;
            };
            let frame = framing::encode_publication(addr, topic, &payload);
            let mut pool = self.connection_pool.lock().await;
            if let Err(err) = pool.send_frame(addr, &frame).await {
                debug!(peer = %addr, error = %err, "publish send failed, peer skipped");
            }
        }

        self.deliver_local(topic, &payload);
    }

    /// Run the local callbacks for `topic` on the calling task, in
    /// registration order. Returns how many callbacks fired.
    pub fn deliver_local(&self, topic: &str, payload: &Bytes) -> usize {
        self.subscriptions.deliver(topic, payload)
    }

    pub fn add_known_node(&self, ip: &str, port: u16) {
        self.catalog.lock().add_known(ip, port, &[]);
    }

    pub fn add_known_node_with_topics(&self, ip: &str, port: u16, topics: &[String]) {
        self.catalog.lock().add_known(ip, port, topics);
    }

    /// Forget a peer. Publications and gossip stop reaching it immediately;
    /// any pooled connection to it lingers until its next failed send.
    pub fn remove_known_node(&self, ip: &str, port: u16) {
        self.catalog.lock().remove_known(ip, port);
    }

    pub(crate) fn merge_remote(&self, remote: &Catalog) {
        self.catalog.lock().merge_remote(remote);
    }

    /// Point-in-time copy of the catalog.
    pub fn snapshot(&self) -> Catalog {
        self.catalog.lock().clone()
    }

    /// The catalog as pretty-printed JSON, the `/info` reply body.
    pub fn get_info_json(&self) -> String {
        self.catalog.lock().to_pretty_json()
    }

    /// Compact catalog JSON used as the gossip request body.
    pub(crate) fn snapshot_json(&self) -> String {
        self.catalog.lock().to_json()
    }

    /// Number of currently pooled outbound connections.
    pub async fn pooled_connection_count(&self) -> usize {
        self.connection_pool.lock().await.connection_count()
    }

    /// Pick a uniformly random known peer to gossip with. The pick happens
    /// under the catalog lock; the caller performs all I/O after release.
    pub(crate) fn pick_gossip_target(&self) -> Option<SocketAddr> {
        let catalog = self.catalog.lock();
        if catalog.known.is_empty() {
            return None;
        }
        let at = rand::random::<u64>() as usize % catalog.known.len();
        let node = &catalog.known[at];
        let addr = node.addr();
        if addr.is_none() {
            warn!(peer_ip = %node.ip, peer_port = node.port, "known peer has unparseable address");
        }
        addr
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Flip the shutdown flag and wake the accept loop. True only for the
    /// first caller, which makes `shutdown` idempotent.
    pub(crate) fn begin_shutdown(&self) -> bool {
        let first = !self.shutdown.swap(true, Ordering::SeqCst);
        if first {
            self.shutdown_signal.notify_one();
        }
        first
    }
}

fn peer_addr(ip: &str, port: u16) -> Option<SocketAddr> {
    ip.parse().ok().map(|ip| SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn node() -> GossipNode {
        GossipNode::new("127.0.0.1:5100".parse().unwrap(), GossipConfig::default())
    }

    #[test]
    fn subscribe_declares_the_topic() {
        let node = node();
        node.subscribe("metrics", |_, _| {});
        assert_eq!(node.snapshot().local.subscribed_topics, ["metrics"]);
        assert!(node.get_info_json().contains("metrics"));
    }

    #[test]
    fn known_nodes_round_trip_through_the_catalog() {
        let node = node();
        node.add_known_node_with_topics("127.0.0.1", 5105, &["a".into(), "b".into()]);
        node.add_known_node("127.0.0.1", 5105);
        assert_eq!(node.snapshot().known.len(), 1);

        node.remove_known_node("127.0.0.1", 5105);
        assert!(node.snapshot().known.is_empty());
    }

    #[test]
    fn gossip_target_requires_a_known_peer() {
        let node = node();
        assert!(node.pick_gossip_target().is_none());

        node.add_known_node("127.0.0.1", 5105);
        assert_eq!(
            node.pick_gossip_target(),
            Some("127.0.0.1:5105".parse().unwrap())
        );
    }

    #[test]
    fn begin_shutdown_fires_once() {
        let node = node();
        assert!(!node.is_shutdown());
        assert!(node.begin_shutdown());
        assert!(!node.begin_shutdown());
        assert!(node.is_shutdown());
    }

    #[tokio::test]
    async fn publish_without_peers_still_delivers_locally() {
        let node = node();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            node.subscribe("t", move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        node.publish("t", "payload").await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_ignored() {
        let node = node();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            node.subscribe("t", move |_, _| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        node.begin_shutdown();
        node.publish("t", "payload").await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
