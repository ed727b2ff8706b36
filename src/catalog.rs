//! Peer catalog: the node's view of itself and every peer it knows about.
//!
//! The JSON shape is part of the wire protocol and pinned through serde
//! renames: `"self"`, `"known_nodes"`, and a capitalized `"IP"` per record.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// One peer's identity and topic interests.
///
/// Identity is the `(ip, port)` pair; two records with equal identity describe
/// the same peer and merge by topic union. Topics keep their insertion order
/// and never repeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(rename = "IP")]
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub subscribed_topics: Vec<String>,
}

impl PeerRecord {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            subscribed_topics: Vec::new(),
        }
    }

    /// Identity comparison.
    pub fn is(&self, ip: &str, port: u16) -> bool {
        self.port == port && self.ip == ip
    }

    /// The peer's dialable address, if its `ip` field parses as one.
    pub fn addr(&self) -> Option<SocketAddr> {
        self.ip.parse().ok().map(|ip| SocketAddr::new(ip, self.port))
    }

    fn add_topic(&mut self, topic: &str) {
        if !self.subscribed_topics.iter().any(|t| t == topic) {
            self.subscribed_topics.push(topic.to_owned());
        }
    }
}

/// A peer's catalog: its own record plus everything it has learned.
///
/// Each identity appears at most once in `known`, and the local identity never
/// does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(rename = "self")]
    pub local: PeerRecord,
    #[serde(rename = "known_nodes", default)]
    pub known: Vec<PeerRecord>,
}

impl Catalog {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            local: PeerRecord::new(ip, port),
            known: Vec::new(),
        }
    }

    /// Record a peer, merging topic interests by identity union. New
    /// identities append in arrival order; existing ones update in place.
    /// Entries matching the local identity are dropped, so a gossip loop can
    /// never teach a node about itself.
    pub fn add_known(&mut self, ip: &str, port: u16, topics: &[String]) {
        if self.local.is(ip, port) {
            return;
        }

        if let Some(existing) = self.known.iter_mut().find(|n| n.is(ip, port)) {
            for topic in topics {
                existing.add_topic(topic);
            }
            return;
        }

        let mut record = PeerRecord::new(ip, port);
        for topic in topics {
            record.add_topic(topic);
        }
        self.known.push(record);
    }

    /// Fold a remote catalog into this one: the remote's own record first,
    /// then everything it knows.
    pub fn merge_remote(&mut self, remote: &Catalog) {
        self.add_known(
            &remote.local.ip,
            remote.local.port,
            &remote.local.subscribed_topics,
        );
        for node in &remote.known {
            self.add_known(&node.ip, node.port, &node.subscribed_topics);
        }
    }

    /// Remove a peer record by identity.
    pub fn remove_known(&mut self, ip: &str, port: u16) {
        self.known.retain(|n| !n.is(ip, port));
    }

    /// Ensure `topic` is declared in the local record.
    pub fn declare_topic(&mut self, topic: &str) {
        self.local.add_topic(topic);
    }

    pub fn get_known(&self, ip: &str, port: u16) -> Option<&PeerRecord> {
        self.known.iter().find(|n| n.is(ip, port))
    }

    /// Compact JSON, the gossip request body format.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("catalog serialization cannot fail")
    }

    /// Pretty JSON with 4-space indentation, the `/info` reply format.
    pub fn to_pretty_json(&self) -> String {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)
            .expect("catalog serialization cannot fail");
        String::from_utf8(out).expect("serde_json emits valid UTF-8")
    }
}
