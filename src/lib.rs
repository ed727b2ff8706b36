//! meshpub: a decentralized pub/sub gossip node over plain TCP.
//!
//! Each node serves publications and catalog exchanges on a listening socket
//! while pushing its own publications to every peer it knows about. Peers
//! learn about each other by periodically exchanging catalogs: once a second
//! the gossip worker picks a random known peer, sends it the local catalog and
//! merges the reply, so topic interest converges across the mesh without any
//! central registry.
//!
//! Delivery is strictly best-effort. There are no retries, no
//! acknowledgements and no ordering across peers; a publication is written
//! once to each pooled connection and forgotten. The mesh is assumed trusted:
//! no transport encryption, no authentication.
//!
//! ```no_run
//! use meshpub::GossipNodeHandle;
//!
//! # async fn run() -> meshpub::Result<()> {
//! let node = GossipNodeHandle::new("127.0.0.1:0".parse().unwrap(), None).await?;
//! node.subscribe("telemetry", |topic, payload| {
//!     println!("{topic}: {} bytes", payload.len());
//! });
//! node.add_known_node("127.0.0.1", 5000);
//! node.publish("telemetry", "hello").await;
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod connection_pool;
pub mod framing;
pub mod handle;
mod net;
pub mod node;
pub mod subscriptions;

use std::net::SocketAddr;

use thiserror::Error;

pub use catalog::{Catalog, PeerRecord};
pub use config::{GossipConfig, TcpKeepaliveConfig};
pub use handle::GossipNodeHandle;
pub use node::GossipNode;
pub use subscriptions::SubscriberCallback;

/// Errors surfaced by fallible node operations.
///
/// Publishing and gossip are fire-and-forget: their failures are logged and
/// swallowed, never returned to the caller.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Binding the listener failed permanently: either a non-transient error,
    /// or the retry cap was reached while the address stayed in use.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("malformed catalog JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection attempt timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, GossipError>;
