//! Cached outbound connections for repeated publishes.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::{net, GossipConfig, Result};

/// Caches one outbound TCP stream per peer, keyed by address.
///
/// Every stored stream connected successfully at insertion time; the first
/// failed send closes and evicts it. The pool sits behind the node's async
/// mutex and sends happen under that lock, so writes on one socket never
/// interleave.
pub struct ConnectionPool {
    connections: HashMap<SocketAddr, TcpStream>,
    config: GossipConfig,
}

impl ConnectionPool {
    pub fn new(config: GossipConfig) -> Self {
        Self {
            connections: HashMap::new(),
            config,
        }
    }

    /// Send one frame to `addr`, dialing a fresh connection if none is
    /// cached. On a write error the pooled stream is closed and removed
    /// before the error is returned; the next send re-dials.
    pub async fn send_frame(&mut self, addr: SocketAddr, frame: &[u8]) -> Result<()> {
        let stream = match self.connections.entry(addr) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let stream = net::dial(addr, &self.config).await?;
                debug!(peer = %addr, "opened pooled connection");
                entry.insert(stream)
            }
        };

        if let Err(err) = stream.write_all(frame).await {
            self.invalidate(addr);
            return Err(err.into());
        }
        Ok(())
    }

    /// Close and drop the cached stream for `addr`, if any.
    pub fn invalidate(&mut self, addr: SocketAddr) {
        if self.connections.remove(&addr).is_some() {
            debug!(peer = %addr, "dropped pooled connection");
        }
    }

    /// Close every pooled stream. Returns how many were open.
    pub fn close_all(&mut self) -> usize {
        let count = self.connections.len();
        self.connections.clear();
        count
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn has_connection(&self, addr: &SocketAddr) -> bool {
        self.connections.contains_key(addr)
    }
}
