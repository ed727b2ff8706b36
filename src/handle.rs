//! Public node handle: construction, background workers, request handling,
//! and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::catalog::Catalog;
use crate::framing::{self, FrameBuffer, Request};
use crate::net;
use crate::node::GossipNode;
use crate::{GossipConfig, Result};

/// Main API for a running gossip node.
///
/// Construction binds the listener and starts the server and gossip workers;
/// [`shutdown`](Self::shutdown) stops both workers and closes every pooled
/// connection. The shared engine state is reachable through `node`.
pub struct GossipNodeHandle {
    pub node: Arc<GossipNode>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl GossipNodeHandle {
    /// Bind `bind_addr` and start the node.
    ///
    /// While the address is in use, binding retries per
    /// [`GossipConfig::bind_retry_delay`]; any other bind error fails
    /// construction. Port 0 binds an ephemeral port; the chosen address is
    /// available as `node.bind_addr`.
    pub async fn new(bind_addr: SocketAddr, config: Option<GossipConfig>) -> Result<Self> {
        let config = config.unwrap_or_default();
        let listener = net::bind_with_retry(bind_addr, &config).await?;
        let actual_addr = listener.local_addr()?;

        let node = Arc::new(GossipNode::new(actual_addr, config));

        let server_node = node.clone();
        let server_handle = tokio::spawn(async move {
            run_server_loop(server_node, listener).await;
        });

        let gossip_node = node.clone();
        let gossip_handle = tokio::spawn(async move {
            run_gossip_loop(gossip_node).await;
        });

        info!(bind_addr = %actual_addr, "gossip node started");

        Ok(Self {
            node,
            workers: parking_lot::Mutex::new(vec![server_handle, gossip_handle]),
        })
    }

    /// Register a callback for `topic`.
    pub fn subscribe<F>(&self, topic: &str, callback: F)
    where
        F: Fn(&str, &Bytes) + Send + Sync + 'static,
    {
        self.node.subscribe(topic, callback);
    }

    /// Publish `payload` on `topic` to every known peer and locally.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) {
        self.node.publish(topic, payload).await;
    }

    pub fn add_known_node(&self, ip: &str, port: u16) {
        self.node.add_known_node(ip, port);
    }

    pub fn add_known_node_with_topics(&self, ip: &str, port: u16, topics: &[String]) {
        self.node.add_known_node_with_topics(ip, port, topics);
    }

    pub fn remove_known_node(&self, ip: &str, port: u16) {
        self.node.remove_known_node(ip, port);
    }

    /// The catalog as pretty-printed JSON.
    pub fn get_info_json(&self) -> String {
        self.node.get_info_json()
    }

    /// Stop both workers, then close every pooled connection.
    ///
    /// Idempotent: the first call performs the teardown, later calls are
    /// no-ops. After shutdown, `publish` becomes a no-op.
    pub async fn shutdown(&self) {
        if !self.node.begin_shutdown() {
            return;
        }

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(error = %err, "worker exited abnormally");
            }
        }

        let closed = self.node.connection_pool.lock().await.close_all();
        debug!(closed, "gossip node shut down");
    }
}

/// Accept loop: one detached handler task per connection. Exits when the
/// shutdown flag is raised; transient accept errors pause briefly and retry.
#[instrument(skip(node, listener), fields(bind_addr = %node.bind_addr))]
async fn run_server_loop(node: Arc<GossipNode>, listener: TcpListener) {
    loop {
        if node.is_shutdown() {
            break;
        }
        tokio::select! {
            _ = node.shutdown_signal.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    net::configure_stream(&stream, &node.config);
                    let handler_node = node.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, handler_node).await;
                    });
                }
                Err(err) => {
                    if node.is_shutdown() {
                        break;
                    }
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(node.config.accept_retry_pause).await;
                }
            },
        }
    }
    debug!("server loop stopped");
}

/// Read one connection until EOF or error, extracting frames and answering
/// each in arrival order.
#[instrument(skip(stream, node), fields(peer = %peer_addr))]
async fn handle_connection(mut stream: TcpStream, peer_addr: SocketAddr, node: Arc<GossipNode>) {
    let mut frames = FrameBuffer::new();
    let mut read_buf = vec![0u8; node.config.read_buffer_size];

    loop {
        match stream.read(&mut read_buf).await {
            Ok(0) => {
                debug!("peer closed connection");
                break;
            }
            Ok(n) => {
                frames.extend(&read_buf[..n]);
                while let Some(frame) = frames.next_frame() {
                    if let Err(err) = respond(&mut stream, &frame, &node).await {
                        debug!(error = %err, "reply write failed, dropping connection");
                        return;
                    }
                }
            }
            Err(err) => {
                debug!(error = %err, "connection read failed");
                break;
            }
        }
    }
}

/// Dispatch one inbound frame and write its reply. A malformed frame gets a
/// `400` and the connection stays open for the next one.
async fn respond(stream: &mut TcpStream, frame: &Bytes, node: &GossipNode) -> std::io::Result<()> {
    match framing::parse_request(frame) {
        Ok(Request::InfoExchange { body }) => {
            match serde_json::from_slice::<Catalog>(&body) {
                Ok(remote) => node.merge_remote(&remote),
                Err(err) => warn!(error = %err, "unparseable catalog in info exchange"),
            }
            // The /info reply is raw pretty JSON: no status line, no frame
            // terminator. The requester scans for the first '{'.
            stream.write_all(node.get_info_json().as_bytes()).await
        }
        Ok(Request::Publication { topic, payload }) => {
            node.deliver_local(&topic, &payload);
            stream.write_all(framing::REPLY_OK).await
        }
        Err(err) => {
            debug!(error = %err, "malformed frame");
            stream.write_all(framing::REPLY_BAD_REQUEST).await
        }
    }
}

/// Gossip worker: every tick, probe one random known peer and merge its view.
/// The tick sleeps in short slices so shutdown is observed promptly.
#[instrument(skip(node), fields(bind_addr = %node.bind_addr))]
async fn run_gossip_loop(node: Arc<GossipNode>) {
    let slices = node.config.gossip_poll_slices();
    'ticks: loop {
        for _ in 0..slices {
            if node.is_shutdown() {
                break 'ticks;
            }
            tokio::time::sleep(node.config.shutdown_poll_interval).await;
        }

        let Some(target) = node.pick_gossip_target() else {
            continue;
        };
        if let Err(err) = exchange_info(&node, target).await {
            debug!(peer = %target, error = %err, "info exchange failed");
        }
    }
    debug!("gossip loop stopped");
}

/// One-shot catalog exchange with `target` over a fresh connection: send the
/// local catalog, merge whatever comes back, drop the socket.
async fn exchange_info(node: &GossipNode, target: SocketAddr) -> Result<()> {
    let request = framing::encode_info_request(node.snapshot_json().as_bytes());
    let mut stream = net::dial(target, &node.config).await?;
    stream.write_all(&request).await?;

    // The reply carries no terminator; take the first burst and find the
    // JSON in it.
    let mut reply = vec![0u8; node.config.read_buffer_size];
    let n = stream.read(&mut reply).await?;
    let Some(start) = reply[..n].iter().position(|&b| b == b'{') else {
        return Ok(());
    };
    let remote: Catalog = serde_json::from_slice(&reply[start..n])?;
    node.merge_remote(&remote);
    Ok(())
}
