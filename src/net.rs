use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

use crate::{GossipConfig, GossipError, Result};

/// Bind a listener with `SO_REUSEADDR`, retrying while the address is in use.
///
/// Only `EADDRINUSE` counts as transient. Anything else (bad address, missing
/// permission) is a configuration problem and propagates immediately.
pub(crate) async fn bind_with_retry(
    addr: SocketAddr,
    config: &GossipConfig,
) -> Result<TcpListener> {
    let mut attempts: u32 = 0;
    loop {
        match listen_reuseaddr(addr) {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                attempts += 1;
                if let Some(limit) = config.bind_retry_limit {
                    if attempts >= limit {
                        return Err(GossipError::Bind { addr, source: err });
                    }
                }
                warn!(addr = %addr, attempt = attempts, "listen address in use, retrying bind");
                tokio::time::sleep(config.bind_retry_delay).await;
            }
            Err(err) => return Err(GossipError::Bind { addr, source: err }),
        }
    }
}

fn listen_reuseaddr(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

/// Dial a peer with the configured connect timeout and socket options applied.
pub(crate) async fn dial(addr: SocketAddr, config: &GossipConfig) -> Result<TcpStream> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| GossipError::Timeout)??;
    configure_stream(&stream, config);
    Ok(stream)
}

/// Apply per-stream socket options: NODELAY always, keepalive when configured.
pub(crate) fn configure_stream(stream: &TcpStream, config: &GossipConfig) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "failed to set TCP_NODELAY");
    }

    let Some(keepalive) = config.tcp_keepalive.as_ref() else {
        return;
    };

    let sock = SockRef::from(stream);
    let ka = TcpKeepalive::new()
        .with_time(keepalive.idle)
        .with_interval(keepalive.interval);
    if let Err(e) = sock.set_tcp_keepalive(&ka) {
        warn!(error = %e, "failed to set TCP keepalive");
    }
}
