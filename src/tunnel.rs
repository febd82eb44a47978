// ABOUTME: Local TCP port forwarding: listener lifecycle and tunnel relays.
// ABOUTME: Relays copy bytes both ways until either side closes, then both are shut down.

use crate::error::{Error, Result};
use crate::transport::{BoxedDuplex, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;

/// Parameters for [`Connection::forward_local`].
///
/// [`Connection::forward_local`]: crate::Connection::forward_local
#[derive(Debug, Clone)]
pub struct LocalForward {
    /// Local port to listen on. Port 0 binds an ephemeral port; see
    /// [`PortForward::local_addr`].
    pub local_port: u16,
    /// Remote port to forward to. Defaults to `local_port`.
    pub remote_port: Option<u16>,
    /// Remote host serving the forwarded port, as seen from the server.
    pub remote_host: String,
    /// Local interface to bind.
    pub local_host: String,
}

impl LocalForward {
    pub fn port(local_port: u16) -> Self {
        Self {
            local_port,
            remote_port: None,
            remote_host: "localhost".to_string(),
            local_host: "127.0.0.1".to_string(),
        }
    }

    pub fn remote_port(mut self, port: u16) -> Self {
        self.remote_port = Some(port);
        self
    }

    pub fn remote_host(mut self, host: impl Into<String>) -> Self {
        self.remote_host = host.into();
        self
    }

    pub fn local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }
}

/// Handle to a running forward.
///
/// Dropping the handle signals shutdown best-effort; [`PortForward::stop`]
/// additionally waits until no relay work remains.
pub struct PortForward {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    stopped: Arc<Notify>,
}

impl PortForward {
    /// Address the listener actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and wait for full teardown: no new accepts, every
    /// in-flight relay joined, listening socket closed. In-flight
    /// transfers are not interrupted; this waits for their natural
    /// completion, indefinitely. A bounded teardown timeout would be an
    /// extension, not current behavior.
    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.stopped.notified().await;
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Bind the local listening socket and start the accept loop.
///
/// Bind failures surface here; everything after that is background work.
pub(crate) async fn start(transport: Arc<dyn Transport>, fwd: LocalForward) -> Result<PortForward> {
    let remote_port = fwd.remote_port.unwrap_or(fwd.local_port);
    let socket = TcpListener::bind((fwd.local_host.as_str(), fwd.local_port))
        .await
        .map_err(|e| {
            Error::Forward(format!(
                "failed to bind {}:{}: {e}",
                fwd.local_host, fwd.local_port
            ))
        })?;
    let local_addr = socket.local_addr()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let stopped = Arc::new(Notify::new());

    let listener = Listener {
        socket,
        transport,
        remote_host: fwd.remote_host,
        remote_port,
        local_host: fwd.local_host,
        local_port: fwd.local_port,
        shutdown: shutdown.clone(),
        stopped: stopped.clone(),
    };
    tokio::spawn(listener.run());

    tracing::debug!(%local_addr, remote_port, "port forwarding started");
    Ok(PortForward {
        local_addr,
        shutdown,
        stopped,
    })
}

/// Owns the listening socket and the lifecycle of every relay it spawns.
struct Listener {
    socket: TcpListener,
    transport: Arc<dyn Transport>,
    remote_host: String,
    remote_port: u16,
    local_host: String,
    local_port: u16,
    shutdown: Arc<AtomicBool>,
    stopped: Arc<Notify>,
}

impl Listener {
    async fn run(self) {
        let mut relays = JoinSet::new();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Accept with a timeout so the shutdown flag is re-checked on
            // a bounded interval.
            let accepted = tokio::select! {
                result = self.socket.accept() => result,
                _ = tokio::time::sleep(Duration::from_millis(100)) => continue,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    if !self.shutdown.load(Ordering::SeqCst) {
                        tracing::warn!("accept error on forwarded port: {e}");
                    }
                    break;
                }
            };

            // A connection racing the shutdown signal is dropped, never
            // relayed.
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self
                .transport
                .open_direct_tcpip(
                    &self.remote_host,
                    self.remote_port,
                    &self.local_host,
                    self.local_port,
                )
                .await
            {
                Ok(channel) => {
                    tracing::debug!(%peer, "relaying forwarded connection");
                    relays.spawn(relay(stream, channel));
                }
                Err(e) => {
                    // Local to this accept; the listener keeps going.
                    tracing::warn!(%peer, "failed to open forwarding channel: {e}");
                }
            }
        }

        // Draining: wait for every relay to finish, then release the port.
        while relays.join_next().await.is_some() {}
        drop(self.socket);
        self.stopped.notify_one();
    }
}

/// Copy bytes between a local socket and a remote channel until either
/// side reaches end-of-stream or errors, then close both.
async fn relay(mut local: TcpStream, mut channel: BoxedDuplex) {
    let mut lbuf = vec![0u8; 16384];
    let mut cbuf = vec![0u8; 16384];

    loop {
        tokio::select! {
            r = local.read(&mut lbuf) => match r {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = channel.write_all(&lbuf[..n]).await {
                        tracing::debug!("relay write to channel failed: {e}");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("relay read from local socket failed: {e}");
                    break;
                }
            },
            r = channel.read(&mut cbuf) => match r {
                Ok(0) => break,
                Ok(n) => {
                    if let Err(e) = local.write_all(&cbuf[..n]).await {
                        tracing::debug!("relay write to local socket failed: {e}");
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("relay read from channel failed: {e}");
                    break;
                }
            },
        }
    }

    // Both sides close regardless of which one terminated.
    let _ = channel.shutdown().await;
    let _ = local.shutdown().await;
}
