// ABOUTME: Gateway resolution for connections.
// ABOUTME: Obtains a socket via a proxy subprocess or another connection's channel.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::BoxedDuplex;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// How a connection obtains its underlying socket when not dialing
/// directly.
#[derive(Clone)]
pub enum Gateway {
    /// Tunnel through another connection's `direct-tcpip` channel.
    Chain(Arc<Connection>),
    /// Spawn a subprocess speaking the SSH wire protocol on its stdio.
    /// `%h` and `%p` expand to the destination host and port.
    ProxyCommand(String),
}

impl Gateway {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Gateway::Chain(_) => "direct-tcpip",
            Gateway::ProxyCommand(_) => "proxy",
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gateway::Chain(conn) => f.debug_tuple("Chain").field(&conn.host_string()).finish(),
            Gateway::ProxyCommand(cmd) => f.debug_tuple("ProxyCommand").field(cmd).finish(),
        }
    }
}

/// Resolve a gateway into a socket for dialing `host:port`.
///
/// Nothing is spawned or opened before this point; constructing a
/// connection with a gateway has no side effects.
pub(crate) async fn resolve(gateway: &Gateway, host: &str, port: u16) -> Result<BoxedDuplex> {
    match gateway {
        Gateway::ProxyCommand(template) => {
            let rendered = template
                .replace("%h", host)
                .replace("%p", &port.to_string());
            let mut child = Command::new("sh")
                .arg("-c")
                .arg(&rendered)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    Error::Gateway(format!("failed to spawn proxy command {rendered:?}: {e}"))
                })?;
            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| Error::Gateway("proxy command stdin unavailable".to_string()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| Error::Gateway("proxy command stdout unavailable".to_string()))?;
            tracing::debug!(command = %rendered, "spawned proxy command gateway");
            Ok(Box::new(ProxyStream {
                _child: child,
                stdout,
                stdin,
            }))
        }
        Gateway::Chain(conn) => {
            // open() is idempotent, so this is safe when already open.
            conn.open().await?;
            tracing::debug!(gateway = %conn.host_string(), "opening direct-tcpip channel via gateway");
            // Empty source address: required by the forwarding encoding,
            // meaningless on this side.
            conn.transport()?.open_direct_tcpip(host, port, "", 0).await
        }
    }
}

/// A proxy subprocess's stdio presented as one duplex stream. Holds the
/// child so the process is reaped (and killed) when the stream goes away.
struct ProxyStream {
    _child: Child,
    stdout: ChildStdout,
    stdin: ChildStdin,
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
