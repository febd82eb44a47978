// ABOUTME: Transport and Dialer traits decoupling connections from russh.
// ABOUTME: A Transport is an authenticated multiplexed session; a Dialer produces one.

mod russh;

pub use self::russh::RusshDialer;

use crate::error::{Error, Result};
use crate::runner::{CommandOutput, RunOptions};
use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Marker for duplex byte streams: forwarded channels, gateway sockets.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// A boxed duplex stream, handed to relays or substituted for a direct
/// network dial when a gateway is in play.
pub type BoxedDuplex = Box<dyn Duplex>;

/// An authenticated, multiplexed session capable of opening sub-channels.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether the underlying session is still alive.
    fn is_active(&self) -> bool;

    /// Open a `direct-tcpip` channel to `(host, port)`, recording
    /// `(src_host, src_port)` as the originating address.
    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        src_host: &str,
        src_port: u16,
    ) -> Result<BoxedDuplex>;

    /// Run a command over a session channel, capturing output and exit
    /// status.
    async fn exec(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput>;

    /// Open an SFTP session. Transports without file-transfer support
    /// keep the default.
    async fn open_sftp(&self) -> Result<SftpSession> {
        Err(Error::Unsupported("sftp"))
    }

    /// Tear down the session.
    async fn close(&self) -> Result<()>;
}

/// Parameters for an authenticated dial.
#[derive(Debug, Clone)]
pub struct DialParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_path: Option<PathBuf>,
}

/// Produces transports. When `via` is present it is used as the socket
/// instead of a direct TCP connection (gateway substitution).
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, params: &DialParams, via: Option<BoxedDuplex>)
    -> Result<Arc<dyn Transport>>;
}
