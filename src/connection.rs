// ABOUTME: Server connections: shorthand parsing, lifecycle, execution, forwarding.
// ABOUTME: Create (no I/O), open, run/sudo/get/put, forward_local, close.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{self, Gateway};
use crate::runner::{CommandOutput, Remote, RunOptions};
use crate::transfer::Transfer;
use crate::transport::{DialParams, Dialer, RusshDialer, Transport};
use crate::tunnel::{self, LocalForward, PortForward};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use russh_sftp::client::SftpSession;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A connection to one remote server, with methods for command execution,
/// file transfer, and local port forwarding.
///
/// Lifecycle: construction records parameters and performs no I/O;
/// [`open`](Connection::open) dials and authenticates (idempotent);
/// [`close`](Connection::close) releases the transport (no-op when not
/// connected). Methods like [`run`](Connection::run) open automatically.
pub struct Connection {
    host: String,
    user: String,
    port: u16,
    key_path: Option<PathBuf>,
    config: Config,
    gateway: Option<Gateway>,
    dialer: Arc<dyn Dialer>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    // Serializes concurrent opens so exactly one dial happens.
    open_lock: tokio::sync::Mutex<()>,
    // SFTP session, created on first use and reused thereafter.
    sftp: tokio::sync::Mutex<Option<Arc<SftpSession>>>,
}

impl Connection {
    /// Build a connection from a host string, with defaults for
    /// everything else. The host string may carry `user@` and `:port`
    /// shorthand.
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Self::builder(host).build()
    }

    pub fn builder(host: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder {
            host: host.into(),
            user: None,
            port: None,
            key_path: None,
            config: None,
            gateway: None,
            dialer: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gateway(&self) -> Option<&Gateway> {
        self.gateway.as_ref()
    }

    /// Normalized `user@host:port` identity, used to key group results.
    pub fn host_string(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    /// Whether this connection is actually open: a transport handle
    /// exists and reports itself active.
    pub fn is_connected(&self) -> bool {
        self.transport.lock().as_ref().is_some_and(|t| t.is_active())
    }

    pub(crate) fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.transport.lock().clone().ok_or(Error::NotConnected)
    }

    /// Dial and authenticate. No-op when already connected. Resolving a
    /// configured gateway (opening the nested connection, or spawning the
    /// proxy subprocess) happens here, never at construction.
    ///
    /// Boxed because gateway chains recurse through nested opens.
    pub fn open(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let _guard = self.open_lock.lock().await;
            if self.is_connected() {
                return Ok(());
            }

            let via = match &self.gateway {
                Some(gw) => Some(gateway::resolve(gw, &self.host, self.port).await?),
                None => None,
            };

            let params = DialParams {
                host: self.host.clone(),
                port: self.port,
                user: self.user.clone(),
                key_path: self.key_path.clone(),
            };
            let transport = self.dialer.dial(&params, via).await?;
            *self.transport.lock() = Some(transport);
            tracing::debug!(host = %self.host_string(), "connection opened");
            Ok(())
        })
    }

    /// Release the transport, if open. Errors from an unhealthy transport
    /// are swallowed and logged at debug level.
    pub async fn close(&self) {
        let transport = self.transport.lock().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                tracing::debug!(host = %self.host_string(), "error closing transport: {e}");
            }
        }
        self.sftp.lock().await.take();
    }

    /// Execute a shell command on the remote end, opening first if
    /// needed.
    pub async fn run(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        Remote::new(self).run(command, opts).await
    }

    /// Execute a shell command via sudo on the remote end.
    pub async fn sudo(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        Remote::new(self).sudo(command, opts).await
    }

    /// Download a remote file.
    pub async fn get(&self, remote: impl AsRef<Path>, local: impl AsRef<Path>) -> Result<()> {
        Transfer::new(self).get(remote.as_ref(), local.as_ref()).await
    }

    /// Upload a local file.
    pub async fn put(&self, local: impl AsRef<Path>, remote: impl AsRef<Path>) -> Result<()> {
        Transfer::new(self).put(local.as_ref(), remote.as_ref()).await
    }

    pub(crate) async fn sftp(&self) -> Result<Arc<SftpSession>> {
        self.open().await?;
        let mut slot = self.sftp.lock().await;
        if let Some(sftp) = slot.as_ref() {
            return Ok(sftp.clone());
        }
        let sftp = Arc::new(self.transport()?.open_sftp().await?);
        *slot = Some(sftp.clone());
        Ok(sftp)
    }

    /// Make a local port behave as a proxy for a port on the remote side
    /// of this connection, for as long as the returned handle lives.
    ///
    /// Opens the connection first if needed. See [`PortForward::stop`]
    /// for teardown guarantees; prefer
    /// [`with_forward_local`](Connection::with_forward_local) when the
    /// forward should be scoped to a block of work.
    pub async fn forward_local(&self, fwd: LocalForward) -> Result<PortForward> {
        self.open().await?;
        tunnel::start(self.transport()?, fwd).await
    }

    /// Scoped variant of [`forward_local`](Connection::forward_local):
    /// starts the forward, awaits `body` (called with the bound local
    /// address), then tears the forward down before returning the body's
    /// output — on every exit path, including when the body returns an
    /// error of its own.
    pub async fn with_forward_local<F, Fut, T>(&self, fwd: LocalForward, body: F) -> Result<T>
    where
        F: FnOnce(SocketAddr) -> Fut,
        Fut: Future<Output = T>,
    {
        let forward = self.forward_local(fwd).await?;
        let addr = forward.local_addr();
        let out = body(addr).await;
        forward.stop().await;
        Ok(out)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Connection")?;
        if self.user != self.config.user {
            write!(f, " user={}", self.user)?;
        }
        write!(f, " host={}", self.host)?;
        if self.port != self.config.port {
            write!(f, " port={}", self.port)?;
        }
        if let Some(gw) = &self.gateway {
            write!(f, " gw={}", gw.kind())?;
        }
        write!(f, ">")
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("port", &self.port)
            .field("gateway", &self.gateway)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for [`Connection`]. Explicit arguments take precedence over
/// host-string shorthand; supplying the same field both ways is rejected.
pub struct ConnectionBuilder {
    host: String,
    user: Option<String>,
    port: Option<u16>,
    key_path: Option<PathBuf>,
    config: Option<Config>,
    gateway: Option<Gateway>,
    dialer: Option<Arc<dyn Dialer>>,
}

impl ConnectionBuilder {
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Substitute the transport dialer. Mainly a test seam.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    pub fn build(self) -> Result<Connection> {
        let config = self.config.unwrap_or_default();
        let shorthand = derive_shorthand(&self.host)?;

        if shorthand.user.is_some() && self.user.is_some() {
            return Err(Error::AmbiguousParameter { field: "user" });
        }
        if shorthand.port.is_some() && self.port.is_some() {
            return Err(Error::AmbiguousParameter { field: "port" });
        }

        let user = self
            .user
            .or(shorthand.user)
            .unwrap_or_else(|| config.user.clone());
        let port = self.port.or(shorthand.port).unwrap_or(config.port);
        let dialer = self
            .dialer
            .unwrap_or_else(|| Arc::new(RusshDialer::default()));

        Ok(Connection {
            host: shorthand.host,
            user,
            port,
            key_path: self.key_path,
            config,
            gateway: self.gateway,
            dialer,
            transport: Mutex::new(None),
            open_lock: tokio::sync::Mutex::new(()),
            sftp: tokio::sync::Mutex::new(None),
        })
    }
}

#[derive(Debug, PartialEq)]
struct Shorthand {
    user: Option<String>,
    host: String,
    port: Option<u16>,
}

/// Split `[user@]host[:port]`. Two or more colons in the host part mean
/// an IPv6 literal: no port is ever derived from it.
fn derive_shorthand(host_string: &str) -> Result<Shorthand> {
    let (user, hostport) = match host_string.rsplit_once('@') {
        Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
        Some((_, rest)) => (None, rest),
        None => (None, host_string),
    };

    let (host, port) = if hostport.matches(':').count() > 1 {
        (hostport.to_string(), None)
    } else {
        match hostport.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidPort(port.to_string()))?;
                (host.to_string(), Some(port))
            }
            Some((host, _)) => (host.to_string(), None),
            None => (hostport.to_string(), None),
        }
    };

    Ok(Shorthand { user, host, port })
}
