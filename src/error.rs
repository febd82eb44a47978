// ABOUTME: Crate-wide error types for halyard.
// ABOUTME: Covers construction, dial/auth, gateway, channel, and transfer failures.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{field} was supplied via both host shorthand and argument; pick one")]
    AmbiguousParameter { field: &'static str },

    #[error("invalid port in host string: {0}")]
    InvalidPort(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection not open")]
    NotConnected,

    #[error("authentication failed: no valid credentials")]
    AuthenticationFailed,

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoadFailed { path: PathBuf, reason: String },

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    #[error("command execution failed: {0}")]
    CommandFailed(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("channel closed unexpectedly without exit status")]
    ChannelClosed,

    #[error("port forwarding failed: {0}")]
    Forward(String),

    #[error("file transfer failed: {0}")]
    Transfer(String),

    #[error("not supported by this transport: {0}")]
    Unsupported(&'static str),

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
