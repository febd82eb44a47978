// ABOUTME: russh-backed Dialer and Transport.
// ABOUTME: Host key verification, authentication, exec, channels, and SFTP.

use super::{BoxedDuplex, DialParams, Dialer, Transport};
use crate::error::{Error, Result};
use crate::runner::{CommandOutput, RunOptions};
use async_trait::async_trait;
use russh::client::{self, Config as ClientConfig, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::known_hosts::{
    check_known_hosts, check_known_hosts_path, learn_known_hosts, learn_known_hosts_path,
};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;

/// Dials SSH servers and authenticates, yielding [`RusshTransport`]s.
#[derive(Debug, Clone)]
pub struct RusshDialer {
    /// Accept and record unknown host keys instead of failing.
    pub trust_on_first_use: bool,
    /// Optional path to a known_hosts file. `None` uses
    /// `~/.ssh/known_hosts`.
    pub known_hosts_path: Option<PathBuf>,
    /// Disconnect after this much protocol inactivity. Unset by default:
    /// an idle forwarded port must not tear the session down.
    pub inactivity_timeout: Option<Duration>,
}

impl Default for RusshDialer {
    fn default() -> Self {
        Self {
            trust_on_first_use: true,
            known_hosts_path: None,
            inactivity_timeout: None,
        }
    }
}

#[async_trait]
impl Dialer for RusshDialer {
    async fn dial(
        &self,
        params: &DialParams,
        via: Option<BoxedDuplex>,
    ) -> Result<Arc<dyn Transport>> {
        let auth_method = self.resolve_auth_method(params).await?;

        let config = Arc::new(ClientConfig {
            inactivity_timeout: self.inactivity_timeout,
            ..Default::default()
        });

        let handler = ClientHandler {
            host: params.host.clone(),
            port: params.port,
            trust_on_first_use: self.trust_on_first_use,
            known_hosts_path: self.known_hosts_path.clone(),
        };

        let mut session = match via {
            Some(socket) => client::connect_stream(config, socket, handler).await,
            None => {
                client::connect(config, (params.host.as_str(), params.port), handler).await
            }
        }
        .map_err(|e| Error::Connection(e.to_string()))?;

        if !authenticate(&mut session, &params.user, auth_method).await? {
            return Err(Error::AuthenticationFailed);
        }

        Ok(Arc::new(RusshTransport { handle: session }))
    }
}

impl RusshDialer {
    /// Resolve which authentication method to use: explicit key file,
    /// then SSH agent, then default key locations.
    async fn resolve_auth_method(&self, params: &DialParams) -> Result<AuthMethod> {
        if let Some(key_path) = &params.key_path {
            let key = load_secret_key(key_path, None).map_err(|e| Error::KeyLoadFailed {
                path: key_path.clone(),
                reason: e.to_string(),
            })?;
            return Ok(AuthMethod::KeyFile(Arc::new(key)));
        }

        if let Ok(agent) = AgentClient::connect_env().await {
            return Ok(AuthMethod::Agent(agent));
        }

        let home = std::env::var("HOME").map_err(|_| {
            Error::AgentUnavailable("SSH agent not available and HOME not set".to_string())
        })?;

        let default_keys = [
            format!("{}/.ssh/id_ed25519", home),
            format!("{}/.ssh/id_rsa", home),
            format!("{}/.ssh/id_ecdsa", home),
        ];

        for key_path in &default_keys {
            if let Ok(key) = load_secret_key(key_path, None) {
                return Ok(AuthMethod::KeyFile(Arc::new(key)));
            }
        }

        Err(Error::AgentUnavailable(
            "SSH agent not available and no default keys found".to_string(),
        ))
    }
}

/// Authentication method resolved from the dial parameters.
enum AuthMethod {
    Agent(AgentClient<UnixStream>),
    KeyFile(Arc<ssh_key::PrivateKey>),
}

async fn authenticate(
    session: &mut Handle<ClientHandler>,
    user: &str,
    auth_method: AuthMethod,
) -> Result<bool> {
    match auth_method {
        AuthMethod::Agent(mut agent) => {
            let keys = agent.request_identities().await.map_err(|e| {
                Error::AgentUnavailable(format!("failed to list agent keys: {}", e))
            })?;

            if keys.is_empty() {
                return Err(Error::AgentUnavailable("no keys in SSH agent".to_string()));
            }

            for key in &keys {
                match session
                    .authenticate_publickey_with(user, key.clone(), None, &mut agent)
                    .await
                {
                    Ok(result) if result.success() => return Ok(true),
                    _ => continue,
                }
            }
            Ok(false)
        }
        AuthMethod::KeyFile(key) => {
            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(Error::Protocol)?
                .flatten();

            let result = session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key, hash_alg))
                .await
                .map_err(Error::Protocol)?;

            Ok(result.success())
        }
    }
}

/// russh client handler verifying server keys against known_hosts.
struct ClientHandler {
    host: String,
    port: u16,
    trust_on_first_use: bool,
    known_hosts_path: Option<PathBuf>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let check_result = match &self.known_hosts_path {
            Some(path) => check_known_hosts_path(&self.host, self.port, server_public_key, path),
            None => check_known_hosts(&self.host, self.port, server_public_key),
        };

        match check_result {
            Ok(true) => Ok(true),
            Ok(false) => {
                // Host not in known_hosts
                if self.trust_on_first_use {
                    tracing::warn!(
                        "Trust-On-First-Use: accepting unknown host key for {}:{}",
                        self.host,
                        self.port
                    );
                    let learn_result = match &self.known_hosts_path {
                        Some(path) => {
                            learn_known_hosts_path(&self.host, self.port, server_public_key, path)
                        }
                        None => learn_known_hosts(&self.host, self.port, server_public_key),
                    };
                    if let Err(e) = learn_result {
                        tracing::warn!("Failed to save host key to known_hosts: {}", e);
                    }
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Err(russh::keys::Error::KeyChanged { .. }) => Ok(false),
            Err(_) => {
                // Other errors - treat as unknown host
                if self.trust_on_first_use {
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// An established SSH session.
pub struct RusshTransport {
    handle: Handle<ClientHandler>,
}

impl std::fmt::Debug for RusshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshTransport")
            .field("handle", &"<russh::Handle>")
            .finish()
    }
}

#[async_trait]
impl Transport for RusshTransport {
    fn is_active(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        src_host: &str,
        src_port: u16,
    ) -> Result<BoxedDuplex> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), src_host, u32::from(src_port))
            .await
            .map_err(|e| Error::ChannelOpen(e.to_string()))?;
        Ok(Box::new(channel.into_stream()))
    }

    async fn exec(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        match opts.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exec_inner(command, opts))
                .await
                .map_err(|_| Error::CommandTimeout(timeout))?,
            None => self.exec_inner(command, opts).await,
        }
    }

    async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::Transfer(format!("failed to open channel: {}", e)))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Transfer(format!("failed to request sftp subsystem: {}", e)))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Transfer(format!("failed to start sftp session: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(Error::Protocol)?;
        Ok(())
    }
}

impl RusshTransport {
    async fn exec_inner(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::CommandFailed(format!("failed to exec command: {}", e)))?;

        if let Some(input) = &opts.input {
            channel
                .data(input.as_bytes())
                .await
                .map_err(|e| Error::CommandFailed(format!("failed to write stdin: {}", e)))?;
            channel
                .eof()
                .await
                .map_err(|e| Error::CommandFailed(format!("failed to close stdin: {}", e)))?;
        }

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = 0u32;

        let mut got_exit_status = false;
        let mut got_eof = false;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        // stderr
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = exit_status;
                    got_exit_status = true;
                    if got_eof {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    got_eof = true;
                    if got_exit_status {
                        break;
                    }
                }
                Some(ChannelMsg::Close) => {
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }

        // A channel that closed without an exit status indicates abnormal
        // termination (connection dropped, network issue).
        if !got_exit_status {
            return Err(Error::ChannelClosed);
        }

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }
}
