// ABOUTME: Remote command runner bound to a connection as its execution context.
// ABOUTME: Wraps run and sudo, capturing output and exit status.

use crate::connection::Connection;
use crate::error::Result;
use std::time::Duration;

/// Options for a single remote command invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Deadline for the whole invocation. Falls back to the connection's
    /// `run.timeout` config when unset.
    pub timeout: Option<Duration>,

    /// Payload written to the command's stdin, followed by EOF.
    pub input: Option<String>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Output from a remote command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code of the command.
    pub exit_code: u32,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs commands on the remote end of a [`Connection`], opening it first
/// when necessary.
pub struct Remote<'a> {
    conn: &'a Connection,
}

impl<'a> Remote<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Execute a shell command on the remote end.
    pub async fn run(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        self.conn.open().await?;
        let opts = self.with_defaults(opts);
        if self.conn.config().run.echo {
            println!("{command}");
        }
        self.conn.transport()?.exec(command, &opts).await
    }

    /// Execute a shell command via sudo. When the connection config
    /// carries a sudo password it is fed over stdin (`sudo -S`).
    pub async fn sudo(&self, command: &str, opts: &RunOptions) -> Result<CommandOutput> {
        let mut opts = self.with_defaults(opts);
        if opts.input.is_none() {
            if let Some(password) = &self.conn.config().sudo.password {
                opts.input = Some(format!("{password}\n"));
            }
        }

        let wrapped = format!("sudo -S -p '' {command}");
        self.conn.open().await?;
        if self.conn.config().run.echo {
            println!("{wrapped}");
        }
        self.conn.transport()?.exec(&wrapped, &opts).await
    }

    fn with_defaults(&self, opts: &RunOptions) -> RunOptions {
        let mut opts = opts.clone();
        if opts.timeout.is_none() {
            opts.timeout = self.conn.config().run.timeout;
        }
        opts
    }
}
