// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Global connection flags plus the run/sudo/forward subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "halyard")]
#[command(about = "Run commands and forward ports over SSH")]
#[command(version)]
pub struct Cli {
    /// Comma-separated hosts, each as [user@]host[:port]
    #[arg(short = 'H', long, value_delimiter = ',', required = true)]
    pub hosts: Vec<String>,

    /// Remote port (rejected if a host also carries :port shorthand)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Private key file for authentication
    #[arg(short, long)]
    pub identity: Option<PathBuf>,

    /// Gateway host ([user@]host[:port]) to chain through
    #[arg(short = 'J', long, conflicts_with = "proxy_command")]
    pub gateway: Option<String>,

    /// Proxy command producing the connection socket (%h/%p substituted)
    #[arg(long)]
    pub proxy_command: Option<String>,

    /// Configuration file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a shell command on every host
    Run {
        command: String,
    },

    /// Run a shell command via sudo on every host
    Sudo {
        command: String,
    },

    /// Forward a local port through the first host until interrupted
    Forward {
        /// Local port to listen on
        local_port: u16,

        /// Remote port (defaults to the local port)
        #[arg(long)]
        remote_port: Option<u16>,

        /// Remote host serving the forwarded port, as seen from the server
        #[arg(long, default_value = "localhost")]
        remote_host: String,

        /// Local interface to bind
        #[arg(long, default_value = "127.0.0.1")]
        local_host: String,
    },
}
