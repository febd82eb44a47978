// ABOUTME: Library root for halyard - remote execution and port forwarding over SSH.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod group;
pub mod runner;
pub mod transfer;
pub mod transport;
pub mod tunnel;

pub use config::Config;
pub use connection::{Connection, ConnectionBuilder};
pub use error::{Error, Result};
pub use gateway::Gateway;
pub use group::Group;
pub use runner::{CommandOutput, RunOptions};
pub use tunnel::{LocalForward, PortForward};
