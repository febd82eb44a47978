// ABOUTME: Ordered collections of connections with sequential fan-out.
// ABOUTME: Results are keyed by each member's user@host:port identity.

use crate::connection::Connection;
use crate::error::Result;
use crate::runner::{CommandOutput, RunOptions};
use std::collections::HashMap;
use std::ops::Index;

/// An ordered collection of [`Connection`]s whose API operates on its
/// contents.
pub struct Group {
    members: Vec<Connection>,
}

impl Group {
    /// Create a group from an iterable of host shorthand strings.
    pub fn new<I, S>(hosts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let members = hosts
            .into_iter()
            .map(|h| Connection::new(h.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { members })
    }

    /// Alternate constructor accepting already-built connections.
    pub fn from_connections(connections: impl IntoIterator<Item = Connection>) -> Self {
        Self {
            members: connections.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Connection> {
        self.members.iter()
    }

    /// Run `command` on every member, strictly in order, never
    /// concurrently. Results are keyed by each member's
    /// [`host_string`](Connection::host_string); members sharing an
    /// identity overwrite earlier entries. The first member failure
    /// aborts the remaining iteration and propagates.
    pub async fn run(
        &self,
        command: &str,
        opts: &RunOptions,
    ) -> Result<HashMap<String, CommandOutput>> {
        let mut results = HashMap::with_capacity(self.members.len());
        for conn in &self.members {
            let output = conn.run(command, opts).await?;
            results.insert(conn.host_string(), output);
        }
        Ok(results)
    }

    /// Best-effort close of every member.
    pub async fn close(&self) {
        for conn in &self.members {
            conn.close().await;
        }
    }
}

impl Index<usize> for Group {
    type Output = Connection;

    fn index(&self, index: usize) -> &Connection {
        &self.members[index]
    }
}

impl<'a> IntoIterator for &'a Group {
    type Item = &'a Connection;
    type IntoIter = std::slice::Iter<'a, Connection>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}
