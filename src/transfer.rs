// ABOUTME: SFTP file transfer: get and put over a connection's memoized session.
// ABOUTME: Streams file contents; no permission or timestamp preservation.

use crate::connection::Connection;
use crate::error::{Error, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// File transfer bound to a [`Connection`], opening it first when needed.
pub struct Transfer<'a> {
    conn: &'a Connection,
}

impl<'a> Transfer<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Download `remote` into `local`.
    pub async fn get(&self, remote: &Path, local: &Path) -> Result<()> {
        let sftp = self.conn.sftp().await?;
        let mut src = sftp
            .open(remote.to_string_lossy().to_string())
            .await
            .map_err(|e| {
                Error::Transfer(format!("failed to open remote {}: {e}", remote.display()))
            })?;
        let mut dst = tokio::fs::File::create(local).await?;
        tokio::io::copy(&mut src, &mut dst).await?;
        dst.flush().await?;
        tracing::debug!(remote = %remote.display(), local = %local.display(), "downloaded file");
        Ok(())
    }

    /// Upload `local` to `remote`.
    pub async fn put(&self, local: &Path, remote: &Path) -> Result<()> {
        let sftp = self.conn.sftp().await?;
        let mut src = tokio::fs::File::open(local).await?;
        let mut dst = sftp
            .create(remote.to_string_lossy().to_string())
            .await
            .map_err(|e| {
                Error::Transfer(format!("failed to create remote {}: {e}", remote.display()))
            })?;
        tokio::io::copy(&mut src, &mut dst).await?;
        dst.shutdown().await?;
        tracing::debug!(local = %local.display(), remote = %remote.display(), "uploaded file");
        Ok(())
    }
}
