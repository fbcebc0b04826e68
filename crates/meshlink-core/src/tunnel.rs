//! Boundary with the tunnel engine
//!
//! Once a link is authenticated and registered, its raw connection belongs to
//! the tunnel engine for the rest of its life. The link layer only waits for
//! the engine to return and logs the outcome.

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::trace;

use crate::transport::BoxedConnection;
use crate::types::PeerIdentity;

/// Engine that carries traffic over an established link
#[async_trait]
pub trait TunnelEngine: Send + Sync {
    /// Run the connection until it ends, by any cause
    async fn handle_connection(
        &self,
        remote: PeerIdentity,
        conn: BoxedConnection,
        metric: u8,
    ) -> io::Result<()>;
}

/// Engine that reads and discards everything until the peer hangs up
///
/// Stands in for a real packet engine when running the link layer alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainTunnel;

#[async_trait]
impl TunnelEngine for DrainTunnel {
    async fn handle_connection(
        &self,
        remote: PeerIdentity,
        mut conn: BoxedConnection,
        metric: u8,
    ) -> io::Result<()> {
        let mut buf = [0u8; 4096];
        let mut total = 0u64;
        loop {
            let n = conn.read(&mut buf).await?;
            if n == 0 {
                trace!("{} closed after {} bytes (metric {})", remote, total, metric);
                return Ok(());
            }
            total += n as u64;
        }
    }
}
