//! Running a node from the command line

use std::sync::Arc;

use meshlink_core::{address_for_key, DrainTunnel, Links, PeerIdentity};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::Result;
use crate::keys;

/// A started node
pub struct Node {
    links: Links,
}

impl Node {
    /// Start listeners and call the configured peers
    pub async fn start(config: &NodeConfig, interface: Option<&str>) -> Result<Self> {
        let identity = match config.signing_key()? {
            Some(key) => keys::identity_of(&key),
            None => {
                warn!("No private_key configured, using a temporary key");
                keys::identity_of(&keys::generate())
            }
        };
        info!("Public key: {}", identity);
        info!("Address: {}", address_for_key(&identity));

        let links = Links::init(identity, &config.link, Arc::new(DrainTunnel)).await?;

        for peer in &config.link.peers {
            if let Err(e) = links.call(peer, interface) {
                warn!("Failed to add peer {}: {}", peer, e);
            }
        }

        Ok(Self { links })
    }

    pub fn identity(&self) -> PeerIdentity {
        self.links.identity()
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    /// Log the live links
    pub async fn report(&self) {
        let peers = self.links.peers().await;
        info!("{} active link(s)", peers.len());
        for peer in peers {
            info!(
                "  {} {} ({}, up {}s)",
                if peer.incoming { "<-" } else { "->" },
                peer.name,
                peer.key.identity,
                peer.uptime.as_secs()
            );
        }
    }

    pub async fn stop(self) -> Result<()> {
        self.links.stop().await?;
        Ok(())
    }
}
