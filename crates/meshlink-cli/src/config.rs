//! Node configuration file
//!
//! ```toml
//! private_key = "<hex>"
//!
//! [link]
//! listen = ["tcp://[::]:9001"]
//! peers = ["tcp://192.0.2.10:9001?metric=2"]
//! allowed_public_keys = []
//! handshake_timeout_secs = 30
//! ```

use std::path::Path;

use ed25519_dalek::SigningKey;
use meshlink_core::LinkConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};
use crate::keys;

/// Complete configuration for a meshlink node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Hex private key; a temporary one is generated when absent
    pub private_key: Option<String>,
    pub link: LinkConfig,
}

impl NodeConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.signing_key()?;
        self.link.validate()?;
        Ok(())
    }

    /// The configured signing key, if any
    pub fn signing_key(&self) -> Result<Option<SigningKey>> {
        self.private_key
            .as_deref()
            .map(keys::parse_private_key)
            .transpose()
    }

    /// Add command-line listeners and peers on top of the file
    pub fn with_overrides(mut self, listen: Vec<String>, peers: Vec<String>) -> Self {
        self.link.listen.extend(listen);
        self.link.peers.extend(peers);
        self
    }
}
