//! Link layer configuration
//!
//! [`LinkConfig`] is the serializable form read from a config file;
//! [`LinkSettings`] is the validated, parsed form the link manager runs with.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::transport::{parse_listen_uri, ListenSpec};
use crate::types::PeerIdentity;

/// Default bound on each handshake send and receive
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;
/// Default bound on establishing an outbound connection
pub const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the link layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Listener URIs, e.g. `tcp://[::]:9001`
    pub listen: Vec<String>,
    /// Peers to call at startup
    pub peers: Vec<String>,
    /// Hex public keys allowed to connect in; empty allows everyone
    pub allowed_public_keys: Vec<String>,
    /// Bound on each metadata send and receive
    pub handshake_timeout_secs: u64,
    /// Bound on establishing an outbound connection
    pub dial_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen: Vec::new(),
            peers: Vec::new(),
            allowed_public_keys: Vec::new(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener URI
    pub fn with_listen(mut self, uri: impl Into<String>) -> Self {
        self.listen.push(uri.into());
        self
    }

    /// Add a peer URI to call at startup
    pub fn with_peer(mut self, uri: impl Into<String>) -> Self {
        self.peers.push(uri.into());
        self
    }

    /// Allow an identity to connect in
    pub fn with_allowed_key(mut self, key: &PeerIdentity) -> Self {
        self.allowed_public_keys.push(key.to_hex());
        self
    }

    pub fn with_handshake_timeout(mut self, secs: u64) -> Self {
        self.handshake_timeout_secs = secs;
        self
    }

    /// Check the configuration without building settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.settings().map(|_| ())
    }

    /// Parse into runtime settings
    pub fn settings(&self) -> Result<LinkSettings, ConfigError> {
        if self.handshake_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "handshake timeout must be greater than 0".to_string(),
            ));
        }
        if self.dial_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "dial timeout must be greater than 0".to_string(),
            ));
        }

        let allowed_keys = self
            .allowed_public_keys
            .iter()
            .map(|key| key.parse::<PeerIdentity>())
            .collect::<Result<HashSet<_>, _>>()?;

        let mut listen = Vec::with_capacity(self.listen.len());
        for uri in &self.listen {
            let spec = parse_listen_uri(uri)?;
            if !listen.contains(&spec) {
                listen.push(spec);
            }
        }

        Ok(LinkSettings {
            allowed_keys,
            listen,
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
        })
    }
}

// ----------------------------------------------------------------------------
// Runtime Settings
// ----------------------------------------------------------------------------

/// Validated link layer settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Identities allowed to connect in; empty allows everyone
    pub allowed_keys: HashSet<PeerIdentity>,
    pub listen: Vec<ListenSpec>,
    pub handshake_timeout: Duration,
    pub dial_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            allowed_keys: HashSet::new(),
            listen: Vec::new(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            dial_timeout: Duration::from_secs(DEFAULT_DIAL_TIMEOUT_SECS),
        }
    }
}

impl LinkSettings {
    /// Whether the allow-list admits `identity`
    pub fn is_allowed(&self, identity: &PeerIdentity) -> bool {
        self.allowed_keys.is_empty() || self.allowed_keys.contains(identity)
    }
}
