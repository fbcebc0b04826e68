//! Core types for the meshlink link layer
//!
//! Newtypes for peer identities plus the registry key that identifies one
//! logical link.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;

use ed25519_dalek::VerifyingKey;

use crate::errors::ConfigError;

/// Length of an ed25519 public key
pub const PUBLIC_KEY_LEN: usize = 32;

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Public signing key that uniquely identifies a node
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerIdentity([u8; PUBLIC_KEY_LEN]);

impl PeerIdentity {
    /// Create a new identity from raw key bytes
    pub const fn new(bytes: [u8; PUBLIC_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Copy an identity out of a slice; `None` unless the slice is exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; PUBLIC_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(key))
    }

    /// Lowercase hex encoding, as used in config files and logs
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<VerifyingKey> for PeerIdentity {
    fn from(key: VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl From<&VerifyingKey> for PeerIdentity {
    fn from(key: &VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerIdentity({})", hex::encode(&self.0[..8]))
    }
}

impl FromStr for PeerIdentity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| ConfigError::InvalidPublicKey {
            key: s.to_string(),
            reason: e.to_string(),
        })?;

        Self::from_slice(&bytes).ok_or_else(|| ConfigError::InvalidPublicKey {
            key: s.to_string(),
            reason: format!("expected {} bytes, got {}", PUBLIC_KEY_LEN, bytes.len()),
        })
    }
}

impl Deref for PeerIdentity {
    type Target = [u8; PUBLIC_KEY_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Transport Kind
// ----------------------------------------------------------------------------

/// The fixed set of transports a link can run over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Plain TCP stream
    Tcp,
    /// TCP wrapped in TLS
    Tls,
    /// TCP through a SOCKS proxy
    Socks,
}

impl TransportKind {
    /// URI scheme / lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
            TransportKind::Socks => "socks",
        }
    }

    /// Parse a URI scheme; `None` for unknown schemes
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "tcp" => Some(TransportKind::Tcp),
            "tls" => Some(TransportKind::Tls),
            "socks" => Some(TransportKind::Socks),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Link Key
// ----------------------------------------------------------------------------

/// Registry key: one live link per distinct value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    /// Remote node's identity
    pub identity: PeerIdentity,
    /// Transport the link runs over
    pub kind: TransportKind,
    /// Local name or address
    pub local: String,
    /// Remote name or address
    pub remote: String,
}

impl LinkKey {
    pub fn new(
        identity: PeerIdentity,
        kind: TransportKind,
        local: impl Into<String>,
        remote: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            kind,
            local: local.into(),
            remote: remote.into(),
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} via {} (source {})",
            self.identity, self.remote, self.kind, self.local
        )
    }
}
