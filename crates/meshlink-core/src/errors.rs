//! Error types for the meshlink link layer
//!
//! Handshake failures, transport failures and configuration problems each get
//! their own enum; [`LinkError`] unifies them for callers of the link layer.
//! Allow-list rejections and duplicate links are deliberately absent: they
//! are outcomes, not errors.

use std::io;

use thiserror::Error;

use crate::types::TransportKind;

// ----------------------------------------------------------------------------
// Metadata Errors
// ----------------------------------------------------------------------------

/// Malformed handshake metadata
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata frame has wrong length (expected {expected}, got {actual})")]
    Length { expected: usize, actual: usize },
}

// ----------------------------------------------------------------------------
// State Transition Errors
// ----------------------------------------------------------------------------

/// Attempted an illegal handshake state transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid link state transition from {from} to {to}")]
pub struct StateTransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors raised by transport adapters
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is not available: {kind} ({reason})")]
    Unavailable { kind: TransportKind, reason: String },

    #[error("Dial to {target} timed out after {duration_ms}ms")]
    DialTimeout { target: String, duration_ms: u64 },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Stream upgrade failed: {0}")]
    Upgrade(String),

    #[error("Transport stopped")]
    Stopped,
}

// ----------------------------------------------------------------------------
// Configuration Errors
// ----------------------------------------------------------------------------

/// Errors raised while validating link configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid public key {key}: {reason}")]
    InvalidPublicKey { key: String, reason: String },

    #[error("Invalid listen address {uri}: {reason}")]
    InvalidListen { uri: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

// ----------------------------------------------------------------------------
// Link Errors
// ----------------------------------------------------------------------------

/// Errors surfaced by link establishment and the link manager
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("timeout on metadata send")]
    SendTimeout,

    #[error("metadata send failed: {0}")]
    SendFailed(#[source] io::Error),

    #[error("timeout on metadata recv")]
    RecvTimeout,

    #[error("metadata recv failed: {0}")]
    RecvFailed(#[source] io::Error),

    #[error("failed to decode metadata: {0}")]
    Decode(#[from] MetadataError),

    #[error("remote node is incompatible version (local {local}, remote {remote})")]
    IncompatibleVersion { local: String, remote: String },

    #[error("failed to connect: {name} sent ed25519 key that does not match pinned keys")]
    PinnedKeyMismatch { name: String },

    #[error("unknown call scheme: {0}")]
    UnknownScheme(String),

    #[error("invalid peer URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("tunnel engine error: {0}")]
    Tunnel(#[source] io::Error),

    #[error("State transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    #[error("link layer is stopped")]
    Stopped,
}

impl LinkError {
    /// Create an invalid URI error
    pub fn invalid_uri<U: Into<String>, R: Into<String>>(uri: U, reason: R) -> Self {
        LinkError::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a handshake deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, LinkError::SendTimeout | LinkError::RecvTimeout)
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
