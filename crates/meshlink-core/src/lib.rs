//! meshlink link layer
//!
//! Establishes, authenticates, deduplicates and tears down links between
//! nodes of an encrypted mesh network. A link starts as a raw byte stream
//! from a transport adapter, exchanges a fixed-size metadata frame (protocol
//! version, public key, metric) under deadlines, passes version, key pinning
//! and allow-list checks, and is then registered and handed to the tunnel
//! engine for the rest of its life.
//!
//! ## Architecture
//!
//! - [`metadata`] - fixed-layout handshake frame codec
//! - [`transport`] - transport adapter contract, TCP adapter, peer URIs
//! - [`link`] - per-connection handshake state machine
//! - [`registry`] - table of live links, one per [`LinkKey`]
//! - [`links`] - the manager tying the pieces together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshlink_core::{DrainTunnel, LinkConfig, Links, PeerIdentity};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = PeerIdentity::new([7u8; 32]);
//! let config = LinkConfig::new().with_listen("tcp://[::]:9001");
//!
//! let links = Links::init(identity, &config, Arc::new(DrainTunnel)).await?;
//! links.call("tcp://192.0.2.10:9001?metric=5", None)?;
//!
//! // ...
//! links.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod config;
pub mod errors;
pub mod link;
pub mod links;
pub mod metadata;
pub mod registry;
pub mod signal;
pub mod transport;
pub mod tunnel;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use address::address_for_key;
pub use config::{LinkConfig, LinkSettings};
pub use errors::{ConfigError, LinkError, MetadataError, Result, TransportError};
pub use link::{effective_metric, Link, LinkOptions, LinkState};
pub use links::Links;
pub use metadata::{HandshakeMetadata, METADATA_LEN, PROTOCOL_MAJOR, PROTOCOL_MINOR};
pub use registry::{LinkHandle, LinkRegistry, LinkSummary, Registration};
pub use signal::ClosedSignal;
pub use transport::{
    parse_call_uri, BoxedConnection, CallTarget, Connection, DialTarget, ListenSpec, TcpTransport,
    Transport,
};
pub use tunnel::{DrainTunnel, TunnelEngine};
pub use types::{LinkKey, PeerIdentity, TransportKind};
