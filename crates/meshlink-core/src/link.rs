//! Link handshake and lifetime
//!
//! A [`Link`] wraps one raw connection from the moment it is accepted or
//! dialled until it is closed. [`Link::handler`] exchanges handshake
//! metadata under deadlines, validates version and identity, registers the
//! link, and hands the connection to the tunnel engine for the rest of its
//! life.
//!
//! Outcomes of `handler`:
//!
//! | Situation                              | Result                          |
//! |----------------------------------------|---------------------------------|
//! | Link ran and ended cleanly             | `Ok(None)`                      |
//! | Rejected by the allow-list             | `Ok(None)`, nothing registered  |
//! | Same link key already registered       | `Ok(Some(existing_signal))`     |
//! | Timeout, I/O, decode, version, pinning | `Err(..)`, nothing registered   |
//! | Tunnel engine failed                   | `Err(LinkError::Tunnel)`        |
//!
//! The raw connection is closed exactly once on every path: explicitly on
//! failure, by the tunnel engine after a successful hand-off. A registered
//! link leaves the registry even if the `handler` future is dropped.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::address::address_for_key;
use crate::errors::{LinkError, Result, StateTransitionError};
use crate::links::Links;
use crate::metadata::{HandshakeMetadata, METADATA_LEN};
use crate::registry::{LinkHandle, Registration};
use crate::signal::ClosedSignal;
use crate::transport::{BoxedConnection, Connection};
use crate::types::{LinkKey, PeerIdentity, TransportKind};

/// Upper bound on the orderly shutdown of a rejected connection
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ----------------------------------------------------------------------------
// Link Options
// ----------------------------------------------------------------------------

/// Per-attempt link options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOptions {
    /// If non-empty, the remote must advertise one of these keys
    pub pinned_keys: HashSet<PeerIdentity>,
    /// Locally asserted link cost
    pub metric: u8,
}

impl LinkOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pinned_key(mut self, key: PeerIdentity) -> Self {
        self.pinned_keys.insert(key);
        self
    }

    pub fn with_metric(mut self, metric: u8) -> Self {
        self.metric = metric;
        self
    }

    /// Whether the pinning rule admits `identity`
    pub fn admits(&self, identity: &PeerIdentity) -> bool {
        self.pinned_keys.is_empty() || self.pinned_keys.contains(identity)
    }
}

/// Link cost both sides settle on: the higher of the two advertised metrics
pub fn effective_metric(local: u8, remote: u8) -> u8 {
    local.max(remote)
}

// ----------------------------------------------------------------------------
// Link State
// ----------------------------------------------------------------------------

/// Handshake and lifetime state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Created,
    MetadataSent,
    MetadataReceived,
    Validated,
    Registered,
    Active,
    Closed,
}

impl LinkState {
    pub fn name(&self) -> &'static str {
        match self {
            LinkState::Created => "Created",
            LinkState::MetadataSent => "MetadataSent",
            LinkState::MetadataReceived => "MetadataReceived",
            LinkState::Validated => "Validated",
            LinkState::Registered => "Registered",
            LinkState::Active => "Active",
            LinkState::Closed => "Closed",
        }
    }

    /// Move to `next`, rejecting anything but the forward edge or a close
    pub fn advance(self, next: LinkState) -> std::result::Result<LinkState, StateTransitionError> {
        use LinkState::*;

        let allowed = matches!(
            (self, next),
            (Created, MetadataSent)
                | (MetadataSent, MetadataReceived)
                | (MetadataReceived, Validated)
                | (Validated, Registered)
                | (Registered, Active)
        ) || (self != Closed && next == Closed);

        if allowed {
            Ok(next)
        } else {
            Err(StateTransitionError {
                from: self.name(),
                to: next.name(),
            })
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Link
// ----------------------------------------------------------------------------

/// One raw connection going through the handshake
pub struct Link {
    name: String,
    links: Links,
    conn: Option<BoxedConnection>,
    options: LinkOptions,
    kind: TransportKind,
    local: String,
    remote: String,
    incoming: bool,
    force: bool,
    state: LinkState,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("incoming", &self.incoming)
            .field("force", &self.force)
            .field("state", &self.state)
            .finish()
    }
}

impl Link {
    pub(crate) fn new(
        links: Links,
        conn: Connection,
        incoming: bool,
        force: bool,
        options: LinkOptions,
    ) -> Self {
        Self {
            name: conn.name,
            links,
            conn: Some(conn.stream),
            options,
            kind: conn.kind,
            local: conn.local,
            remote: conn.remote,
            incoming,
            force,
            state: LinkState::Created,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn is_incoming(&self) -> bool {
        self.incoming
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Run the handshake and, on success, the whole life of the link
    ///
    /// Returns `Ok(Some(signal))` when an equivalent link is already live;
    /// the signal fires when that existing link closes. This connection is
    /// closed in that case.
    pub async fn handler(mut self) -> Result<Option<ClosedSignal>> {
        let result = self.run().await;

        if let Some(conn) = self.conn.take() {
            close_connection(conn).await;
        }
        if self.state != LinkState::Closed {
            if let Err(e) = &result {
                debug!("link {} closed in state {}: {}", self.name, self.state, e);
            }
            self.state = LinkState::Closed;
        }

        result
    }

    async fn run(&mut self) -> Result<Option<ClosedSignal>> {
        if self.links.is_stopped() {
            return Err(LinkError::Stopped);
        }
        let settings = self.links.settings().await;
        let deadline = settings.handshake_timeout;
        let local_meta = HandshakeMetadata::local(self.links.identity(), self.options.metric);

        let conn = self.conn.as_mut().ok_or(LinkError::Stopped)?;
        send_metadata(conn, &local_meta.encode(), deadline).await?;
        self.state = self.state.advance(LinkState::MetadataSent)?;

        let frame = recv_metadata(conn, deadline).await?;
        self.state = self.state.advance(LinkState::MetadataReceived)?;

        let remote_meta = HandshakeMetadata::decode(&frame)?;
        let metric = effective_metric(local_meta.metric, remote_meta.metric);

        if !remote_meta.check() {
            let local = HandshakeMetadata::base().version_string();
            let remote = remote_meta.version_string();
            warn!(
                "Failed to connect to node: {} is incompatible version (local {}, remote {})",
                self.name, local, remote
            );
            return Err(LinkError::IncompatibleVersion { local, remote });
        }

        // Equality check on the advertised key only; nothing here proves
        // the remote holds the matching private key.
        if !self.options.admits(&remote_meta.identity) {
            error!(
                "Failed to connect to node: {:?} sent ed25519 key that does not match pinned keys",
                self.name
            );
            return Err(LinkError::PinnedKeyMismatch {
                name: self.name.clone(),
            });
        }

        if self.incoming && !self.force && !settings.is_allowed(&remote_meta.identity) {
            warn!(
                "{} connection from {} forbidden: allowed_public_keys does not contain key {}",
                self.kind_label(),
                self.remote,
                remote_meta.identity
            );
            return Ok(None);
        }
        self.state = self.state.advance(LinkState::Validated)?;

        let key = LinkKey::new(
            remote_meta.identity,
            self.kind,
            self.local.clone(),
            self.remote.clone(),
        );
        let handle = Arc::new(LinkHandle::new(self.name.clone(), key, self.incoming));
        if let Registration::Duplicate(existing) = self.links.registry().register(handle.clone()) {
            return Ok(Some(existing));
        }
        // From here on the entry is released however this future ends
        let registered = RegistryEntry::new(self.links.clone(), handle);
        self.state = self.state.advance(LinkState::Registered)?;

        let them = format!("{}@{}", address_for_key(&remote_meta.identity), self.remote);
        info!("Connected {}: {}, source {}", self.kind_label(), them, self.local);

        let conn = self.conn.take().ok_or(LinkError::Stopped)?;
        self.state = self.state.advance(LinkState::Active)?;

        let outcome = self
            .links
            .engine()
            .handle_connection(remote_meta.identity, conn, metric)
            .await;

        match &outcome {
            Ok(()) => info!(
                "Disconnected {}: {}, source {}",
                self.kind_label(),
                them,
                self.local
            ),
            Err(e) => info!(
                "Disconnected {}: {}, source {}; error: {}",
                self.kind_label(),
                them,
                self.local,
                e
            ),
        }

        drop(registered);
        self.state = self.state.advance(LinkState::Closed)?;

        outcome.map(|_| None).map_err(LinkError::Tunnel)
    }

    fn kind_label(&self) -> String {
        self.kind.as_str().to_uppercase()
    }
}

// ----------------------------------------------------------------------------
// Registry Entry Guard
// ----------------------------------------------------------------------------

/// A link's live registry entry
///
/// Dropping it deregisters the handle and fires its closure signal. This
/// also runs when the handler future is cancelled or the tunnel engine
/// panics, so a key never outlives the link that claimed it.
struct RegistryEntry {
    links: Links,
    handle: Arc<LinkHandle>,
}

impl RegistryEntry {
    fn new(links: Links, handle: Arc<LinkHandle>) -> Self {
        Self { links, handle }
    }
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        if !self.links.registry().deregister(&self.handle) {
            debug!("link {} was already deregistered", self.handle.name());
        }
    }
}

// ----------------------------------------------------------------------------
// Deadline-Bounded I/O
// ----------------------------------------------------------------------------

/// Write the whole frame; the write future is dropped if the deadline passes
async fn send_metadata(conn: &mut BoxedConnection, frame: &[u8], deadline: Duration) -> Result<()> {
    let write = async {
        conn.write_all(frame).await?;
        conn.flush().await
    };
    match timeout(deadline, write).await {
        Err(_) => Err(LinkError::SendTimeout),
        Ok(Err(e)) => Err(LinkError::SendFailed(e)),
        Ok(Ok(())) => Ok(()),
    }
}

/// Read exactly one frame; the read future is dropped if the deadline passes
async fn recv_metadata(conn: &mut BoxedConnection, deadline: Duration) -> Result<[u8; METADATA_LEN]> {
    let mut frame = [0u8; METADATA_LEN];
    match timeout(deadline, conn.read_exact(&mut frame)).await {
        Err(_) => Err(LinkError::RecvTimeout),
        Ok(Err(e)) => Err(LinkError::RecvFailed(e)),
        Ok(Ok(_)) => Ok(frame),
    }
}

async fn close_connection(mut conn: BoxedConnection) {
    if let Err(e) = timeout(CLOSE_TIMEOUT, conn.shutdown()).await.unwrap_or(Ok(())) {
        debug!("error closing connection: {}", e);
    }
}
