//! Link manager
//!
//! [`Links`] owns everything the link layer shares between connections: the
//! registry, the transport adapter, the current settings, the tunnel engine
//! and the process-wide stop signal. It is cheap to clone; all clones refer
//! to the same state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{LinkConfig, LinkSettings};
use crate::errors::{LinkError, Result};
use crate::link::{Link, LinkOptions};
use crate::registry::{LinkRegistry, LinkSummary};
use crate::signal::ClosedSignal;
use crate::transport::{
    parse_call_uri, CallTarget, Connection, ListenSpec, Listener, TcpTransport, Transport,
};
use crate::tunnel::TunnelEngine;
use crate::types::PeerIdentity;

// ----------------------------------------------------------------------------
// Link Manager
// ----------------------------------------------------------------------------

/// Handle to the link layer of one node
#[derive(Clone)]
pub struct Links {
    inner: Arc<LinksInner>,
}

struct LinksInner {
    identity: PeerIdentity,
    settings: RwLock<LinkSettings>,
    registry: LinkRegistry,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn TunnelEngine>,
    stopped: watch::Sender<bool>,
    listeners: Mutex<HashMap<ListenSpec, ActiveListener>>,
}

struct ActiveListener {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Links {
    /// Create a link manager without starting any listener
    pub fn new(
        identity: PeerIdentity,
        settings: LinkSettings,
        engine: Arc<dyn TunnelEngine>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            inner: Arc::new(LinksInner {
                identity,
                settings: RwLock::new(settings),
                registry: LinkRegistry::new(),
                transport,
                engine,
                stopped,
                listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate `config`, create the manager over a plain TCP transport and
    /// start the configured listeners
    pub async fn init(
        identity: PeerIdentity,
        config: &LinkConfig,
        engine: Arc<dyn TunnelEngine>,
    ) -> Result<Self> {
        let transport = TcpTransport::new().with_upgrade_timeout(config.settings()?.handshake_timeout);
        Self::init_with_transport(identity, config, engine, Arc::new(transport)).await
    }

    /// Like [`Links::init`] with a caller-supplied transport adapter
    pub async fn init_with_transport(
        identity: PeerIdentity,
        config: &LinkConfig,
        engine: Arc<dyn TunnelEngine>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let settings = config.settings()?;
        let listen = settings.listen.clone();
        let links = Self::new(identity, settings, engine, transport);

        for spec in listen {
            if let Err(e) = links.listen(spec).await {
                warn!("Failed to start {} listener: {}", spec, e);
                if let Err(stop_err) = links.stop().await {
                    warn!("Failed to stop links after listener error: {}", stop_err);
                }
                return Err(e);
            }
        }
        Ok(links)
    }

    /// This node's identity
    pub fn identity(&self) -> PeerIdentity {
        self.inner.identity
    }

    /// Snapshot of the current settings
    pub async fn settings(&self) -> LinkSettings {
        self.inner.settings.read().await.clone()
    }

    pub fn registry(&self) -> &LinkRegistry {
        &self.inner.registry
    }

    pub(crate) fn engine(&self) -> &Arc<dyn TunnelEngine> {
        &self.inner.engine
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Live links, for diagnostics
    pub async fn peers(&self) -> Vec<LinkSummary> {
        self.inner.registry.snapshot()
    }

    /// Bound addresses of the active listeners
    pub async fn listening(&self) -> Vec<(ListenSpec, SocketAddr)> {
        let mut out: Vec<_> = self
            .inner
            .listeners
            .lock()
            .await
            .iter()
            .map(|(spec, listener)| (*spec, listener.local_addr))
            .collect();
        out.sort_by_key(|(spec, _)| spec.to_string());
        out
    }

    // ------------------------------------------------------------------------
    // Link Creation
    // ------------------------------------------------------------------------

    /// Wrap a raw connection in a [`Link`] ready for its handshake
    ///
    /// `force` bypasses the allow-list for administratively trusted
    /// connections.
    pub fn create(
        &self,
        conn: Connection,
        incoming: bool,
        force: bool,
        options: LinkOptions,
    ) -> Link {
        Link::new(self.clone(), conn, incoming, force, options)
    }

    /// Call a peer URI in the background
    ///
    /// Only URI validation errors are returned; the outcome of the dial and
    /// handshake is logged.
    pub fn call(&self, uri: &str, source_interface: Option<&str>) -> Result<()> {
        let target = parse_call_uri(uri, source_interface)?;
        if self.is_stopped() {
            return Err(LinkError::Stopped);
        }

        let links = self.clone();
        let uri = uri.to_string();
        tokio::spawn(async move {
            match links.connect(target).await {
                Ok(Some(_)) => debug!("call to {} found an existing link", uri),
                Ok(None) => {}
                Err(LinkError::Tunnel(_)) => {}
                Err(e) => warn!("Failed to call {}: {}", uri, e),
            }
        });
        Ok(())
    }

    /// Dial `target` and run the link to completion
    pub async fn connect(&self, target: CallTarget) -> Result<Option<ClosedSignal>> {
        if self.is_stopped() {
            return Err(LinkError::Stopped);
        }
        let mut dial = target.dial;
        if dial.timeout.is_none() {
            dial.timeout = Some(self.inner.settings.read().await.dial_timeout);
        }

        let conn = self.inner.transport.dial(&dial).await?;
        self.create(conn, false, false, target.options)
            .handler()
            .await
    }

    /// Run the handshake for an accepted connection
    pub async fn accept(&self, conn: Connection, force: bool) -> Result<Option<ClosedSignal>> {
        self.create(conn, true, force, LinkOptions::default())
            .handler()
            .await
    }

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    /// Start a listener and serve its inbound connections
    pub async fn listen(&self, spec: ListenSpec) -> Result<SocketAddr> {
        if self.is_stopped() {
            return Err(LinkError::Stopped);
        }

        let mut listeners = self.inner.listeners.lock().await;
        if let Some(existing) = listeners.get(&spec) {
            return Ok(existing.local_addr);
        }

        let listener = self.inner.transport.listen(&spec).await?;
        let local_addr = listener.local_addr();
        let task = tokio::spawn(serve_listener(self.clone(), listener));
        listeners.insert(spec, ActiveListener { local_addr, task });
        Ok(local_addr)
    }

    /// Stop one listener; links it accepted stay up
    pub async fn unlisten(&self, spec: &ListenSpec) -> bool {
        match self.inner.listeners.lock().await.remove(spec) {
            Some(listener) => {
                listener.task.abort();
                info!("Stopped {} listener on {}", spec.kind.as_str().to_uppercase(), listener.local_addr);
                true
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Apply new settings without dropping existing links
    ///
    /// The allow-list and timeouts apply to handshakes that start afterwards.
    /// Listeners missing from the new configuration are stopped and new ones
    /// started.
    pub async fn reconfigure(&self, config: &LinkConfig) -> Result<()> {
        let settings = config.settings()?;
        let wanted = settings.listen.clone();
        *self.inner.settings.write().await = settings;

        let current: Vec<ListenSpec> = self.inner.listeners.lock().await.keys().copied().collect();
        for spec in current.iter().filter(|spec| !wanted.contains(spec)) {
            self.unlisten(spec).await;
        }

        let mut first_error = None;
        for spec in wanted.into_iter().filter(|spec| !current.contains(spec)) {
            if let Err(e) = self.listen(spec).await {
                warn!("Failed to start {} listener: {}", spec, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop the link layer: fire the stop signal, stop listeners and the
    /// transport. Idempotent; returns the first transport stop error.
    pub async fn stop(&self) -> Result<()> {
        if self.inner.stopped.send_replace(true) {
            return Ok(());
        }

        for (_, listener) in self.inner.listeners.lock().await.drain() {
            listener.task.abort();
        }
        self.inner.transport.stop().await?;
        info!("Link layer stopped");
        Ok(())
    }

    /// Receiver that flips to `true` when the link layer stops
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.inner.stopped.subscribe()
    }
}

async fn serve_listener(links: Links, mut listener: Listener) {
    let spec = listener.spec();
    let mut stopped = links.stop_signal();
    loop {
        let conn = tokio::select! {
            _ = stopped.wait_for(|stopped| *stopped) => break,
            conn = listener.accept() => match conn {
                Some(conn) => conn,
                None => break,
            },
        };

        let links = links.clone();
        tokio::spawn(async move {
            let name = conn.name.clone();
            match links.accept(conn, false).await {
                Ok(Some(_)) => debug!("inbound {} duplicates an existing link", name),
                Ok(None) | Err(LinkError::Tunnel(_)) => {}
                Err(e) => debug!("inbound {} failed: {}", name, e),
            }
        });
    }
    debug!("{} listener finished", spec);
}
