//! Transport adapter contract
//!
//! The link layer only needs three things from a transport: a bidirectional
//! byte stream, the ability to bound reads and writes in time (provided by
//! tokio timers around the stream), and a clean close. Transports produce
//! [`Connection`]s either from a listener or from a single dial attempt.
//!
//! The set of transport kinds is closed ([`TransportKind`]); [`TcpTransport`]
//! serves all of them, with TLS wrapping and SOCKS negotiation supplied by
//! the embedding application through [`StreamUpgrade`] and [`ProxyDialer`].

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::TransportError;
use crate::types::TransportKind;

pub mod tcp;
pub mod uri;

pub use tcp::TcpTransport;
pub use uri::{parse_call_uri, parse_listen_uri, CallTarget};

// ----------------------------------------------------------------------------
// Raw Connections
// ----------------------------------------------------------------------------

/// Anything usable as the raw stream underneath a link
pub trait RawConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> RawConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased raw connection
pub type BoxedConnection = Box<dyn RawConnection>;

/// A raw connection plus the labels the link layer keys it by
pub struct Connection {
    pub stream: BoxedConnection,
    pub kind: TransportKind,
    /// Human-readable name, e.g. `tcp://192.0.2.7:9001`
    pub name: String,
    /// Local address label (host only)
    pub local: String,
    /// Remote address label (host only)
    pub remote: String,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Listen / Dial Parameters
// ----------------------------------------------------------------------------

/// Where and how to listen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenSpec {
    pub kind: TransportKind,
    pub addr: SocketAddr,
}

impl fmt::Display for ListenSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.kind, self.addr)
    }
}

/// Credentials for a SOCKS proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub user: String,
    pub password: String,
}

/// SOCKS proxy to dial through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocksProxy {
    pub addr: String,
    pub auth: Option<ProxyAuth>,
}

/// One outbound connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialTarget {
    pub kind: TransportKind,
    /// `host:port` of the remote node
    pub addr: String,
    /// Proxy to go through, for [`TransportKind::Socks`]
    pub proxy: Option<SocksProxy>,
    /// Local interface name or address hint
    pub source_interface: Option<String>,
    /// Upper bound on connection establishment
    pub timeout: Option<Duration>,
}

impl DialTarget {
    pub fn new(kind: TransportKind, addr: impl Into<String>) -> Self {
        Self {
            kind,
            addr: addr.into(),
            proxy: None,
            source_interface: None,
            timeout: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Listener
// ----------------------------------------------------------------------------

/// An active listener: a stream of inbound connections until stopped
///
/// Dropping the listener stops its accept loop.
pub struct Listener {
    spec: ListenSpec,
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<Connection>,
    accept_task: Option<JoinHandle<()>>,
}

impl Listener {
    pub fn new(
        spec: ListenSpec,
        local_addr: SocketAddr,
        incoming: mpsc::Receiver<Connection>,
        accept_task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            spec,
            local_addr,
            incoming,
            accept_task,
        }
    }

    pub fn spec(&self) -> ListenSpec {
        self.spec
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next inbound connection; `None` once the listener has stopped
    pub async fn accept(&mut self) -> Option<Connection> {
        self.incoming.recv().await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("spec", &self.spec)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Capability interface every transport adapter provides
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start listening; inbound connections arrive through the returned [`Listener`]
    async fn listen(&self, spec: &ListenSpec) -> Result<Listener, TransportError>;

    /// Make a single outbound connection attempt
    async fn dial(&self, target: &DialTarget) -> Result<Connection, TransportError>;

    /// Halt all listeners and refuse further dials. Idempotent.
    async fn stop(&self) -> Result<(), TransportError>;
}

// ----------------------------------------------------------------------------
// External Hooks
// ----------------------------------------------------------------------------

/// TLS wrapping supplied by the application
#[async_trait]
pub trait StreamUpgrade: Send + Sync {
    /// Client side of the upgrade; `server_name` is the dialled host
    async fn upgrade_outbound(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> Result<BoxedConnection, TransportError>;

    /// Server side of the upgrade for accepted streams
    async fn upgrade_inbound(&self, stream: TcpStream) -> Result<BoxedConnection, TransportError>;
}

/// SOCKS negotiation supplied by the application
#[async_trait]
pub trait ProxyDialer: Send + Sync {
    /// Connect to `target` through the proxy at `proxy`
    async fn connect(
        &self,
        proxy: &str,
        auth: Option<&ProxyAuth>,
        target: &str,
    ) -> Result<TcpStream, TransportError>;
}
