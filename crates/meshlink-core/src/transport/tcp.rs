//! TCP transport adapter
//!
//! Serves plain TCP directly, TLS through a [`StreamUpgrade`] hook and SOCKS
//! through a [`ProxyDialer`] hook. Each listener runs one accept task;
//! accepted streams are prepared (TLS upgrade, labels) on their own task so
//! a slow client cannot stall the accept loop.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::errors::TransportError;
use crate::transport::{
    BoxedConnection, Connection, DialTarget, ListenSpec, Listener, ProxyDialer, StreamUpgrade,
    Transport,
};
use crate::types::TransportKind;

/// Inbound connections buffered per listener before accept backs off
const ACCEPT_BACKLOG: usize = 64;
/// Pause after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);
/// Limit on the server side of a TLS upgrade unless configured otherwise
const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_secs(30);

// ----------------------------------------------------------------------------
// TCP Transport
// ----------------------------------------------------------------------------

/// Transport adapter for the TCP family of link kinds
pub struct TcpTransport {
    tls: Option<Arc<dyn StreamUpgrade>>,
    socks: Option<Arc<dyn ProxyDialer>>,
    upgrade_timeout: Duration,
    stopped: watch::Sender<bool>,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTransport {
    /// Plain TCP only; TLS and SOCKS stay unavailable until hooks are added
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            tls: None,
            socks: None,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            stopped,
        }
    }

    /// Enable `tls://` links
    pub fn with_tls(mut self, upgrade: Arc<dyn StreamUpgrade>) -> Self {
        self.tls = Some(upgrade);
        self
    }

    /// Enable `socks://` links
    pub fn with_socks(mut self, dialer: Arc<dyn ProxyDialer>) -> Self {
        self.socks = Some(dialer);
        self
    }

    /// Bound the upgrade of accepted `tls://` streams
    pub fn with_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.upgrade_timeout = timeout;
        self
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    fn ensure_running(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            Err(TransportError::Stopped)
        } else {
            Ok(())
        }
    }

    async fn dial_tcp(&self, target: &DialTarget) -> Result<Connection, TransportError> {
        let stream = with_deadline(
            &target.addr,
            target.timeout,
            connect_tcp(&target.addr, target.source_interface.as_deref()),
        )
        .await?;
        let (local, remote) = socket_labels(&stream)?;
        Ok(Connection {
            stream: Box::new(stream),
            kind: TransportKind::Tcp,
            name: format!("tcp://{}", target.addr),
            local,
            remote,
        })
    }

    async fn dial_tls(&self, target: &DialTarget) -> Result<Connection, TransportError> {
        let upgrade = self.tls.as_ref().ok_or_else(|| TransportError::Unavailable {
            kind: TransportKind::Tls,
            reason: "no TLS upgrade configured".to_string(),
        })?;
        let stream = with_deadline(
            &target.addr,
            target.timeout,
            connect_tcp(&target.addr, target.source_interface.as_deref()),
        )
        .await?;
        let (local, remote) = socket_labels(&stream)?;
        let stream = upgrade
            .upgrade_outbound(stream, server_name(&target.addr))
            .await?;
        Ok(Connection {
            stream,
            kind: TransportKind::Tls,
            name: format!("tls://{}", target.addr),
            local,
            remote,
        })
    }

    async fn dial_socks(&self, target: &DialTarget) -> Result<Connection, TransportError> {
        let dialer = self.socks.as_ref().ok_or_else(|| TransportError::Unavailable {
            kind: TransportKind::Socks,
            reason: "no SOCKS dialer configured".to_string(),
        })?;
        let proxy = target
            .proxy
            .as_ref()
            .ok_or_else(|| TransportError::InvalidAddress {
                address: target.addr.clone(),
                reason: "socks link without proxy address".to_string(),
            })?;
        let stream = with_deadline(
            &target.addr,
            target.timeout,
            dialer.connect(&proxy.addr, proxy.auth.as_ref(), &target.addr),
        )
        .await?;
        let local = stream.local_addr()?.ip().to_string();
        Ok(Connection {
            stream: Box::new(stream),
            kind: TransportKind::Socks,
            name: format!("socks://{}/{}", proxy.addr, target.addr),
            local,
            remote: server_name(&target.addr).to_string(),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen(&self, spec: &ListenSpec) -> Result<Listener, TransportError> {
        self.ensure_running()?;
        let tls = match spec.kind {
            TransportKind::Tcp => None,
            TransportKind::Tls => Some(self.tls.clone().ok_or_else(|| {
                TransportError::Unavailable {
                    kind: TransportKind::Tls,
                    reason: "no TLS upgrade configured".to_string(),
                }
            })?),
            TransportKind::Socks => {
                return Err(TransportError::Unavailable {
                    kind: TransportKind::Socks,
                    reason: "cannot listen through a proxy".to_string(),
                })
            }
        };

        let listener = TcpListener::bind(spec.addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        let task = tokio::spawn(accept_loop(
            listener,
            spec.kind,
            tls,
            self.upgrade_timeout,
            tx,
            self.stopped.subscribe(),
        ));

        info!(
            "{} listener started on {}",
            spec.kind.as_str().to_uppercase(),
            local_addr
        );
        Ok(Listener::new(*spec, local_addr, rx, Some(task)))
    }

    async fn dial(&self, target: &DialTarget) -> Result<Connection, TransportError> {
        self.ensure_running()?;
        let attempt = async {
            match target.kind {
                TransportKind::Tcp => self.dial_tcp(target).await,
                TransportKind::Tls => self.dial_tls(target).await,
                TransportKind::Socks => self.dial_socks(target).await,
            }
        };

        // In-flight attempts are dropped when the transport stops
        let mut stopped = self.stopped.subscribe();
        let stop = async {
            let _ = stopped.wait_for(|stopped| *stopped).await;
        };
        tokio::select! {
            _ = stop => Err(TransportError::Stopped),
            result = attempt => result,
        }
    }

    async fn stop(&self) -> Result<(), TransportError> {
        let was_stopped = self.stopped.send_replace(true);
        if !was_stopped {
            debug!("TCP transport stopped");
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Accept Loop
// ----------------------------------------------------------------------------

async fn accept_loop(
    listener: TcpListener,
    kind: TransportKind,
    tls: Option<Arc<dyn StreamUpgrade>>,
    upgrade_timeout: Duration,
    tx: mpsc::Sender<Connection>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        // The watch guard must not live across the retry sleep below
        let stop = async {
            let _ = stopped.wait_for(|stopped| *stopped).await;
        };
        tokio::select! {
            _ = stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    let tx = tx.clone();
                    let tls = tls.clone();
                    tokio::spawn(async move {
                        match inbound_connection(stream, remote_addr, kind, tls, upgrade_timeout).await {
                            Ok(conn) => {
                                if tx.send(conn).await.is_err() {
                                    debug!("listener gone, dropping connection from {}", remote_addr);
                                }
                            }
                            Err(e) => {
                                debug!("dropping inbound {} connection from {}: {}", kind, remote_addr, e);
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("{} accept failed: {}", kind.as_str().to_uppercase(), e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }
    debug!("{} accept loop finished", kind);
}

async fn inbound_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    kind: TransportKind,
    tls: Option<Arc<dyn StreamUpgrade>>,
    upgrade_timeout: Duration,
) -> Result<Connection, TransportError> {
    let _ = stream.set_nodelay(true);
    let (local, remote) = socket_labels(&stream)?;
    let stream: BoxedConnection = match tls {
        Some(upgrade) => tokio::time::timeout(upgrade_timeout, upgrade.upgrade_inbound(stream))
            .await
            .map_err(|_| {
                TransportError::Upgrade(format!(
                    "no TLS handshake from {} within {}ms",
                    remote_addr,
                    upgrade_timeout.as_millis()
                ))
            })??,
        None => Box::new(stream),
    };
    Ok(Connection {
        stream,
        kind,
        name: format!("{}://{}", kind, remote_addr),
        local,
        remote,
    })
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

async fn with_deadline<T, F>(
    target: &str,
    deadline: Option<Duration>,
    fut: F,
) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(duration) => tokio::time::timeout(duration, fut).await.map_err(|_| {
            TransportError::DialTimeout {
                target: target.to_string(),
                duration_ms: duration.as_millis() as u64,
            }
        })?,
        None => fut.await,
    }
}

async fn connect_tcp(addr: &str, source: Option<&str>) -> Result<TcpStream, TransportError> {
    let stream = match source {
        None => TcpStream::connect(addr).await?,
        Some(source) => {
            let remote = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
                TransportError::InvalidAddress {
                    address: addr.to_string(),
                    reason: "no addresses resolved".to_string(),
                }
            })?;
            let socket = if remote.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            bind_source(&socket, source)?;
            socket.connect(remote).await?
        }
    };
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Bind the outgoing socket to a source address or, on Linux, a device name
fn bind_source(socket: &TcpSocket, source: &str) -> Result<(), TransportError> {
    if let Ok(ip) = source.parse::<IpAddr>() {
        socket.bind(SocketAddr::new(ip, 0))?;
        return Ok(());
    }
    bind_device(socket, source)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_device(socket: &TcpSocket, name: &str) -> Result<(), TransportError> {
    socket.bind_device(Some(name.as_bytes()))?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bind_device(_socket: &TcpSocket, name: &str) -> Result<(), TransportError> {
    Err(TransportError::InvalidAddress {
        address: name.to_string(),
        reason: "binding to an interface name is not supported on this platform".to_string(),
    })
}

/// Local and remote host labels of a connected socket
fn socket_labels(stream: &TcpStream) -> Result<(String, String), TransportError> {
    let local = stream.local_addr()?.ip().to_string();
    let remote = stream.peer_addr()?.ip().to_string();
    Ok((local, remote))
}

/// Host part of `host:port`, without IPv6 brackets
fn server_name(addr: &str) -> &str {
    let host = match addr.rfind(':') {
        Some(idx) if !addr[idx + 1..].contains(']') => &addr[..idx],
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_server_name() {
        assert_eq!(server_name("example.com:443"), "example.com");
        assert_eq!(server_name("[::1]:9001"), "::1");
        assert_eq!(server_name("10.0.0.1:80"), "10.0.0.1");
        assert_eq!(server_name("bare-host"), "bare-host");
    }

    #[tokio::test]
    async fn test_listen_and_dial_loopback() {
        let transport = TcpTransport::new();
        let spec = ListenSpec {
            kind: TransportKind::Tcp,
            addr: "127.0.0.1:0".parse().unwrap(),
        };
        let mut listener = transport.listen(&spec).await.unwrap();
        let addr = listener.local_addr();

        let mut outbound = transport
            .dial(&DialTarget::new(TransportKind::Tcp, addr.to_string()))
            .await
            .unwrap();
        assert_eq!(outbound.remote, "127.0.0.1");
        assert_eq!(outbound.name, format!("tcp://{}", addr));

        let mut inbound = listener.accept().await.unwrap();
        assert_eq!(inbound.kind, TransportKind::Tcp);
        assert_eq!(inbound.local, "127.0.0.1");

        outbound.stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        inbound.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_tls_and_socks_unavailable_without_hooks() {
        let transport = TcpTransport::new();
        let err = transport
            .dial(&DialTarget::new(TransportKind::Tls, "127.0.0.1:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unavailable { .. }));

        let err = transport
            .dial(&DialTarget::new(TransportKind::Socks, "127.0.0.1:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_refuses_work() {
        let transport = TcpTransport::new();
        let spec = ListenSpec {
            kind: TransportKind::Tcp,
            addr: "127.0.0.1:0".parse().unwrap(),
        };
        let mut listener = transport.listen(&spec).await.unwrap();

        transport.stop().await.unwrap();
        transport.stop().await.unwrap();
        assert!(transport.is_stopped());

        // accept loop exits and the channel drains to None
        assert!(listener.accept().await.is_none());
        assert!(matches!(
            transport.listen(&spec).await,
            Err(TransportError::Stopped)
        ));
        assert!(matches!(
            transport
                .dial(&DialTarget::new(TransportKind::Tcp, "127.0.0.1:1"))
                .await,
            Err(TransportError::Stopped)
        ));
    }
    /// TLS stand-in that passes the stream through untouched
    struct Passthrough;

    #[async_trait]
    impl StreamUpgrade for Passthrough {
        async fn upgrade_outbound(
            &self,
            stream: TcpStream,
            _server_name: &str,
        ) -> Result<BoxedConnection, TransportError> {
            Ok(Box::new(stream))
        }

        async fn upgrade_inbound(&self, stream: TcpStream) -> Result<BoxedConnection, TransportError> {
            Ok(Box::new(stream))
        }
    }

    /// Proxy that records its arguments and connects straight to `via`,
    /// or never completes when `via` is `None`
    struct DirectProxy {
        via: Option<SocketAddr>,
        seen: std::sync::Mutex<Vec<(String, Option<String>, String)>>,
    }

    #[async_trait]
    impl ProxyDialer for DirectProxy {
        async fn connect(
            &self,
            proxy: &str,
            auth: Option<&crate::transport::ProxyAuth>,
            target: &str,
        ) -> Result<TcpStream, TransportError> {
            self.seen.lock().unwrap().push((
                proxy.to_string(),
                auth.map(|a| a.user.clone()),
                target.to_string(),
            ));
            match self.via {
                Some(addr) => Ok(TcpStream::connect(addr).await?),
                None => std::future::pending().await,
            }
        }
    }

    /// TLS stand-in whose server side never finishes
    struct StalledUpgrade;

    #[async_trait]
    impl StreamUpgrade for StalledUpgrade {
        async fn upgrade_outbound(
            &self,
            stream: TcpStream,
            _server_name: &str,
        ) -> Result<BoxedConnection, TransportError> {
            Ok(Box::new(stream))
        }

        async fn upgrade_inbound(&self, _stream: TcpStream) -> Result<BoxedConnection, TransportError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_inbound_upgrade_is_bounded() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(server.local_addr().unwrap()).await.unwrap();
        let (stream, remote_addr) = server.accept().await.unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            inbound_connection(
                stream,
                remote_addr,
                TransportKind::Tls,
                Some(Arc::new(StalledUpgrade)),
                Duration::from_millis(50),
            ),
        )
        .await
        .expect("upgrade deadline did not fire");
        assert!(matches!(result, Err(TransportError::Upgrade(_))));
    }

    #[tokio::test]
    async fn test_stalled_tls_client_does_not_block_listener() {
        let transport = TcpTransport::new()
            .with_tls(Arc::new(StalledUpgrade))
            .with_upgrade_timeout(Duration::from_millis(50));
        let spec = ListenSpec {
            kind: TransportKind::Tls,
            addr: "127.0.0.1:0".parse().unwrap(),
        };
        let mut listener = transport.listen(&spec).await.unwrap();
        let _client = TcpStream::connect(listener.local_addr()).await.unwrap();

        // The stalled stream is dropped, never handed to the listener
        let accepted = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(accepted.is_err());

        // Stopping still ends the accept loop
        transport.stop().await.unwrap();
        assert!(listener.accept().await.is_none());
    }

    #[tokio::test]
    async fn test_tls_hook_used_on_both_sides() {
        let transport = TcpTransport::new().with_tls(Arc::new(Passthrough));
        let spec = ListenSpec {
            kind: TransportKind::Tls,
            addr: "127.0.0.1:0".parse().unwrap(),
        };
        let mut listener = transport.listen(&spec).await.unwrap();
        let addr = listener.local_addr();

        let outbound = transport
            .dial(&DialTarget::new(TransportKind::Tls, addr.to_string()))
            .await
            .unwrap();
        assert_eq!(outbound.kind, TransportKind::Tls);
        assert_eq!(outbound.name, format!("tls://{}", addr));

        let inbound = listener.accept().await.unwrap();
        assert_eq!(inbound.kind, TransportKind::Tls);
    }

    #[tokio::test]
    async fn test_socks_hook_receives_proxy_and_target() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = Arc::new(DirectProxy {
            via: Some(server.local_addr().unwrap()),
            seen: Default::default(),
        });
        let transport = TcpTransport::new().with_socks(proxy.clone());

        let mut target = DialTarget::new(TransportKind::Socks, "node.example:9001");
        target.proxy = Some(crate::transport::SocksProxy {
            addr: "127.0.0.1:1080".to_string(),
            auth: Some(crate::transport::ProxyAuth {
                user: "alice".to_string(),
                password: "secret".to_string(),
            }),
        });
        let conn = transport.dial(&target).await.unwrap();
        assert_eq!(conn.name, "socks://127.0.0.1:1080/node.example:9001");
        assert_eq!(conn.remote, "node.example");

        let seen = proxy.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(
                "127.0.0.1:1080".to_string(),
                Some("alice".to_string()),
                "node.example:9001".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_stop_aborts_in_flight_dial() {
        let transport = Arc::new(TcpTransport::new().with_socks(Arc::new(DirectProxy {
            via: None,
            seen: Default::default(),
        })));
        let mut target = DialTarget::new(TransportKind::Socks, "node.example:9001");
        target.proxy = Some(crate::transport::SocksProxy {
            addr: "127.0.0.1:1080".to_string(),
            auth: None,
        });

        let dial = tokio::spawn({
            let transport = transport.clone();
            async move { transport.dial(&target).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), dial)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::Stopped)));
    }
}
