//! Peer and listener URIs
//!
//! Peers are written as `tcp://host:port`, `tls://host:port` or
//! `socks://[user:pass@]proxy:port/host:port`, optionally followed by query
//! parameters:
//!
//! - `ed25519=<hex>` (repeatable): pin the remote node's public key
//! - `metric=<0-255>`: locally asserted link cost
//!
//! Listeners are written as `tcp://ip:port` or `tls://ip:port`.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use url::{Host, Url};

use crate::errors::{ConfigError, LinkError};
use crate::link::LinkOptions;
use crate::transport::{DialTarget, ListenSpec, ProxyAuth, SocksProxy};
use crate::types::{PeerIdentity, TransportKind};

/// A parsed call URI: where to dial and with which link options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub dial: DialTarget,
    pub options: LinkOptions,
}

/// Parse a peer URI into a dial target and link options
pub fn parse_call_uri(uri: &str, source_interface: Option<&str>) -> Result<CallTarget, LinkError> {
    let url = Url::parse(uri).map_err(|e| LinkError::invalid_uri(uri, e.to_string()))?;
    let kind = TransportKind::from_scheme(url.scheme())
        .ok_or_else(|| LinkError::UnknownScheme(url.scheme().to_string()))?;
    let options = parse_options(uri, &url)?;

    let mut dial = match kind {
        TransportKind::Tcp | TransportKind::Tls => DialTarget::new(kind, authority(uri, &url)?),
        TransportKind::Socks => {
            let target = url
                .path()
                .trim_matches('/')
                .split('/')
                .next()
                .filter(|segment| !segment.is_empty())
                .ok_or_else(|| LinkError::invalid_uri(uri, "socks URI has no target in its path"))?
                .to_string();
            let auth = if url.username().is_empty() {
                None
            } else {
                Some(ProxyAuth {
                    user: url.username().to_string(),
                    password: url.password().unwrap_or_default().to_string(),
                })
            };
            let mut dial = DialTarget::new(kind, target);
            dial.proxy = Some(SocksProxy {
                addr: authority(uri, &url)?,
                auth,
            });
            dial
        }
    };
    dial.source_interface = source_interface
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(CallTarget { dial, options })
}

/// Parse a listener URI; the host must be an IP literal
pub fn parse_listen_uri(uri: &str) -> Result<ListenSpec, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidListen {
        uri: uri.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
    let kind = match TransportKind::from_scheme(url.scheme()) {
        Some(TransportKind::Socks) => return Err(invalid("cannot listen on a socks URI")),
        Some(kind) => kind,
        None => return Err(invalid("unknown listen scheme")),
    };

    let ip: IpAddr = match url.host() {
        Some(Host::Ipv4(ip)) => ip.into(),
        Some(Host::Ipv6(ip)) => ip.into(),
        Some(Host::Domain(domain)) => domain
            .parse()
            .map_err(|_| invalid("listen host must be an IP address"))?,
        None => return Err(invalid("missing host")),
    };
    let port = url.port().ok_or_else(|| invalid("missing port"))?;

    Ok(ListenSpec {
        kind,
        addr: SocketAddr::new(ip, port),
    })
}

fn authority(uri: &str, url: &Url) -> Result<String, LinkError> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| LinkError::invalid_uri(uri, "missing host"))?;
    let port = url
        .port()
        .ok_or_else(|| LinkError::invalid_uri(uri, "missing port"))?;
    Ok(format!("{}:{}", host, port))
}

fn parse_options(uri: &str, url: &Url) -> Result<LinkOptions, LinkError> {
    let mut pinned_keys = HashSet::new();
    let mut metrics = Vec::new();

    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "ed25519" => {
                let key: PeerIdentity = value
                    .parse()
                    .map_err(|e: ConfigError| LinkError::invalid_uri(uri, e.to_string()))?;
                pinned_keys.insert(key);
            }
            "metric" => metrics.push(value.into_owned()),
            _ => {}
        }
    }

    let metric = match metrics.as_slice() {
        [] => 0,
        [value] => value.parse::<u8>().map_err(|_| {
            LinkError::invalid_uri(uri, format!("metric must be 0-255, got {:?}", value))
        })?,
        _ => return Err(LinkError::invalid_uri(uri, "metric given more than once")),
    };

    Ok(LinkOptions {
        pinned_keys,
        metric,
    })
}
