//! Link manager lifecycle: listeners, reconfiguration and shutdown


use meshlink_core::transport::parse_listen_uri;
use meshlink_core::{LinkConfig, LinkError, TransportKind};
use test_utils::*;

#[tokio::test]
async fn test_listener_feeds_incoming_links() {
    let (links, transport, tunnel) = mock_links(fast_settings());
    let spec = parse_listen_uri("tcp://127.0.0.1:9001").unwrap();
    let bound = links.listen(spec).await.unwrap();
    assert_eq!(bound.port(), 9001);
    assert_eq!(links.listening().await, vec![(spec, bound)]);

    // Listening twice on the same address is a no-op
    assert_eq!(links.listen(spec).await.unwrap(), bound);

    let (conn, mut remote) = connection_pair(TransportKind::Tcp, "127.0.0.1", "127.0.0.2");
    transport.inject_inbound(conn).await;
    remote_handshake(&mut remote, remote_meta(0x01, 2)).await;

    eventually(|| {
        let links = links.clone();
        async move { links.registry().count() == 1 }
    })
    .await;
    let peers = links.peers().await;
    assert!(peers[0].incoming);
    assert_eq!(peers[0].key.identity, identity(0x01));

    drop(remote);
    eventually(|| {
        let links = links.clone();
        async move { links.registry().count() == 0 }
    })
    .await;
    assert_eq!(tunnel.calls(), vec![(identity(0x01), 2)]);
}

#[tokio::test]
async fn test_unlisten() {
    let (links, _transport, _tunnel) = mock_links(fast_settings());
    let spec = parse_listen_uri("tcp://127.0.0.1:9002").unwrap();
    links.listen(spec).await.unwrap();

    assert!(links.unlisten(&spec).await);
    assert!(!links.unlisten(&spec).await);
    assert!(links.listening().await.is_empty());
}

#[tokio::test]
async fn test_reconfigure_keeps_existing_links() {
    let (links, transport, _tunnel) = mock_links(fast_settings());
    links
        .reconfigure(&LinkConfig::new().with_listen("tcp://127.0.0.1:9003"))
        .await
        .unwrap();
    assert_eq!(links.listening().await.len(), 1);

    let (conn, mut remote) = connection_pair(TransportKind::Tcp, "127.0.0.1", "127.0.0.2");
    transport.inject_inbound(conn).await;
    remote_handshake(&mut remote, remote_meta(0x01, 0)).await;
    eventually(|| {
        let links = links.clone();
        async move { links.registry().count() == 1 }
    })
    .await;

    // Allow-list now excludes the live peer and the listener moves
    let config = LinkConfig::new()
        .with_listen("tcp://127.0.0.1:9004")
        .with_allowed_key(&identity(0x02));
    links.reconfigure(&config).await.unwrap();

    assert_eq!(links.registry().count(), 1);
    let listening = links.listening().await;
    assert_eq!(listening.len(), 1);
    assert_eq!(listening[0].1.port(), 9004);
    assert!(!links.settings().await.is_allowed(&identity(0x01)));

    // New handshakes see the new allow-list
    let (conn, mut rejected) = connection_pair(TransportKind::Tcp, "127.0.0.1", "127.0.0.3");
    transport.inject_inbound(conn).await;
    remote_handshake(&mut rejected, remote_meta(0x03, 0)).await;
    assert!(is_closed(&mut rejected).await);
    assert_eq!(links.registry().count(), 1);
}

#[tokio::test]
async fn test_reconfigure_rejects_invalid_config() {
    let (links, _transport, _tunnel) = mock_links(fast_settings());
    let before = links.settings().await;

    let mut config = LinkConfig::new();
    config.allowed_public_keys.push("zz".into());
    assert!(matches!(
        links.reconfigure(&config).await,
        Err(LinkError::Config(_))
    ));
    assert_eq!(links.settings().await, before);
}

#[tokio::test]
async fn test_call_validates_uri() {
    let (links, transport, _tunnel) = mock_links(fast_settings());

    assert!(matches!(
        links.call("quic://10.0.0.2:9001", None),
        Err(LinkError::UnknownScheme(_))
    ));
    assert!(matches!(
        links.call("tcp://10.0.0.2:9001?metric=300", None),
        Err(LinkError::InvalidUri { .. })
    ));

    // A valid URI dials in the background; the failed dial is only logged
    links.call("tcp://10.0.0.2:9001?metric=4", Some("eth0")).unwrap();
    eventually(|| {
        let transport = transport.clone();
        async move { transport.dialled().await.len() == 1 }
    })
    .await;
    let dialled = transport.dialled().await;
    assert_eq!(dialled[0].addr, "10.0.0.2:9001");
    assert_eq!(dialled[0].source_interface.as_deref(), Some("eth0"));
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (links, transport, _tunnel) = mock_links(fast_settings());
    let spec = parse_listen_uri("tcp://127.0.0.1:9005").unwrap();
    links.listen(spec).await.unwrap();
    let mut stop_signal = links.stop_signal();

    links.stop().await.unwrap();
    links.stop().await.unwrap();

    assert!(links.is_stopped());
    assert!(*stop_signal.borrow_and_update());
    assert_eq!(transport.stop_count(), 1);
    assert!(links.listening().await.is_empty());

    assert!(matches!(
        links.call("tcp://10.0.0.2:9001", None),
        Err(LinkError::Stopped)
    ));
    assert!(matches!(links.listen(spec).await, Err(LinkError::Stopped)));
}
