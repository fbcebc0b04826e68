//! Two nodes linking over real loopback TCP sockets


use std::net::SocketAddr;
use std::sync::Arc;

use meshlink_core::{parse_call_uri, DrainTunnel, LinkConfig, LinkError, Links, PeerIdentity};
use test_utils::*;

async fn listening_node(id: u8, config: LinkConfig) -> (Links, SocketAddr) {
    let links = Links::init(identity(id), &config.with_listen("tcp://127.0.0.1:0"), Arc::new(DrainTunnel))
        .await
        .unwrap();
    let addr = links.listening().await[0].1;
    (links, addr)
}

async fn dialing_node(id: u8) -> Links {
    Links::init(identity(id), &LinkConfig::new(), Arc::new(DrainTunnel))
        .await
        .unwrap()
}

async fn wait_for_count(links: &Links, count: usize) {
    eventually(|| {
        let links = links.clone();
        async move { links.registry().count() == count }
    })
    .await;
}

#[tokio::test]
async fn test_nodes_link_over_tcp() {
    let (server, addr) = listening_node(0x01, LinkConfig::new()).await;
    let client = dialing_node(0x02).await;
    assert_ne!(addr.port(), 0);

    let target = parse_call_uri(&format!("tcp://{}?metric=3", addr), None).unwrap();
    let call = tokio::spawn({
        let client = client.clone();
        async move { client.connect(target).await }
    });

    wait_for_count(&server, 1).await;
    wait_for_count(&client, 1).await;

    let server_view = &server.peers().await[0];
    assert!(server_view.incoming);
    assert_eq!(server_view.key.identity, identity(0x02));
    assert_eq!(server_view.key.remote, "127.0.0.1");

    let client_view = &client.peers().await[0];
    assert!(!client_view.incoming);
    assert_eq!(client_view.key.identity, identity(0x01));
    assert!(!call.is_finished());

    server.stop().await.unwrap();
    client.stop().await.unwrap();
    call.abort();
}

#[tokio::test]
async fn test_pinned_key_over_tcp() {
    let (server, addr) = listening_node(0x01, LinkConfig::new()).await;
    let client = dialing_node(0x02).await;

    let wrong = PeerIdentity::new([0x09; 32]);
    let uri = format!("tcp://{}?ed25519={}", addr, wrong.to_hex());
    let result = client.connect(parse_call_uri(&uri, None).unwrap()).await;
    assert!(matches!(result, Err(LinkError::PinnedKeyMismatch { .. })));
    assert_eq!(client.registry().count(), 0);

    // The server side sees the socket close and cleans up
    wait_for_count(&server, 0).await;
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_allow_list_over_tcp() {
    let config = LinkConfig::new().with_allowed_key(&identity(0x07));
    let (server, addr) = listening_node(0x01, config).await;
    let client = dialing_node(0x02).await;

    // The server drops us after the handshake; the client link ends when
    // its tunnel sees EOF
    let result = client
        .connect(parse_call_uri(&format!("tcp://{}", addr), None).unwrap())
        .await;
    assert!(matches!(result, Ok(None)));
    assert_eq!(server.registry().count(), 0);
    assert_eq!(client.registry().count(), 0);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_dial_refused() {
    let (server, addr) = listening_node(0x01, LinkConfig::new()).await;
    server.stop().await.unwrap();
    // Give the aborted accept loop a moment to release the socket
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let client = dialing_node(0x02).await;
    let result = client
        .connect(parse_call_uri(&format!("tcp://{}", addr), None).unwrap())
        .await;
    assert!(matches!(result, Err(LinkError::Transport(_))));
}
