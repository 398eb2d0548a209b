//! Wire-level behavior of a running node: framing violations, announcements,
//! evictions and walk termination.

use std::collections::BTreeSet;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use meshjoin_core::{
    identity_of, recv_framed, send_framed, DiscoveryRequest, EvictionRequest,
    NeighborAnnouncement,
};

use crate::*;

#[tokio::test]
async fn test_malformed_prefix_closes_only_that_connection() {
    let node = spawn_node(2).await;

    let mut raw = TcpStream::connect(node.addr()).await.unwrap();
    raw.write_all(b"XXXXXXXX").await.unwrap();
    let mut rest = Vec::new();
    let _ = raw.read_to_end(&mut rest).await;
    assert!(rest.is_empty(), "node answered a malformed frame");

    // The listener keeps serving.
    let walk = DiscoveryRequest::new(&phantom(), node.addr(), 1);
    let found = client().request_neighbors(walk).await.unwrap();
    assert!(found.status);
    assert_eq!(found.candidate_addrs, vec![node.addr()]);
}

#[tokio::test]
async fn test_unknown_kind_gets_no_response() {
    let node = spawn_node(2).await;

    let mut raw = TcpStream::connect(node.addr()).await.unwrap();
    send_framed(&mut raw, br#"{"kind":"gossip","uid":"00"}"#)
        .await
        .unwrap();
    assert!(recv_framed(&mut raw).await.is_err());
    assert!(node.handle.table().is_empty().await);
}

#[tokio::test]
async fn test_announcement_is_idempotent() {
    let node = spawn_node(2).await;
    let other = phantom();
    let announcement = NeighborAnnouncement::from_identity(&other);

    for _ in 0..2 {
        let ack = client()
            .announce(node.addr(), announcement.clone())
            .await
            .unwrap();
        assert!(ack.registered);
        assert_eq!(ack.source_addr, node.addr());
    }
    assert_eq!(node.degree().await, 1);
    assert_eq!(node.neighbor_addrs().await, vec![other.addr()]);
}

#[tokio::test]
async fn test_unreserved_announcement_to_full_table_is_refused() {
    let node = spawn_node(1).await;
    let existing = phantom();
    node.handle
        .table()
        .try_add(existing.uid().clone(), existing.addr())
        .await;

    let ack = client()
        .announce(node.addr(), NeighborAnnouncement::from_identity(&phantom()))
        .await
        .unwrap();
    assert!(!ack.registered);
    assert_eq!(node.neighbor_addrs().await, vec![existing.addr()]);
}

#[tokio::test]
async fn test_eviction_accepted_only_when_full() {
    let a = spawn_node(2).await;
    let b = spawn_node(2).await;
    link(&a, &b).await;

    let request = EvictionRequest {
        uid: a.uid(),
        source_addr: a.addr(),
        on_behalf_of: None,
    };

    // b has room, so it keeps the link.
    let resp = client()
        .evict(b.addr(), request.clone(), JOIN_DEADLINE)
        .await
        .unwrap();
    assert!(!resp.accepted);
    assert!(b.handle.table().contains(&a.uid()).await);

    let filler = phantom();
    b.handle
        .table()
        .try_add(filler.uid().clone(), filler.addr())
        .await;

    let joining = phantom();
    let resp = client()
        .evict(
            b.addr(),
            EvictionRequest {
                on_behalf_of: Some(joining.uid().clone()),
                ..request
            },
            JOIN_DEADLINE,
        )
        .await
        .unwrap();
    assert!(resp.accepted);
    assert_eq!(resp.source_addr, b.addr());
    assert!(!b.handle.table().contains(&a.uid()).await);

    // The freed slot is held for the joining node.
    let snapshot = b.handle.snapshot().await;
    assert_eq!(snapshot.neighbors.len(), 1);
    assert_eq!(snapshot.reserved, 1);
}

#[tokio::test]
async fn test_eviction_from_stranger_is_declined() {
    let node = spawn_node(1).await;
    let existing = phantom();
    node.handle
        .table()
        .try_add(existing.uid().clone(), existing.addr())
        .await;

    let stranger = phantom();
    let resp = client()
        .evict(
            node.addr(),
            EvictionRequest {
                uid: stranger.uid().clone(),
                source_addr: stranger.addr(),
                on_behalf_of: None,
            },
            JOIN_DEADLINE,
        )
        .await
        .unwrap();
    assert!(!resp.accepted);
    assert_eq!(node.degree().await, 1);
}

/// A walk through a saturated ring that cannot swap visits every node once
/// and comes back empty handed.
#[tokio::test]
async fn test_walk_terminates_in_saturated_ring() {
    let nodes = spawn_nodes(4, 2).await;
    ring(&nodes).await;
    let origin = phantom();

    let walk = DiscoveryRequest::new(&origin, nodes[0].addr(), 1);
    let found = tokio::time::timeout(JOIN_DEADLINE, client().request_neighbors(walk))
        .await
        .unwrap()
        .unwrap();

    assert!(!found.status);
    assert_eq!(found.remaining_slots, 1);
    assert!(found.candidate_addrs.is_empty());

    let expected: BTreeSet<SocketAddr> = nodes
        .iter()
        .map(|n| n.addr())
        .chain([origin.addr()])
        .collect();
    assert_eq!(found.visited_addrs, expected);

    for node in &nodes {
        let snapshot = node.handle.snapshot().await;
        assert_eq!(snapshot.neighbors.len(), 2);
        assert_eq!(snapshot.reserved, 0);
    }
}

#[tokio::test]
async fn test_revisited_node_returns_walk_unchanged() {
    let node = spawn_node(2).await;
    let origin = phantom();

    let mut walk = DiscoveryRequest::new(&origin, node.addr(), 2);
    walk.visited_addrs.insert(node.addr());
    let found = client().request_neighbors(walk).await.unwrap();

    assert_eq!(found.remaining_slots, 2);
    assert!(found.candidate_addrs.is_empty());
    assert_eq!(node.handle.snapshot().await.reserved, 0);
    assert_eq!(identity_of(found.source_addr), *node.handle.identity().uid());
}

/// A walk whose far end stalls past the caller's wait must not leave a
/// swap behind that nobody upstream heard about.
#[tokio::test]
async fn test_stalled_walk_commits_no_swap_downstream() {
    let timeout = Duration::from_millis(300);
    let a = spawn_node_with(2, timeout).await;
    let b = spawn_node_with(2, timeout).await;
    let c = spawn_node_with(2, timeout).await;

    // a is full through one link plus a slot held for someone else.
    link(&a, &b).await;
    assert!(a.handle.table().try_reserve(phantom().uid()).await);
    link(&b, &c).await;

    // c's second neighbor accepts connections but never answers.
    let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();
    assert!(c.handle.table().try_add(identity_of(silent_addr), silent_addr).await);

    let origin = phantom();
    let walk = DiscoveryRequest::new(&origin, a.addr(), 2)
        .with_budget(timeout - meshjoin_core::HOP_MARGIN);
    let found = PeerClient::new(timeout)
        .request_neighbors(walk)
        .await
        .expect("a answers within the caller's wait");

    // Let anything still running downstream finish.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(!found.status);
    assert_eq!(found.remaining_slots, 2);
    assert!(found.candidate_addrs.is_empty());
    for node in [&b, &c] {
        let snapshot = node.handle.snapshot().await;
        assert_eq!(snapshot.neighbors.len(), 2, "{} lost a link", node.addr());
        assert_eq!(snapshot.reserved, 0, "{} holds a stray slot", node.addr());
    }
    assert!(b.handle.table().contains(&c.uid()).await);
    drop(silent);
}
