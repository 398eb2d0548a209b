//! Joining through seeds: admission, multi-seed accumulation, swaps and the
//! degree bound.

use crate::*;

/// A lone seed has room for one link only; the joiner asked for two.
#[tokio::test]
async fn test_single_empty_seed_reply() {
    let seed = spawn_node(2).await;
    let joiner = spawn_node(2).await;

    let walk = meshjoin_core::DiscoveryRequest::new(
        joiner.handle.identity(),
        seed.addr(),
        2,
    );
    let found = client().request_neighbors(walk).await.unwrap();
    assert!(!found.status);
    assert_eq!(found.remaining_slots, 1);
    assert_eq!(found.candidate_addrs, vec![seed.addr()]);
    assert_eq!(found.source_addr, seed.addr());
    assert_eq!(found.dest_addr, joiner.addr());
    assert_eq!(seed.handle.snapshot().await.reserved, 1);
}

#[tokio::test]
async fn test_single_empty_seed_join() {
    let seed = spawn_node(2).await;
    let joiner = spawn_node(2).await;

    let report = joiner.join(&[seed.addr()]).await;
    assert!(!report.satisfied);
    assert_eq!(report.candidates, vec![seed.addr()]);
    assert_eq!(report.joined, vec![seed.addr()]);
    assert!(report.is_degraded(2));

    assert_eq!(joiner.neighbor_addrs().await, vec![seed.addr()]);
    assert_eq!(seed.neighbor_addrs().await, vec![joiner.addr()]);
    assert_eq!(seed.handle.snapshot().await.reserved, 0);
}

/// The first seed is full and its neighbors are gone, so it offers nothing.
/// The second seed and its neighbor cover both slots; the third seed is
/// never asked.
#[tokio::test]
async fn test_second_seed_satisfies_join() {
    let stuck = spawn_node(2).await;
    for _ in 0..2 {
        let gone = phantom();
        assert!(stuck.handle.table().try_add(gone.uid().clone(), gone.addr()).await);
    }

    let open = spawn_node(3).await;
    let behind = spawn_node(2).await;
    link(&open, &behind).await;
    let unused = spawn_node(2).await;

    let joiner = spawn_node(2).await;
    let report = joiner
        .join(&[stuck.addr(), open.addr(), unused.addr()])
        .await;
    assert!(report.satisfied);
    assert_eq!(report.candidates, vec![open.addr(), behind.addr()]);

    let mut expected = vec![open.addr(), behind.addr()];
    expected.sort();
    assert_eq!(joiner.neighbor_addrs().await, expected);

    // The stuck seed kept its (dead) links and holds nothing for the joiner.
    let stuck_state = stuck.handle.snapshot().await;
    assert_eq!(stuck_state.neighbors.len(), 2);
    assert_eq!(stuck_state.reserved, 0);

    let untouched = unused.handle.snapshot().await;
    assert!(untouched.neighbors.is_empty());
    assert_eq!(untouched.reserved, 0);
}

/// Joining a saturated triangle breaks one ring link and splices the
/// newcomer into it.
#[tokio::test]
async fn test_saturated_ring_swaps_link() {
    let ring_nodes = spawn_nodes(3, 2).await;
    ring(&ring_nodes).await;
    let joiner = spawn_node(2).await;

    let report = joiner.join(&[ring_nodes[0].addr()]).await;
    assert!(report.satisfied);
    assert_eq!(report.joined.len(), 2);
    assert_eq!(joiner.degree().await, 2);

    for node in &ring_nodes {
        assert_eq!(node.degree().await, 2, "{} lost its degree", node.addr());
    }

    // Exactly two ring nodes now point at the joiner.
    let mut linked = 0;
    for node in &ring_nodes {
        if node.neighbor_addrs().await.contains(&joiner.addr()) {
            linked += 1;
        }
    }
    assert_eq!(linked, 2);

    let all: Vec<&TestNode> = ring_nodes.iter().chain([&joiner]).collect();
    assert_symmetric(&all).await;
}

/// The joining node is not a candidate for itself.
#[tokio::test]
async fn test_own_address_in_seed_list_is_skipped() {
    let seed = spawn_node(2).await;
    let joiner = spawn_node(1).await;

    let report = joiner.join(&[joiner.addr(), seed.addr()]).await;
    assert!(report.satisfied);
    assert_eq!(report.joined, vec![seed.addr()]);
}

#[tokio::test]
async fn test_unreachable_seed_falls_through() {
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let seed = spawn_node(1).await;
    let joiner = spawn_node(1).await;

    let report = joiner.join(&[dead, seed.addr()]).await;
    assert!(report.satisfied);
    assert_eq!(report.joined, vec![seed.addr()]);
}

/// Joiners arriving one by one through the same seed never push any table
/// past its degree target, and every link ends up symmetric.
#[tokio::test]
async fn test_degree_bound_sequential_joins() {
    const TARGET: usize = 2;
    let seed = spawn_node(TARGET).await;
    let joiners = spawn_nodes(6, TARGET).await;

    for joiner in &joiners {
        joiner.join(&[seed.addr()]).await;
    }

    let all: Vec<&TestNode> = std::iter::once(&seed).chain(joiners.iter()).collect();
    for node in &all {
        let snapshot = node.handle.snapshot().await;
        assert!(
            snapshot.neighbors.len() <= TARGET,
            "{} holds {} neighbors",
            node.addr(),
            snapshot.neighbors.len()
        );
    }
    assert_symmetric(&all).await;

    // From the third joiner on, every walk can swap, so late joiners are full.
    assert_eq!(joiners[5].degree().await, TARGET);
}

#[tokio::test]
async fn test_degree_bound_concurrent_joins() {
    const TARGET: usize = 3;
    let seeds = spawn_nodes(3, TARGET).await;
    ring(&seeds).await;
    let joiners = spawn_nodes(8, TARGET).await;

    let seed_addrs: Vec<SocketAddr> = seeds.iter().map(|n| n.addr()).collect();
    let mut tasks = Vec::new();
    for joiner in &joiners {
        let handle = joiner.handle.clone();
        let seed_addrs = seed_addrs.clone();
        tasks.push(tokio::spawn(async move {
            tokio::time::timeout(JOIN_DEADLINE, handle.bootstrap(&seed_addrs)).await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok(), "a join hung");
    }

    for node in seeds.iter().chain(joiners.iter()) {
        let snapshot = node.handle.snapshot().await;
        assert!(snapshot.neighbors.len() + snapshot.reserved <= TARGET);
    }
}
