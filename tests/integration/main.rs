//! meshjoin integration test harness.
//!
//! Every test runs real nodes on loopback with OS-assigned ports and talks
//! to them over TCP. Nothing outside the test process is required:
//!
//!   cargo test --test integration
//!
//! Each node's listener stops when its `TestNode` is dropped.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use meshjoin_core::{NodeIdentity, Uid};
use meshjoin_services::{Node, NodeHandle, NodeSettings, PeerClient};

mod join;
mod protocol;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for any single join in these tests.
pub const JOIN_DEADLINE: Duration = Duration::from_secs(10);

pub struct TestNode {
    pub handle: NodeHandle,
    _shutdown: broadcast::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestNode {
    pub fn addr(&self) -> SocketAddr {
        self.handle.addr()
    }

    pub fn uid(&self) -> Uid {
        self.handle.identity().uid().clone()
    }

    pub async fn neighbor_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self
            .handle
            .table()
            .neighbors()
            .await
            .into_iter()
            .map(|(_, addr)| addr)
            .collect();
        addrs.sort();
        addrs
    }

    pub async fn degree(&self) -> usize {
        self.handle.table().len().await
    }

    /// Join through `seeds`, failing the test if it hangs.
    pub async fn join(&self, seeds: &[SocketAddr]) -> meshjoin_services::JoinReport {
        tokio::time::timeout(JOIN_DEADLINE, self.handle.bootstrap(seeds))
            .await
            .expect("join did not finish in time")
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a listening node with the given degree target.
pub async fn spawn_node(degree_target: usize) -> TestNode {
    spawn_node_with(degree_target, Duration::from_secs(5)).await
}

/// Like [`spawn_node`], with a custom round-trip timeout.
pub async fn spawn_node_with(degree_target: usize, round_trip_timeout: Duration) -> TestNode {
    let mut settings = NodeSettings::local(degree_target);
    settings.round_trip_timeout = round_trip_timeout;
    let node = Node::bind(settings).await.expect("bind test node");
    let handle = node.handle();
    let (shutdown, rx) = broadcast::channel(1);
    let task = tokio::spawn(node.run(rx));
    TestNode {
        handle,
        _shutdown: shutdown,
        task,
    }
}

pub async fn spawn_nodes(count: usize, degree_target: usize) -> Vec<TestNode> {
    let mut nodes = Vec::with_capacity(count);
    for _ in 0..count {
        nodes.push(spawn_node(degree_target).await);
    }
    nodes
}

/// Link two nodes directly in both tables.
pub async fn link(a: &TestNode, b: &TestNode) {
    assert!(a.handle.table().try_add(b.uid(), b.addr()).await);
    assert!(b.handle.table().try_add(a.uid(), a.addr()).await);
}

/// Close the nodes into a ring: 0-1, 1-2, ..., n-1 - 0.
pub async fn ring(nodes: &[TestNode]) {
    for i in 0..nodes.len() {
        link(&nodes[i], &nodes[(i + 1) % nodes.len()]).await;
    }
}

/// An address nobody listens on.
pub fn phantom() -> NodeIdentity {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    NodeIdentity::new(listener.local_addr().expect("probe addr"))
}

pub fn client() -> PeerClient {
    PeerClient::new(Duration::from_secs(5))
}

/// Every neighbor link is present on both ends.
pub async fn assert_symmetric(nodes: &[&TestNode]) {
    for node in nodes {
        for (_, addr) in node.handle.table().neighbors().await {
            let Some(peer) = nodes.iter().find(|n| n.addr() == addr) else {
                continue;
            };
            assert!(
                peer.handle.table().contains(&node.uid()).await,
                "{} lists {} but not the other way round",
                node.addr(),
                addr
            );
        }
    }
}
