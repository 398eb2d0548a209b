//! Node assembly: listener, identity, table and discovery service wired
//! together, with one tracing span carrying the node's address.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{Instrument, Span};

use meshjoin_core::config::MeshjoinConfig;
use meshjoin_core::NodeIdentity;

use crate::bootstrap::{self, JoinReport};
use crate::discovery::DiscoveryService;
use crate::dispatch::Dispatcher;
use crate::neighbors::{NeighborTable, TableSnapshot};
use crate::server::DiscoveryListener;
use crate::transport::PeerClient;

/// Everything a node needs to start.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub listen_addr: SocketAddr,
    pub advertise_addr: Option<SocketAddr>,
    pub degree_target: usize,
    pub round_trip_timeout: Duration,
    pub reservation_ttl: Duration,
}

impl NodeSettings {
    /// Loopback node on an OS-assigned port.
    pub fn local(degree_target: usize) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertise_addr: None,
            degree_target,
            round_trip_timeout: Duration::from_secs(5),
            reservation_ttl: Duration::from_secs(30),
        }
    }
}

impl From<&MeshjoinConfig> for NodeSettings {
    fn from(config: &MeshjoinConfig) -> Self {
        Self {
            listen_addr: config.node.listen_addr,
            advertise_addr: config.node.advertise_addr,
            degree_target: config.overlay.degree_target as usize,
            round_trip_timeout: config.overlay.round_trip_timeout(),
            reservation_ttl: config.overlay.reservation_ttl(),
        }
    }
}

/// A bound, not yet running node.
pub struct Node {
    listener: TcpListener,
    handle: NodeHandle,
}

/// Cloneable access to a node's identity, table and client side.
#[derive(Clone)]
pub struct NodeHandle {
    discovery: DiscoveryService,
    span: Span,
}

impl Node {
    pub async fn bind(settings: NodeSettings) -> Result<Self> {
        if settings.degree_target == 0 {
            bail!("degree target must be at least 1");
        }
        let listener = TcpListener::bind(settings.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", settings.listen_addr))?;
        let bound = listener.local_addr()?;

        let advertised = match settings.advertise_addr {
            Some(addr) => addr,
            None if bound.ip().is_unspecified() => {
                bail!("listening on {bound} requires an advertise address")
            }
            None => bound,
        };

        let identity = NodeIdentity::new(advertised);
        let span = tracing::info_span!("node", addr = %advertised);
        span.in_scope(|| {
            tracing::info!(uid = identity.uid().short(), %bound, degree_target = settings.degree_target, "node identity ready");
        });

        let discovery = DiscoveryService::new(
            identity,
            NeighborTable::new(settings.degree_target, settings.reservation_ttl),
            PeerClient::new(settings.round_trip_timeout),
        );

        Ok(Self {
            listener,
            handle: NodeHandle { discovery, span },
        })
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    /// Serve discovery requests until `shutdown` fires.
    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let span = self.handle.span.clone();
        DiscoveryListener::new(
            self.listener,
            Dispatcher::new(self.handle.discovery),
            shutdown,
        )
        .run()
        .instrument(span)
        .await
    }
}

impl NodeHandle {
    pub fn identity(&self) -> &NodeIdentity {
        self.discovery.identity()
    }

    pub fn addr(&self) -> SocketAddr {
        self.discovery.identity().addr()
    }

    pub fn table(&self) -> &NeighborTable {
        self.discovery.table()
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    /// Join the overlay through `seeds`.
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> JoinReport {
        bootstrap::join(&self.discovery, seeds)
            .instrument(self.span.clone())
            .await
    }

    pub async fn snapshot(&self) -> TableSnapshot {
        self.discovery.table().snapshot().await
    }
}
