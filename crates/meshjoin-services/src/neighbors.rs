//! Neighbor table — this node's links and the slots it has promised.
//!
//! Capacity is counted as *occupancy*: registered neighbors plus live
//! reservations. A reservation is taken when a discovery walk is admitted
//! here and is consumed when the walk's origin announces itself with
//! `new_neighbor`. Unclaimed reservations expire after the configured TTL.
//!
//! Every check-and-mutate runs under one lock, so concurrent walks cannot
//! both take the last slot. The lock is never held across network I/O.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use meshjoin_core::Uid;

/// Outcome of registering an announced neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Already a neighbor; address refreshed.
    Updated,
    /// Took the slot reserved during the discovery walk.
    Reserved,
    /// No reservation, but there was spare capacity.
    Admitted,
    /// Table full and nothing reserved for this uid.
    Refused,
}

impl Registration {
    pub fn is_registered(&self) -> bool {
        !matches!(self, Registration::Refused)
    }
}

/// Point-in-time view for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    pub degree_target: usize,
    pub neighbors: Vec<(Uid, SocketAddr)>,
    pub reserved: usize,
}

/// Shared, cloneable handle to the node's neighbor table.
#[derive(Clone)]
pub struct NeighborTable {
    inner: Arc<Mutex<Inner>>,
    degree_target: usize,
    reservation_ttl: Duration,
}

#[derive(Default)]
struct Inner {
    neighbors: HashMap<Uid, SocketAddr>,
    reservations: HashMap<Uid, Instant>,
}

impl Inner {
    fn purge_expired(&mut self, ttl: Duration) {
        let before = self.reservations.len();
        self.reservations.retain(|_, taken_at| taken_at.elapsed() < ttl);
        let expired = before - self.reservations.len();
        if expired > 0 {
            tracing::debug!(expired, "unclaimed neighbor reservations expired");
        }
    }

    fn occupancy(&self) -> usize {
        self.neighbors.len() + self.reservations.len()
    }

    fn knows(&self, uid: &Uid) -> bool {
        self.neighbors.contains_key(uid) || self.reservations.contains_key(uid)
    }

    fn assert_within(&self, degree_target: usize) {
        assert!(
            self.neighbors.len() <= degree_target,
            "{}",
            CapacityViolation {
                size: self.neighbors.len(),
                degree_target,
            }
        );
    }
}

impl NeighborTable {
    pub fn new(degree_target: usize, reservation_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            degree_target,
            reservation_ttl,
        }
    }

    pub fn degree_target(&self) -> usize {
        self.degree_target
    }

    /// Number of registered neighbors.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.neighbors.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Neighbors plus unexpired reservations.
    pub async fn occupancy(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(self.reservation_ttl);
        inner.occupancy()
    }

    /// True when the registered neighbors alone fill the table.
    pub async fn is_saturated(&self) -> bool {
        self.len().await == self.degree_target
    }

    pub async fn contains(&self, uid: &Uid) -> bool {
        self.inner.lock().await.neighbors.contains_key(uid)
    }

    pub async fn address_of(&self, uid: &Uid) -> Option<SocketAddr> {
        self.inner.lock().await.neighbors.get(uid).copied()
    }

    /// Current neighbors, in no particular order.
    pub async fn neighbors(&self) -> Vec<(Uid, SocketAddr)> {
        self.inner
            .lock()
            .await
            .neighbors
            .iter()
            .map(|(uid, addr)| (uid.clone(), *addr))
            .collect()
    }

    /// Neighbor uids in uniformly shuffled order.
    pub async fn snapshot_keys(&self) -> Vec<Uid> {
        let mut keys: Vec<Uid> = self.inner.lock().await.neighbors.keys().cloned().collect();
        keys.shuffle(&mut rand::thread_rng());
        keys
    }

    /// Add a neighbor if there is room. An existing uid has its address
    /// refreshed and counts as added.
    pub async fn try_add(&self, uid: Uid, addr: SocketAddr) -> bool {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(self.reservation_ttl);
        if let Some(existing) = inner.neighbors.get_mut(&uid) {
            *existing = addr;
            return true;
        }
        if inner.reservations.remove(&uid).is_none() && inner.occupancy() >= self.degree_target {
            return false;
        }
        inner.neighbors.insert(uid, addr);
        inner.assert_within(self.degree_target);
        true
    }

    pub async fn remove(&self, uid: &Uid) -> Option<SocketAddr> {
        self.inner.lock().await.neighbors.remove(uid)
    }

    /// Hold a slot for `origin` until it announces itself.
    ///
    /// Fails when the table is full or `origin` is already a neighbor or
    /// already holds a reservation here.
    pub async fn try_reserve(&self, origin: &Uid) -> bool {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(self.reservation_ttl);
        if inner.knows(origin) || inner.occupancy() >= self.degree_target {
            return false;
        }
        inner.reservations.insert(origin.clone(), Instant::now());
        true
    }

    /// Give back a reservation that will not be claimed.
    pub async fn release(&self, uid: &Uid) -> bool {
        self.inner.lock().await.reservations.remove(uid).is_some()
    }

    /// Register a node that announced itself with `new_neighbor`.
    ///
    /// Re-announcing a known uid only refreshes its address. A new uid takes
    /// its reservation if it has one, otherwise any spare capacity.
    pub async fn register_announced(&self, uid: Uid, addr: SocketAddr) -> Registration {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(self.reservation_ttl);
        let outcome = if let Some(existing) = inner.neighbors.get_mut(&uid) {
            *existing = addr;
            Registration::Updated
        } else if inner.reservations.remove(&uid).is_some() {
            inner.neighbors.insert(uid, addr);
            Registration::Reserved
        } else if inner.occupancy() < self.degree_target {
            inner.neighbors.insert(uid, addr);
            Registration::Admitted
        } else {
            Registration::Refused
        };
        inner.assert_within(self.degree_target);
        outcome
    }

    /// Decide an incoming eviction.
    ///
    /// Accepted only when this table is exactly full and `uid` really is a
    /// neighbor. On acceptance the link is dropped and, if `on_behalf_of`
    /// names a joining node, the freed slot is reserved for it in the same
    /// step.
    pub async fn accept_eviction(&self, uid: &Uid, on_behalf_of: Option<&Uid>) -> bool {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(self.reservation_ttl);
        if inner.neighbors.len() != self.degree_target || !inner.neighbors.contains_key(uid) {
            return false;
        }
        inner.neighbors.remove(uid);
        if let Some(origin) = on_behalf_of {
            if !inner.knows(origin) {
                inner.reservations.insert(origin.clone(), Instant::now());
            }
        }
        true
    }

    /// Evictor side of a swap the peer has accepted: drop the peer and hold
    /// the freed slot for `origin`.
    pub async fn complete_swap(&self, evicted: &Uid, origin: &Uid) -> bool {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(self.reservation_ttl);
        let removed = inner.neighbors.remove(evicted).is_some();
        if !inner.knows(origin) && inner.occupancy() < self.degree_target {
            inner.reservations.insert(origin.clone(), Instant::now());
        }
        removed
    }

    pub async fn snapshot(&self) -> TableSnapshot {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(self.reservation_ttl);
        TableSnapshot {
            degree_target: self.degree_target,
            neighbors: inner
                .neighbors
                .iter()
                .map(|(uid, addr)| (uid.clone(), *addr))
                .collect(),
            reserved: inner.reservations.len(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// The table grew past its degree target. This is a bug, not a runtime
/// condition: every insertion path checks capacity first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("neighbor table holds {size} entries, degree target is {degree_target}")]
pub struct CapacityViolation {
    pub size: usize,
    pub degree_target: usize,
}
