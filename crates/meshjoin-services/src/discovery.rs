//! Discovery and admission — the server side of the overlay protocol.
//!
//! A `neighbors_request` walk runs through four stages at every node it
//! reaches:
//!
//!   1. mark     — add this node to `visited_addrs` (a node never sees the
//!                 same walk twice)
//!   2. admit    — reserve a local slot for the walk's origin if there is room
//!   3. forward  — hand the walk to each unvisited neighbor in turn, awaiting
//!                 each answer, until nothing more is needed
//!   4. swap     — if the walk is still completely unsatisfied and this node
//!                 is full, ask a neighbor to drop its link with us; both
//!                 freed slots go to the origin
//!
//! The walk terminates because `visited_addrs` grows at every hop and a node
//! already in it answers immediately. No state survives a request except
//! what lands in the [`NeighborTable`].
//!
//! Each walk carries a time budget. A hop answers within it and hands its
//! children strictly less, so a swap is never committed by a hop whose
//! caller has already given up on it.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::Instant;

use meshjoin_core::{
    identity_of, AnnouncementAck, DiscoveryRequest, EvictionRequest, EvictionResponse,
    NeighborAnnouncement, NodeIdentity, HOP_MARGIN,
};

use crate::neighbors::{NeighborTable, Registration};
use crate::transport::PeerClient;

/// Per-node discovery logic. Cheap to clone; handler tasks each hold one.
#[derive(Clone)]
pub struct DiscoveryService {
    identity: NodeIdentity,
    table: NeighborTable,
    client: PeerClient,
}

impl DiscoveryService {
    pub fn new(identity: NodeIdentity, table: NeighborTable, client: PeerClient) -> Self {
        Self {
            identity,
            table,
            client,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn table(&self) -> &NeighborTable {
        &self.table
    }

    pub fn client(&self) -> &PeerClient {
        &self.client
    }

    // ── neighbors_request ────────────────────────────────────────────────────

    /// Run this node's part of a discovery walk and return the walk's state
    /// as the `neighbors_found` reply.
    pub async fn handle_neighbors_request(&self, mut walk: DiscoveryRequest) -> DiscoveryRequest {
        let me = self.identity.addr();
        let deadline = Instant::now() + walk.budget();

        if !walk.visited_addrs.insert(me) {
            tracing::warn!(origin = %walk.origin_addr, from = %walk.source_addr, "walk revisited this node, returning it unchanged");
            return self.reply(walk);
        }

        tracing::debug!(
            origin = %walk.origin_addr,
            from = %walk.source_addr,
            remaining = walk.remaining_slots,
            visited = walk.visited_addrs.len(),
            "neighbors request"
        );

        if walk.remaining_slots > 0 {
            self.admit_locally(&mut walk).await;
        }
        if walk.remaining_slots > 0 {
            self.forward(&mut walk, deadline).await;
        }
        if walk.remaining_slots > 0 {
            self.try_swap(&mut walk, deadline).await;
        }

        if walk.remaining_slots > 0 {
            tracing::info!(
                origin = %walk.origin_addr,
                remaining = walk.remaining_slots,
                "walk exhausted reachable capacity"
            );
        }
        self.reply(walk)
    }

    async fn admit_locally(&self, walk: &mut DiscoveryRequest) {
        if walk.origin_addr == self.identity.addr() {
            return;
        }
        let origin = identity_of(walk.origin_addr);
        if self.table.try_reserve(&origin).await {
            walk.remaining_slots -= 1;
            walk.candidate_addrs.push(self.identity.addr());
            tracing::info!(origin = %walk.origin_addr, remaining = walk.remaining_slots, "admitted joining node");
        }
    }

    async fn forward(&self, walk: &mut DiscoveryRequest, deadline: Instant) {
        for (uid, addr) in self.table.neighbors().await {
            if walk.remaining_slots == 0 {
                break;
            }
            if walk.visited_addrs.contains(&addr) {
                continue;
            }
            let Some(window) = self.window(deadline) else {
                tracing::debug!(origin = %walk.origin_addr, "walk budget spent, not forwarding further");
                break;
            };

            let hop = walk
                .readdressed(&self.identity, addr)
                .with_budget(window - HOP_MARGIN);
            match self.client.request_neighbors(hop).await {
                Ok(found) => {
                    if !absorb(walk, found) {
                        tracing::warn!(neighbor = %addr, "inconsistent walk state from neighbor, ignoring its result");
                    }
                }
                Err(e) => {
                    // Unreachable for now; not evicted.
                    tracing::warn!(neighbor = %addr, uid = uid.short(), error = %e, "forwarding hop failed, skipping");
                }
            }
        }
    }

    /// Swap rebalancing. Only for walks that nothing has admitted yet, and
    /// only when the freed pair of slots fits the request.
    async fn try_swap(&self, walk: &mut DiscoveryRequest, deadline: Instant) {
        let target = self.table.degree_target();
        if walk.remaining_slots as usize != target || walk.remaining_slots < 2 {
            return;
        }
        if !self.table.is_saturated().await {
            return;
        }

        let origin = identity_of(walk.origin_addr);
        let request = EvictionRequest {
            uid: self.identity.uid().clone(),
            source_addr: self.identity.addr(),
            on_behalf_of: Some(origin.clone()),
        };

        for uid in self.table.snapshot_keys().await {
            let Some(addr) = self.table.address_of(&uid).await else {
                continue;
            };
            if addr == walk.origin_addr || walk.candidate_addrs.contains(&addr) {
                continue;
            }
            let Some(window) = self.window(deadline) else {
                tracing::debug!(origin = %walk.origin_addr, "walk budget spent, no swap");
                return;
            };

            match self.client.evict(addr, request.clone(), window).await {
                Ok(resp) if resp.accepted => {
                    if !self.table.complete_swap(&uid, &origin).await {
                        tracing::debug!(neighbor = %addr, "evicted neighbor was already gone locally");
                    }
                    walk.candidate_addrs.push(self.identity.addr());
                    walk.candidate_addrs.push(addr);
                    walk.remaining_slots -= 2;
                    tracing::info!(
                        origin = %walk.origin_addr,
                        evicted = %addr,
                        remaining = walk.remaining_slots,
                        "swapped neighbor link for joining node"
                    );
                    return;
                }
                Ok(_) => {
                    tracing::debug!(neighbor = %addr, "neighbor declined eviction");
                }
                Err(e) => {
                    tracing::warn!(neighbor = %addr, error = %e, "eviction request failed, trying next neighbor");
                }
            }
        }
    }

    /// Time left for one outbound exchange before `deadline`, or `None` once
    /// it no longer leaves room for the reply margin.
    fn window(&self, deadline: Instant) -> Option<Duration> {
        let left = deadline
            .saturating_duration_since(Instant::now())
            .min(self.client.timeout());
        (left > HOP_MARGIN).then_some(left)
    }

    fn reply(&self, mut walk: DiscoveryRequest) -> DiscoveryRequest {
        walk.status = walk.is_satisfied();
        walk.uid = self.identity.uid().clone();
        walk.dest_addr = walk.source_addr;
        walk.source_addr = self.identity.addr();
        walk
    }

    // ── new_neighbor ─────────────────────────────────────────────────────────

    pub async fn handle_new_neighbor(&self, announcement: NeighborAnnouncement) -> AnnouncementAck {
        let addr = announcement.new_neighbor_addr;
        let outcome = self
            .table
            .register_announced(announcement.uid.clone(), addr)
            .await;
        match outcome {
            Registration::Refused => tracing::warn!(
                neighbor = %addr,
                uid = announcement.uid.short(),
                "unreserved announcement to a full table, refusing"
            ),
            Registration::Updated => tracing::debug!(neighbor = %addr, "neighbor re-announced"),
            Registration::Reserved | Registration::Admitted => {
                tracing::info!(neighbor = %addr, uid = announcement.uid.short(), "new neighbor")
            }
        }
        AnnouncementAck {
            registered: outcome.is_registered(),
            source_addr: self.identity.addr(),
        }
    }

    // ── evict_neighbor ───────────────────────────────────────────────────────

    pub async fn handle_evict(&self, request: EvictionRequest) -> EvictionResponse {
        let accepted = self
            .table
            .accept_eviction(&request.uid, request.on_behalf_of.as_ref())
            .await;
        if accepted {
            tracing::info!(neighbor = %request.source_addr, "dropped neighbor on request");
        } else {
            tracing::debug!(neighbor = %request.source_addr, "declined eviction");
        }
        EvictionResponse {
            accepted,
            source_addr: self.identity.addr(),
        }
    }
}

/// Fold a downstream reply into the walk.
///
/// Visited nodes are always merged. Slots and candidates are adopted only
/// when the reply extends the walk consistently: remaining never grows,
/// earlier candidates are kept in order, and one candidate was added per
/// slot filled. Returns whether the reply was adopted.
pub fn absorb(walk: &mut DiscoveryRequest, found: DiscoveryRequest) -> bool {
    walk.visited_addrs.extend(found.visited_addrs.iter().copied());

    let consistent = found.remaining_slots <= walk.remaining_slots
        && found.candidate_addrs.starts_with(&walk.candidate_addrs)
        && found.candidate_addrs.len() - walk.candidate_addrs.len()
            == (walk.remaining_slots - found.remaining_slots) as usize;
    if !consistent {
        return false;
    }

    walk.remaining_slots = found.remaining_slots;
    walk.candidate_addrs = found.candidate_addrs;
    true
}

/// Addresses a walk would hand back to its origin, minus the origin itself.
pub fn usable_candidates(walk: &DiscoveryRequest) -> Vec<SocketAddr> {
    let mut out: Vec<SocketAddr> = Vec::with_capacity(walk.candidate_addrs.len());
    for addr in &walk.candidate_addrs {
        if *addr != walk.origin_addr && !out.contains(addr) {
            out.push(*addr);
        }
    }
    out
}
