//! Joining the overlay from a seed list.
//!
//! Seeds are tried in order. Each gets a fresh discovery walk asking only
//! for the slots still missing; candidates accumulate across seeds and the
//! loop stops at the first fully satisfied answer. Every candidate is then
//! sent a `new_neighbor` announcement and, once it confirms, registered
//! locally. The candidate's own handler registers the reverse link.
//!
//! Running out of seeds before the degree target is reached is not an
//! error: the node joins with what it found.

use std::net::SocketAddr;

use serde::Serialize;

use meshjoin_core::{identity_of, DiscoveryRequest, NeighborAnnouncement, HOP_MARGIN};

use crate::discovery::{usable_candidates, DiscoveryService};

/// What a join attempt achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    /// Every address the walks offered, in discovery order.
    pub candidates: Vec<SocketAddr>,
    /// Candidates that confirmed the link and are now neighbors.
    pub joined: Vec<SocketAddr>,
    /// A walk reported the request fully satisfied.
    pub satisfied: bool,
}

impl JoinReport {
    pub fn is_degraded(&self, degree_target: usize) -> bool {
        self.joined.len() < degree_target
    }
}

pub async fn join(discovery: &DiscoveryService, seeds: &[SocketAddr]) -> JoinReport {
    let identity = discovery.identity();
    let table = discovery.table();
    let client = discovery.client();
    let me = identity.addr();
    let target = table.degree_target();

    let mut report = JoinReport::default();

    for &seed in seeds {
        if seed == me {
            tracing::debug!(%seed, "skipping own address in seed list");
            continue;
        }

        let occupied = table.occupancy().await + report.candidates.len();
        let wanted = target.saturating_sub(occupied) as u32;
        if wanted == 0 {
            report.satisfied = true;
            break;
        }

        let mut walk = DiscoveryRequest::new(identity, seed, wanted)
            .with_budget(client.timeout().saturating_sub(HOP_MARGIN));
        // Nodes that already agreed must not be offered twice.
        walk.visited_addrs.extend(report.candidates.iter().copied());

        let found = match client.request_neighbors(walk).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%seed, error = %e, "seed unreachable, trying next");
                continue;
            }
        };
        tracing::debug!(
            %seed,
            status = found.status,
            remaining = found.remaining_slots,
            candidates = ?found.candidate_addrs,
            "seed answered"
        );

        for addr in usable_candidates(&found) {
            if addr != me && !report.candidates.contains(&addr) {
                report.candidates.push(addr);
            }
        }

        if found.status && found.remaining_slots == 0 {
            report.satisfied = true;
            break;
        }
    }

    announce_all(discovery, &mut report).await;

    if report.is_degraded(target) {
        tracing::warn!(
            joined = report.joined.len(),
            degree_target = target,
            "joined below degree target"
        );
    } else {
        tracing::info!(neighbors = ?report.joined, "joined overlay");
    }
    report
}

async fn announce_all(discovery: &DiscoveryService, report: &mut JoinReport) {
    let table = discovery.table();
    let announcement = NeighborAnnouncement::from_identity(discovery.identity());

    for &addr in &report.candidates {
        let uid = identity_of(addr);
        // Hold our own slot first so a concurrent inbound walk cannot take it
        // while the announcement is in flight.
        if !table.try_reserve(&uid).await && !table.contains(&uid).await {
            tracing::warn!(candidate = %addr, "no local capacity left for candidate, skipping");
            continue;
        }

        match discovery.client().announce(addr, announcement.clone()).await {
            Ok(ack) if ack.registered => {
                if table.register_announced(uid, addr).await.is_registered() {
                    tracing::info!(neighbor = %addr, "new neighbor");
                    report.joined.push(addr);
                }
            }
            Ok(_) => {
                table.release(&uid).await;
                tracing::warn!(candidate = %addr, "candidate refused announcement");
            }
            Err(e) => {
                table.release(&uid).await;
                tracing::warn!(candidate = %addr, error = %e, "announcement failed");
            }
        }
    }
}
