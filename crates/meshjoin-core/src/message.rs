//! Discovery protocol records.
//!
//! Every frame carries one JSON object tagged by `kind`. Requests are
//! [`Message`]s; each connection gets exactly one [`Response`] back.

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::{NodeIdentity, Uid};
use crate::wire::ProtocolError;

/// Message kind discriminator, as it appears in the `kind` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Finalize a link: "register me as your neighbor".
    NewNeighbor,
    /// A discovery walk looking for `remaining_slots` more neighbors.
    NeighborsRequest,
    /// Terminal marker set on a walk's response.
    NeighborsFound,
    /// Swap sub-protocol: "drop our link".
    EvictNeighbor,
}

impl MessageKind {
    pub const ALL: [MessageKind; 4] = [
        MessageKind::NewNeighbor,
        MessageKind::NeighborsRequest,
        MessageKind::NeighborsFound,
        MessageKind::EvictNeighbor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewNeighbor => "new_neighbor",
            Self::NeighborsRequest => "neighbors_request",
            Self::NeighborsFound => "neighbors_found",
            Self::EvictNeighbor => "evict_neighbor",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time a hop keeps back for getting its own reply onto the wire. A hop
/// hands each child at most its remaining budget minus this margin.
pub const HOP_MARGIN: Duration = Duration::from_millis(50);

/// Budget of a walk built with [`DiscoveryRequest::new`].
pub const DEFAULT_WALK_BUDGET: Duration = Duration::from_millis(4_950);

// ── Records ───────────────────────────────────────────────────────────────────

/// Overlay-construction state carried hop to hop by a discovery walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Whether the origin's need is satisfied.
    pub status: bool,

    /// Uid of the current holder. Rewritten by every forwarder.
    pub uid: Uid,

    pub source_addr: SocketAddr,
    pub dest_addr: SocketAddr,

    /// The node that started the walk and will announce itself to the
    /// candidates. Admission reservations are held for it.
    pub origin_addr: SocketAddr,

    /// Links still needed.
    pub remaining_slots: u32,

    /// Addresses that agreed to become the origin's neighbors, in order.
    pub candidate_addrs: Vec<SocketAddr>,

    /// Nodes this walk has already passed through.
    pub visited_addrs: BTreeSet<SocketAddr>,

    /// Milliseconds the receiver has to answer. Work that cannot finish
    /// inside it, forwarding or a swap, is not started.
    pub budget_ms: u64,
}

impl DiscoveryRequest {
    /// A fresh walk from `origin` toward `seed`.
    pub fn new(origin: &NodeIdentity, seed: SocketAddr, remaining_slots: u32) -> Self {
        Self {
            status: remaining_slots == 0,
            uid: origin.uid().clone(),
            source_addr: origin.addr(),
            dest_addr: seed,
            origin_addr: origin.addr(),
            remaining_slots,
            candidate_addrs: Vec::new(),
            visited_addrs: BTreeSet::from([origin.addr()]),
            budget_ms: DEFAULT_WALK_BUDGET.as_millis() as u64,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }

    pub fn is_satisfied(&self) -> bool {
        self.remaining_slots == 0
    }

    /// Copy of this request as re-issued by `holder` toward `dest`.
    pub fn readdressed(&self, holder: &NodeIdentity, dest: SocketAddr) -> Self {
        Self {
            uid: holder.uid().clone(),
            source_addr: holder.addr(),
            dest_addr: dest,
            ..self.clone()
        }
    }
}

/// `new_neighbor` — the sender asks to be registered as a neighbor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborAnnouncement {
    pub uid: Uid,
    pub source_addr: SocketAddr,
    pub new_neighbor_addr: SocketAddr,
}

impl NeighborAnnouncement {
    pub fn from_identity(identity: &NodeIdentity) -> Self {
        Self {
            uid: identity.uid().clone(),
            source_addr: identity.addr(),
            new_neighbor_addr: identity.addr(),
        }
    }
}

/// `evict_neighbor` — the sender wants to drop its link with the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionRequest {
    pub uid: Uid,
    pub source_addr: SocketAddr,

    /// Walk origin the freed slot should be held for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<Uid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionResponse {
    pub accepted: bool,
    pub source_addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnouncementAck {
    pub registered: bool,
    pub source_addr: SocketAddr,
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// A request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    NewNeighbor(NeighborAnnouncement),
    NeighborsRequest(DiscoveryRequest),
    NeighborsFound(DiscoveryRequest),
    EvictNeighbor(EvictionRequest),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::NewNeighbor(_) => MessageKind::NewNeighbor,
            Self::NeighborsRequest(_) => MessageKind::NeighborsRequest,
            Self::NeighborsFound(_) => MessageKind::NeighborsFound,
            Self::EvictNeighbor(_) => MessageKind::EvictNeighbor,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a request frame. An unrecognised `kind` is reported as
    /// [`ProtocolError::UnknownKind`], anything else as `Malformed`.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let tag = value
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| <serde_json::Error as serde::de::Error>::missing_field("kind"))?;
        if MessageKind::from_tag(tag).is_none() {
            return Err(ProtocolError::UnknownKind(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// A response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    NeighborsFound(DiscoveryRequest),
    Announced(AnnouncementAck),
    Evicted(EvictionResponse),
}

impl Response {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NeighborsFound(_) => "neighbors_found",
            Self::Announced(_) => "announced",
            Self::Evicted(_) => "evicted",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
