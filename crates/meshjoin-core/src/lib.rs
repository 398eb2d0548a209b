//! meshjoin-core — shared types, wire framing, and configuration.
//! All other meshjoin crates depend on this one.

pub mod config;
pub mod identity;
pub mod message;
pub mod wire;

pub use identity::{identity_of, NodeIdentity, Uid};
pub use message::{
    AnnouncementAck, DiscoveryRequest, EvictionRequest, EvictionResponse, Message, MessageKind,
    NeighborAnnouncement, Response, DEFAULT_WALK_BUDGET, HOP_MARGIN,
};
pub use wire::{recv_framed, send_framed, ProtocolError, WireError};
