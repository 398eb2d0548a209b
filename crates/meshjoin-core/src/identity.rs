//! Node identity — a node's advertised address and the uid derived from it.
//!
//! The uid is a BLAKE3 digest of the serialized address. It is stable and
//! collision-resistant, but it is self-reported: any node can claim any uid.
//! Swapping `identity_of` for a key-based derivation is the extension point
//! if peers ever need to prove who they are.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Hex-encoded 32-byte node identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Uid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Derive the uid for an address.
///
///   uid = hex(BLAKE3("ip:port"))
pub fn identity_of(addr: SocketAddr) -> Uid {
    Uid(hex::encode(blake3::hash(addr.to_string().as_bytes()).as_bytes()))
}

/// This process's identity. Built once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    addr: SocketAddr,
    uid: Uid,
}

impl NodeIdentity {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            uid: identity_of(addr),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }
}
