//! meshjoin-services — overlay membership: neighbor table, discovery walks,
//! swap rebalancing, bootstrap, and the inbound listener.

pub mod bootstrap;
pub mod discovery;
pub mod dispatch;
pub mod neighbors;
pub mod node;
pub mod server;
pub mod transport;

pub use bootstrap::JoinReport;
pub use discovery::DiscoveryService;
pub use dispatch::Dispatcher;
pub use neighbors::{CapacityViolation, NeighborTable, Registration, TableSnapshot};
pub use node::{Node, NodeHandle, NodeSettings};
pub use server::DiscoveryListener;
pub use transport::{ExchangeError, PeerClient, TransportError};
