//! Outbound round trips: connect, send one frame, read one frame, close.
//!
//! Every call opens a fresh TCP connection. The whole exchange is bounded
//! by the configured round-trip timeout, or less where the caller has less
//! time left; expiry surfaces as [`TransportError::Timeout`] and callers
//! treat it like any other unreachable peer.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use meshjoin_core::wire::{recv_framed, send_framed, ProtocolError, WireError};
use meshjoin_core::{
    AnnouncementAck, DiscoveryRequest, EvictionRequest, EvictionResponse, Message,
    NeighborAnnouncement, Response, HOP_MARGIN,
};

/// Client side of the discovery protocol.
#[derive(Debug, Clone)]
pub struct PeerClient {
    timeout: Duration,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `message` to `addr` and return the single response.
    pub async fn exchange(
        &self,
        addr: SocketAddr,
        message: &Message,
    ) -> Result<Response, ExchangeError> {
        self.exchange_within(addr, message, self.timeout).await
    }

    /// [`exchange`](Self::exchange) bounded by `limit` instead of the
    /// configured timeout, whichever is shorter.
    pub async fn exchange_within(
        &self,
        addr: SocketAddr,
        message: &Message,
        limit: Duration,
    ) -> Result<Response, ExchangeError> {
        let limit = limit.min(self.timeout);
        let payload = message.encode()?;
        let round_trip = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|source| TransportError::Connect { addr, source })?;
            send_framed(&mut stream, &payload)
                .await
                .map_err(|e| ExchangeError::from_wire(addr, e))?;
            let frame = recv_framed(&mut stream)
                .await
                .map_err(|e| ExchangeError::from_wire(addr, e))?;
            let _ = stream.shutdown().await;
            Ok::<_, ExchangeError>(Response::decode(&frame)?)
        };

        match tokio::time::timeout(limit, round_trip).await {
            Ok(result) => {
                tracing::trace!(%addr, kind = %message.kind(), ok = result.is_ok(), "round trip finished");
                result
            }
            Err(_) => Err(TransportError::Timeout {
                addr,
                after: limit,
            }
            .into()),
        }
    }

    /// Forward or start a discovery walk; expects `neighbors_found` back.
    ///
    /// The receiver gets the walk's budget to work with, so the wait here
    /// is that budget plus [`HOP_MARGIN`].
    pub async fn request_neighbors(
        &self,
        request: DiscoveryRequest,
    ) -> Result<DiscoveryRequest, ExchangeError> {
        let addr = request.dest_addr;
        let limit = request.budget().saturating_add(HOP_MARGIN);
        match self
            .exchange_within(addr, &Message::NeighborsRequest(request), limit)
            .await?
        {
            Response::NeighborsFound(found) => Ok(found),
            other => Err(unexpected(other)),
        }
    }

    pub async fn announce(
        &self,
        addr: SocketAddr,
        announcement: NeighborAnnouncement,
    ) -> Result<AnnouncementAck, ExchangeError> {
        match self.exchange(addr, &Message::NewNeighbor(announcement)).await? {
            Response::Announced(ack) => Ok(ack),
            other => Err(unexpected(other)),
        }
    }

    /// Ask `addr` to drop its link with us, waiting at most `limit`.
    pub async fn evict(
        &self,
        addr: SocketAddr,
        request: EvictionRequest,
        limit: Duration,
    ) -> Result<EvictionResponse, ExchangeError> {
        match self
            .exchange_within(addr, &Message::EvictNeighbor(request), limit)
            .await?
        {
            Response::Evicted(resp) => Ok(resp),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> ExchangeError {
    ProtocolError::Unexpected(response.name().to_string()).into()
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// The peer could not be reached or the connection broke. Recoverable:
/// the caller skips the peer and moves on.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("i/o with {addr} failed: {source}")]
    Io {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("no response from {addr} within {after:?}")]
    Timeout { addr: SocketAddr, after: Duration },
}

/// Failure of one outbound round trip.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ExchangeError {
    fn from_wire(addr: SocketAddr, err: WireError) -> Self {
        match err {
            WireError::Io(source) => TransportError::Io { addr, source }.into(),
            WireError::Protocol(p) => p.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ExchangeError::Transport(_))
    }
}
