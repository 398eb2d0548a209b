//! Routes one inbound request to its handler and writes the one response.

use tokio::io::{AsyncRead, AsyncWrite};

use meshjoin_core::wire::{recv_framed, send_framed, ProtocolError, WireError};
use meshjoin_core::{Message, MessageKind, Response};

use crate::discovery::DiscoveryService;

/// Maps message kinds to discovery handlers.
#[derive(Clone)]
pub struct Dispatcher {
    discovery: DiscoveryService,
}

impl Dispatcher {
    pub fn new(discovery: DiscoveryService) -> Self {
        Self { discovery }
    }

    pub fn discovery(&self) -> &DiscoveryService {
        &self.discovery
    }

    /// Run a handler for `message`. `neighbors_found` only ever travels as a
    /// response; receiving it as a request is a protocol violation.
    pub async fn dispatch(&self, message: Message) -> Result<Response, ProtocolError> {
        match message {
            Message::NeighborsRequest(walk) => Ok(Response::NeighborsFound(
                self.discovery.handle_neighbors_request(walk).await,
            )),
            Message::NewNeighbor(announcement) => Ok(Response::Announced(
                self.discovery.handle_new_neighbor(announcement).await,
            )),
            Message::EvictNeighbor(request) => Ok(Response::Evicted(
                self.discovery.handle_evict(request).await,
            )),
            Message::NeighborsFound(_) => Err(ProtocolError::Unexpected(
                MessageKind::NeighborsFound.to_string(),
            )),
        }
    }

    /// One exchange: read a frame, handle it, write the reply. The caller
    /// closes the connection afterwards whatever the outcome.
    pub async fn serve_connection<S>(&self, stream: &mut S) -> Result<MessageKind, WireError>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        let frame = recv_framed(stream).await?;
        let message = Message::decode(&frame)?;
        let kind = message.kind();
        let response = self.dispatch(message).await?;
        send_framed(stream, &response.encode()?).await?;
        Ok(kind)
    }
}
