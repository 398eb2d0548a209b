//! Inbound discovery listener.
//!
//! Accepts TCP connections and spawns one task per connection. Each task
//! serves exactly one request and closes. A failing connection is logged and
//! dropped; it never reaches the accept loop.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::Instrument;

use meshjoin_core::wire::WireError;

use crate::dispatch::Dispatcher;

pub struct DiscoveryListener {
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: broadcast::Receiver<()>,
}

impl DiscoveryListener {
    pub fn new(
        listener: TcpListener,
        dispatcher: Dispatcher,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            listener,
            dispatcher,
            shutdown,
        }
    }

    /// Accept until shutdown. In-flight connection tasks are left to finish
    /// on their own.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!(addr = %self.listener.local_addr()?, "discovery listener starting");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("discovery listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(
                        serve(stream, peer, dispatcher)
                            .instrument(tracing::debug_span!("conn", %peer)),
                    );
                }
            }
        }
    }
}

async fn serve(mut stream: TcpStream, peer: SocketAddr, dispatcher: Dispatcher) {
    match dispatcher.serve_connection(&mut stream).await {
        Ok(kind) => tracing::trace!(%kind, "request served"),
        Err(WireError::Protocol(e)) => {
            tracing::warn!(%peer, error = %e, "protocol violation, closing connection");
        }
        Err(WireError::Io(e)) => {
            tracing::debug!(%peer, error = %e, "connection failed");
        }
    }
    let _ = stream.shutdown().await;
}
