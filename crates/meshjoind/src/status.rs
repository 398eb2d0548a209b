//! HTTP status endpoint — exposes node state as JSON.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use meshjoin_services::NodeHandle;

#[derive(Clone)]
pub struct StatusState {
    pub node: NodeHandle,
}

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uid:           String,
    pub addr:          String,
    pub degree_target: usize,
    pub neighbors:     usize,
    pub reserved:      usize,
    pub saturated:     bool,
}

async fn handle_status(State(state): State<StatusState>) -> Json<StatusResponse> {
    let snapshot = state.node.snapshot().await;
    Json(StatusResponse {
        uid:           state.node.identity().uid().to_string(),
        addr:          state.node.addr().to_string(),
        degree_target: snapshot.degree_target,
        neighbors:     snapshot.neighbors.len(),
        reserved:      snapshot.reserved,
        saturated:     snapshot.neighbors.len() == snapshot.degree_target,
    })
}

// ── /neighbors ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct NeighborsResponse {
    pub neighbors: Vec<NeighborInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NeighborInfo {
    pub uid:  String,
    pub addr: String,
}

async fn handle_neighbors(State(state): State<StatusState>) -> Json<NeighborsResponse> {
    let mut neighbors: Vec<NeighborInfo> = state
        .node
        .table()
        .neighbors()
        .await
        .into_iter()
        .map(|(uid, addr)| NeighborInfo {
            uid:  uid.to_string(),
            addr: addr.to_string(),
        })
        .collect();
    neighbors.sort_by(|a, b| a.addr.cmp(&b.addr));
    Json(NeighborsResponse { neighbors })
}

// ── Router ────────────────────────────────────────────────────────────────────

pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/status",    get(handle_status))
        .route("/neighbors", get(handle_neighbors))
        .with_state(state)
}

pub async fn serve(state: StatusState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "status endpoint listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
