//! meshjoind — overlay membership daemon.
//!
//! Usage: meshjoind [listen_addr] [seed ...]
//!
//! Positional arguments override the config file and MESHJOIN_* variables.

use std::net::SocketAddr;

use anyhow::{Context, Result};

use meshjoin_core::config::MeshjoinConfig;
use meshjoin_services::{Node, NodeSettings};

mod status;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshjoinConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = MeshjoinConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshjoinConfig::default()
    });
    apply_args(&mut config, std::env::args().skip(1))?;
    config.validate().context("invalid configuration")?;

    tracing::info!(
        listen = %config.node.listen_addr,
        degree_target = config.overlay.degree_target,
        seeds = config.overlay.seeds.len(),
        "meshjoind starting"
    );

    let node = Node::bind(NodeSettings::from(&config)).await?;
    let handle = node.handle();

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = tokio::spawn(node.run(shutdown_tx.subscribe()));

    // The listener is already bound, so peers announcing back to us during
    // the join are accepted.
    let join_task = {
        let handle = handle.clone();
        let seeds = config.overlay.seeds.clone();
        tokio::spawn(async move {
            if seeds.is_empty() {
                tracing::info!("no seeds configured, waiting for others to join");
                return;
            }
            let report = handle.bootstrap(&seeds).await;
            tracing::info!(
                joined = report.joined.len(),
                candidates = report.candidates.len(),
                satisfied = report.satisfied,
                "bootstrap finished"
            );
        })
    };

    let status_port = config.api.status_port;
    if status_port != 0 {
        let state = status::StatusState {
            node: handle.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = status::serve(state, status_port).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = listener_task      => tracing::error!("discovery listener exited: {:?}", r),
    }
    join_task.abort();

    Ok(())
}

/// `[listen_addr] [seed ...]`
fn apply_args<I>(config: &mut MeshjoinConfig, args: I) -> Result<()>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    if let Some(listen) = args.next() {
        config.node.listen_addr = listen
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen address {listen:?}"))?;
    }
    let seeds = args
        .map(|s| {
            s.parse::<SocketAddr>()
                .with_context(|| format!("invalid seed address {s:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if !seeds.is_empty() {
        config.overlay.seeds = seeds;
    }
    Ok(())
}
