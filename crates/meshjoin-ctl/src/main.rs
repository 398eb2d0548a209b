//! meshjoin-ctl — command-line interface for the meshjoind status endpoint.

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_PORT: u16 = 9898;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatusResponse {
    uid:           String,
    addr:          String,
    degree_target: usize,
    neighbors:     usize,
    reserved:      usize,
    saturated:     bool,
}

#[derive(Debug, Deserialize)]
struct NeighborsResponse {
    neighbors: Vec<NeighborInfo>,
}

#[derive(Debug, Deserialize)]
struct NeighborInfo {
    uid:  String,
    addr: String,
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}

async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to meshjoind at {}, is it running?", url))?
        .json::<T>()
        .await
        .context("failed to parse response")
}

fn short(uid: &str) -> &str {
    uid.get(..16).unwrap_or(uid)
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  meshjoind Status");
    println!("═══════════════════════════════════════");
    println!("  Address       : {}", resp.addr);
    println!("  UID           : {}", short(&resp.uid));
    println!("  Neighbors     : {} / {}", resp.neighbors, resp.degree_target);
    println!("  Reserved      : {}", resp.reserved);
    println!("  Saturated     : {}", if resp.saturated { "yes" } else { "no" });

    Ok(())
}

async fn cmd_neighbors(port: u16) -> Result<()> {
    let resp: NeighborsResponse = get_json(&format!("{}/neighbors", base_url(port))).await?;

    if resp.neighbors.is_empty() {
        println!("No neighbors yet.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Neighbors ({})", resp.neighbors.len());
    println!("═══════════════════════════════════════");

    for n in &resp.neighbors {
        println!("  ┌─ {}", short(&n.uid));
        println!("  └─ addr : {}", n.addr);
    }

    Ok(())
}

fn print_usage() {
    println!("Usage: meshjoin-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status        Show node address, uid and table occupancy");
    println!("  neighbors     List current neighbors");
    println!();
    println!("Options:");
    println!("  --port <port>   Status endpoint port (default: {})", DEFAULT_PORT);
}

/// Split `--port N` out of the argument list.
fn parse_args(args: &[String]) -> Result<(u16, Vec<&str>)> {
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }
    Ok((port, remaining))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (port, remaining) = parse_args(&args)?;

    match remaining.as_slice() {
        ["status"] | []                => cmd_status(port).await,
        ["neighbors"]                  => cmd_neighbors(port).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
