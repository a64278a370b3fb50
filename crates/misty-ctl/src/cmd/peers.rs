//! Peer listing and reachability probe commands.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::http::{base_url, get_json};
use super::status::or_dash;

#[derive(Deserialize)]
pub struct PeerInfo {
    pub peer_hostname: String,
    pub peer_type: String,
    #[serde(default)]
    pub peer_address: String,
}

#[derive(Deserialize)]
struct PingResponse {
    target: String,
    success: bool,
    latency: Option<f64>,
    error: Option<String>,
}

pub async fn cmd_peers(port: u16) -> Result<()> {
    let mut peers: Vec<PeerInfo> = get_json(&format!("{}/peers", base_url(port))).await?;

    if peers.is_empty() {
        println!("No peers on the overlay yet.");
        return Ok(());
    }

    // server first, then by name
    peers.sort_by(|a, b| {
        (a.peer_type != "server", &a.peer_hostname).cmp(&(b.peer_type != "server", &b.peer_hostname))
    });

    println!("═══════════════════════════════════════");
    println!("  Peers ({})", peers.len());
    println!("═══════════════════════════════════════");
    for p in &peers {
        let marker = if p.peer_type == "server" { "★" } else { " " };
        println!(
            "  {} {:<28} {:<16} {}",
            marker,
            p.peer_hostname,
            or_dash(&p.peer_address),
            p.peer_type
        );
    }

    Ok(())
}

pub async fn cmd_ping(port: u16, hostname: &str) -> Result<()> {
    let url = ping_url(port, hostname)?;
    let resp: PingResponse = get_json(url.as_str()).await?;

    if resp.success {
        println!(
            "pong from {} ({}) in {}",
            hostname,
            resp.target,
            format_latency(resp.latency.unwrap_or_default())
        );
    } else {
        println!(
            "no reply from {}: {}",
            hostname,
            resp.error.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

fn format_latency(seconds: f64) -> String {
    if seconds < 1.0 {
        format!("{:.1}ms", seconds * 1000.0)
    } else {
        format!("{:.2}s", seconds)
    }
}

fn ping_url(port: u16, hostname: &str) -> Result<reqwest::Url> {
    reqwest::Url::parse_with_params(&format!("{}/ping", base_url(port)), &[("hostname", hostname)])
        .context("failed to build ping URL")
}
