//! Session status and server peer commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};
use super::peers::PeerInfo;

#[derive(Deserialize)]
struct AuthResponse {
    status: String,
    #[serde(default)]
    auth_url: String,
    #[serde(default)]
    connected_ip: String,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: AuthResponse = get_json(&format!("{}/auth", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Misty Session Status");
    println!("═══════════════════════════════════════");
    println!("  Status       : {}", resp.status);
    println!("  Connected IP : {}", or_dash(&resp.connected_ip));
    if !resp.auth_url.is_empty() {
        println!("\n  Log in at:");
        println!("  {}", resp.auth_url);
    }

    Ok(())
}

pub async fn cmd_server(port: u16) -> Result<()> {
    let resp: Option<PeerInfo> = get_json(&format!("{}/server", base_url(port))).await?;

    match resp {
        Some(server) => {
            println!("Server peer:");
            println!("  hostname : {}", server.peer_hostname);
            println!("  address  : {}", or_dash(&server.peer_address));
        }
        None => println!("Server peer not visible on the overlay."),
    }

    Ok(())
}

pub(crate) fn or_dash(value: &str) -> &str {
    if value.is_empty() { "-" } else { value }
}
