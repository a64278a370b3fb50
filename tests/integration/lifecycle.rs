//! Session lifecycle driven through the event watcher.

use std::time::Duration;

use anyhow::Result;

use misty_core::hashed_name;
use misty_net::{BackendState, BusEvent, PeerType, SessionStatus, StatusSnapshot};
use misty_net::testing::peer;

use crate::*;

fn snapshot(self_ip: &str, peers: &[(&str, &str)]) -> StatusSnapshot {
    StatusSnapshot {
        self_addresses: vec![self_ip.parse().expect("valid ip")],
        peers: peers.iter().map(|(h, a)| peer(h, &[*a])).collect(),
    }
}

#[tokio::test]
async fn test_login_then_connect() -> Result<()> {
    let identity = Identity::new("login", "secretA", "server")?;
    let node = start_node(&identity).await?;
    assert_eq!(node.session.hostname(), "server-0224ff90");
    assert_eq!(node.overlay.started_with().map(|(h, _)| h).as_deref(), Some("server-0224ff90"));

    // login prompt
    node.overlay.emit(BusEvent::state(BackendState::NeedsLogin));
    node.overlay.emit(BusEvent::auth("https://login.example/a/123"));
    wait_until("unauthorized with url", || async {
        let s = node.session.status().await;
        s.status == SessionStatus::Unauthorized && !s.auth_url.is_empty()
    })
    .await?;

    // login completes
    let server = hashed_name(b"secretA", "server");
    node.overlay.set_snapshot(snapshot(
        "100.64.0.9",
        &[(server.as_str(), "100.64.0.1"), ("laptop", "100.64.0.2")],
    ));
    node.overlay.emit(BusEvent {
        auth_url: None,
        state: Some(BackendState::Running),
        netmap_changed: true,
    });
    wait_until("connected", || async {
        node.session.status().await.status == SessionStatus::Connected
    })
    .await?;

    let state = node.session.status().await;
    assert_eq!(state.auth_url, "");
    assert_eq!(state.connected_ip, "100.64.0.9");
    let found = node.session.server_peer().await.expect("server visible");
    assert_eq!(found.hostname, server);
    assert_eq!(found.peer_type, PeerType::Server);
    assert_eq!(node.session.peers().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_netmap_change_replaces_directory() -> Result<()> {
    let identity = Identity::new("netmap", "secretA", "server")?;
    let node = start_node(&identity).await?;

    node.overlay.set_peers(&[("a", "100.64.0.1"), ("b", "100.64.0.2")]);
    node.overlay.emit(BusEvent::netmap());
    wait_until("two peers", || async { node.session.peers().await.len() == 2 }).await?;

    node.overlay.set_peers(&[("c", "100.64.0.3")]);
    node.overlay.emit(BusEvent::netmap());
    wait_until("one peer", || async { node.session.peers().await.len() == 1 }).await?;

    let peers = node.session.peers().await;
    assert_eq!(peers[0].hostname, "c");
    // status untouched by netmap-only events
    assert_eq!(node.session.status().await.status, SessionStatus::Offline);
    Ok(())
}

#[tokio::test]
async fn test_secret_rotation_moves_server_role() -> Result<()> {
    let identity = Identity::new("rotate", "secretA", "server")?;
    let node = start_node(&identity).await?;
    let old = hashed_name(b"secretA", "server");
    let new = hashed_name(b"secretB", "server");
    node.overlay.set_peers(&[(old.as_str(), "100.64.0.1"), (new.as_str(), "100.64.0.2")]);

    node.overlay.emit(BusEvent::netmap());
    wait_until("old server", || async {
        node.session.server_peer().await.map(|p| p.hostname) == Some(old.clone())
    })
    .await?;

    identity.write("secretB", "server")?;
    node.overlay.emit(BusEvent::netmap());
    wait_until("new server", || async {
        node.session.server_peer().await.map(|p| p.hostname) == Some(new.clone())
    })
    .await?;

    let servers = node
        .session
        .peers()
        .await
        .into_iter()
        .filter(|p| p.peer_type == PeerType::Server)
        .count();
    assert_eq!(servers, 1);
    Ok(())
}

#[tokio::test]
async fn test_watcher_stops_when_bus_closes() -> Result<()> {
    let identity = Identity::new("closed", "secretA", "server")?;
    let node = start_node(&identity).await?;

    node.overlay.emit(BusEvent::state(BackendState::Running));
    node.overlay.close_events();
    tokio::time::timeout(Duration::from_secs(2), node.watcher).await??;

    assert_eq!(node.session.status().await.status, SessionStatus::Connected);
    // reads keep working after the watcher is gone
    assert!(node.session.peers().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_status_outage_keeps_last_view() -> Result<()> {
    let identity = Identity::new("outage", "secretA", "server")?;
    let node = start_node(&identity).await?;

    node.overlay.set_snapshot(snapshot("100.64.0.9", &[("laptop", "100.64.0.2")]));
    node.overlay.emit(BusEvent::state(BackendState::Running));
    wait_until("connected", || async { !node.session.peers().await.is_empty() }).await?;

    node.overlay.fail_status("tailscaled not responding");
    node.overlay.emit(BusEvent::state(BackendState::Starting));
    wait_until("error state", || async {
        node.session.status().await.status == SessionStatus::Error
    })
    .await?;

    assert_eq!(node.session.status().await.connected_ip, "100.64.0.9");
    assert_eq!(node.session.peers().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_identity_fails_startup() -> Result<()> {
    let identity = Identity::new("noident", "secretA", "server")?;
    std::fs::remove_file(&identity.paths.config_path)?;

    let err = match start_node(&identity).await {
        Ok(_) => anyhow::bail!("startup should fail without identity"),
        Err(e) => e,
    };
    assert!(format!("{err:#}").contains("failed to read"), "{err:#}");
    Ok(())
}
