//! HTTP API against a live session.

use anyhow::Result;

use misty_core::hashed_name;
use misty_net::testing::PingBehavior;
use misty_net::BusEvent;

use crate::*;

#[tokio::test]
async fn test_api_hello_and_auth() -> Result<()> {
    let identity = Identity::new("api-auth", "secretA", "server")?;
    let node = start_node(&identity).await?;
    let (base, _server) = serve_api(&node.session).await?;

    let (code, body) = api_get(&base, "/hello").await?;
    assert_eq!(code, 200);
    assert_eq!(body["message"], "hello world");

    let (_, body) = api_get(&base, "/auth").await?;
    assert_eq!(body["status"], "offline");

    node.overlay.emit(BusEvent::auth("https://login.example/a/42"));
    wait_until("auth url over http", || async {
        match api_get(&base, "/auth").await {
            Ok((_, body)) => body["auth_url"] == "https://login.example/a/42",
            Err(_) => false,
        }
    })
    .await?;

    let (_, body) = api_get(&base, "/auth").await?;
    assert_eq!(body["status"], "unauthorized");
    Ok(())
}

#[tokio::test]
async fn test_api_peers_and_server() -> Result<()> {
    let identity = Identity::new("api-peers", "secretA", "server")?;
    let node = start_node(&identity).await?;
    let (base, _server) = serve_api(&node.session).await?;

    let (_, body) = api_get(&base, "/server").await?;
    assert!(body.is_null(), "no server yet: {body}");

    let server = hashed_name(b"secretA", "server");
    node.overlay.set_peers(&[(server.as_str(), "100.64.0.1"), ("laptop", "100.64.0.2")]);
    node.overlay.emit(BusEvent::netmap());
    wait_until("peers listed", || async { node.session.peers().await.len() == 2 }).await?;

    let (code, body) = api_get(&base, "/peers").await?;
    assert_eq!(code, 200);
    let peers = body.as_array().expect("peers array");
    assert_eq!(peers.len(), 2);
    assert!(peers
        .iter()
        .any(|p| p["peer_hostname"] == "laptop" && p["peer_type"] == "client"));

    let (_, body) = api_get(&base, "/server").await?;
    assert_eq!(body["peer_hostname"], server.as_str());
    assert_eq!(body["peer_type"], "server");
    assert_eq!(body["peer_address"], "100.64.0.1");
    Ok(())
}

#[tokio::test]
async fn test_api_ping() -> Result<()> {
    let identity = Identity::new("api-ping", "secretA", "server")?;
    let node = start_node(&identity).await?;
    let (base, _server) = serve_api(&node.session).await?;

    let (code, body) = api_get(&base, "/ping").await?;
    assert_eq!(code, 400);
    assert_eq!(body, "hostname parameter is required");

    let (code, body) = api_get(&base, "/ping?hostname=ghost").await?;
    assert_eq!(code, 200);
    assert_eq!(body["success"], false);
    assert_eq!(body["target"], "ghost");
    assert_eq!(body["error"], "peer not found");
    assert_eq!(node.overlay.ping_calls(), 0);

    node.overlay.set_peers(&[("laptop", "100.64.0.2")]);
    node.overlay.set_ping(PingBehavior::Reply(0.015));
    node.overlay.emit(BusEvent::netmap());
    wait_until("laptop known", || async { !node.session.peers().await.is_empty() }).await?;

    let (_, body) = api_get(&base, "/ping?hostname=laptop").await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["target"], "100.64.0.2");
    assert_eq!(body["latency"], 0.015);
    assert!(body.get("error").is_none());

    node.overlay.set_ping(PingBehavior::Fail("no route to host".into()));
    let (_, body) = api_get(&base, "/ping?hostname=laptop").await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "no route to host");
    assert_eq!(node.overlay.ping_calls(), 2);
    Ok(())
}
