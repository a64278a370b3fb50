//! misty integration test harness.
//!
//! Drives a real `Session`, its event watcher and the HTTP API against the
//! scripted in-memory overlay. No tailscaled is needed.
//!
//!   cargo test --test integration

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;

use misty_core::IdentityPaths;
use misty_net::testing::ScriptedOverlay;
use misty_net::Session;

mod api;
mod lifecycle;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Identity files in a per-test temp dir. Removed on drop.
pub struct Identity {
    dir: PathBuf,
    pub paths: IdentityPaths,
}

impl Identity {
    pub fn new(tag: &str, secret: &str, base_name: &str) -> Result<Self> {
        let dir = std::env::temp_dir().join(format!("misty-it-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let identity = Self {
            paths: IdentityPaths {
                config_path: dir.join("config.json"),
                secret_path: dir.join("secret.txt"),
            },
            dir,
        };
        identity.write(secret, base_name)?;
        Ok(identity)
    }

    pub fn write(&self, secret: &str, base_name: &str) -> Result<()> {
        let doc = serde_json::json!({
            "device_id": "it-device",
            "server_id": "it-server",
            "base_name": base_name,
        });
        std::fs::write(&self.paths.config_path, doc.to_string())?;
        std::fs::write(&self.paths.secret_path, secret)?;
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.dir.join("state")
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// A session created through the backend seam, with its watcher running.
pub struct Node {
    pub overlay: Arc<ScriptedOverlay>,
    pub session: Session,
    pub watcher: JoinHandle<()>,
}

pub async fn start_node(identity: &Identity) -> Result<Node> {
    let overlay = ScriptedOverlay::new();
    let session = Session::create(
        &overlay,
        &identity.data_dir(),
        identity.paths.clone(),
        Duration::from_secs(5),
    )
    .await
    .context("session create failed")?;
    let watcher = session.watch().await.context("watch failed")?;
    Ok(Node {
        overlay,
        session,
        watcher,
    })
}

/// Serve the API on an ephemeral port. Returns its `/api` base URL.
pub async fn serve_api(session: &Session) -> Result<(String, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let state = misty_api::ApiState {
        session: session.clone(),
    };
    let task = tokio::spawn(async move {
        if let Err(e) = misty_api::serve_on(listener, state).await {
            eprintln!("api server failed: {e:#}");
        }
    });
    Ok((format!("http://127.0.0.1:{port}/api"), task))
}

pub async fn api_get(base: &str, path: &str) -> Result<(u16, serde_json::Value)> {
    let resp = reqwest::get(format!("{base}{path}"))
        .await
        .with_context(|| format!("GET {path} failed"))?;
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
    Ok((status, body))
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn wait_until<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out waiting for {what}")
}
