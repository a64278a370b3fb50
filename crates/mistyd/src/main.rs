//! mistyd: misty overlay connectivity daemon.

use std::path::Path;

use anyhow::{Context, Result};

use misty_core::MistyConfig;
use misty_net::{Session, TailscaleCli};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    match MistyConfig::write_default_if_missing() {
        Ok(path) => tracing::debug!(path = %path.display(), "config file"),
        Err(e) => tracing::warn!(error = %e, "failed to write default config"),
    }
    let config = MistyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MistyConfig::default()
    });
    tracing::info!(
        api_port = config.network.api_port,
        data_dir = %config.overlay.data_dir.display(),
        probe_timeout_secs = config.probe.timeout_secs,
        "mistyd starting"
    );

    create_private_dir(&config.overlay.data_dir)
        .with_context(|| format!("failed to create {}", config.overlay.data_dir.display()))?;

    // Session
    let backend = TailscaleCli::new(&config.overlay.tailscale_bin, &config.overlay.tailscaled_bin)
        .with_ping_timeout(config.probe.timeout());
    let session = Session::create(
        &backend,
        &config.overlay.data_dir,
        config.identity.clone(),
        config.probe.timeout(),
    )
    .await
    .context("failed to create overlay session")?;
    tracing::info!(hostname = session.hostname(), "overlay session ready");

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let watcher_task = session
        .watch()
        .await
        .context("failed to subscribe to overlay events")?;

    let api_task = {
        let state = misty_api::ApiState {
            session: session.clone(),
        };
        let port = config.network.api_port;
        tokio::spawn(async move {
            if let Err(e) = misty_api::serve(state, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        r = watcher_task            => tracing::error!("event watcher exited: {:?}", r),
        r = api_task                => tracing::error!("API server exited: {:?}", r),
    }

    // tailscaled is killed when the runtime drops the last session handle
    Ok(())
}

/// Create `dir` and its parents, owner-only on unix.
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}
