//! Shared HTTP request helpers for CLI commands.

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api", port)
}

pub async fn get_json<T: for<'de> Deserialize<'de>>(url: &str) -> Result<T> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to mistyd at {}, is it running?", url))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("mistyd returned {}: {}", status, body.trim());
    }

    resp.json::<T>().await.context("failed to parse response")
}
