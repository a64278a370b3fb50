//! Reachability prober: one timed echo probe per call, never an error.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::overlay::{OverlayClient, OverlayError, PingKind};

pub const PEER_NOT_FOUND: &str = "peer not found";

/// Outcome of a probe. Failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    /// The probed address, or the requested hostname when the peer is unknown.
    pub target: String,
    pub success: bool,
    /// Round trip in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PingResult {
    pub fn reachable(target: impl Into<String>, latency: f64) -> Self {
        Self {
            target: target.into(),
            success: true,
            latency: Some(latency),
            error: None,
        }
    }

    pub fn failed(target: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            success: false,
            latency: None,
            error: Some(error.into()),
        }
    }

    pub fn not_found(hostname: impl Into<String>) -> Self {
        Self::failed(hostname, PEER_NOT_FOUND)
    }
}

/// Issues probes with a fixed deadline. The deadline belongs to the prober,
/// callers cannot change it per call.
#[derive(Debug, Clone, Copy)]
pub struct Prober {
    timeout: Duration,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Error text reported when the deadline expires.
    pub fn timeout_message(&self) -> String {
        if self.timeout.subsec_nanos() == 0 {
            format!("request timed out after {} seconds", self.timeout.as_secs())
        } else {
            format!("request timed out after {} milliseconds", self.timeout.as_millis())
        }
    }

    /// Send exactly one ICMP probe to `address` through `client`.
    pub async fn probe(&self, client: &dyn OverlayClient, address: &str) -> PingResult {
        let ip: IpAddr = match address.parse() {
            Ok(ip) => ip,
            Err(e) => {
                return PingResult::failed(address, format!("invalid peer address {address:?}: {e}"))
            }
        };

        match tokio::time::timeout(self.timeout, client.ping(ip, PingKind::Icmp)).await {
            Ok(Ok(reply)) => {
                tracing::debug!(addr = address, latency = reply.latency_seconds, "probe answered");
                PingResult::reachable(address, reply.latency_seconds)
            }
            Ok(Err(OverlayError::Timeout)) | Err(_) => {
                tracing::debug!(addr = address, "probe timed out");
                PingResult::failed(address, self.timeout_message())
            }
            Ok(Err(e)) => {
                tracing::debug!(addr = address, error = %e, "probe failed");
                PingResult::failed(address, e.to_string())
            }
        }
    }
}
