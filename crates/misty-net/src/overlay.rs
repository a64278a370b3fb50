//! Overlay client seam.
//!
//! The overlay network (addressing, routing, crypto, control plane) is owned
//! entirely by an embedded client. misty only needs four things from it:
//! start under a hostname, report a status snapshot, stream bus events, and
//! send a single echo probe. Everything in this crate talks to the overlay
//! through these two traits.

use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Backend state as reported on the overlay client's event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    NoState,
    InUseOtherUser,
    NeedsLogin,
    NeedsMachineAuth,
    Stopped,
    Starting,
    Running,
    /// A state code this build does not know about.
    Unknown(u8),
}

impl BackendState {
    /// Decode the numeric state used on the wire by the overlay client.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NoState,
            1 => Self::InUseOtherUser,
            2 => Self::NeedsLogin,
            3 => Self::NeedsMachineAuth,
            4 => Self::Stopped,
            5 => Self::Starting,
            6 => Self::Running,
            other => Self::Unknown(other),
        }
    }
}

/// One notification from the event bus. Any combination of fields may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusEvent {
    /// Interactive login URL the user must visit.
    pub auth_url: Option<String>,
    pub state: Option<BackendState>,
    /// The network map changed; the payload itself is not needed.
    pub netmap_changed: bool,
}

impl BusEvent {
    pub fn auth(url: impl Into<String>) -> Self {
        Self {
            auth_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn state(state: BackendState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn netmap() -> Self {
        Self {
            netmap_changed: true,
            ..Self::default()
        }
    }
}

/// A remote node as listed in a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
}

/// Full status snapshot: this node's own overlay addresses and every remote peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub self_addresses: Vec<IpAddr>,
    pub peers: Vec<PeerStatus>,
}

/// Probe flavour understood by the overlay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingKind {
    /// ICMP echo through the overlay.
    Icmp,
    /// Overlay-level discovery ping, does not reach the peer's OS.
    Disco,
    /// Ping handled by the peer's overlay stack.
    Tsmp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingReply {
    pub latency_seconds: f64,
}

/// Sequential bus events, starting at the moment of subscription.
pub type EventStream = BoxStream<'static, Result<BusEvent, OverlayError>>;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("overlay client failed to start: {0}")]
    Start(String),
    #[error("status query failed: {0}")]
    Status(String),
    #[error("event bus failed: {0}")]
    Watch(String),
    #[error("{0}")]
    Ping(String),
    /// The client gave up waiting on its own deadline.
    #[error("ping timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed client output: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Control handle to a running overlay client.
#[async_trait]
pub trait OverlayClient: Send + Sync {
    async fn status(&self) -> Result<StatusSnapshot, OverlayError>;

    /// Subscribe to the event bus. No history is replayed.
    async fn watch_events(&self) -> Result<EventStream, OverlayError>;

    async fn ping(&self, addr: IpAddr, kind: PingKind) -> Result<PingReply, OverlayError>;
}

/// Something that can bring an overlay client up.
#[async_trait]
pub trait OverlayBackend: Send + Sync {
    /// Start the client under `hostname`, keeping its state in `data_dir`.
    async fn start(
        &self,
        hostname: &str,
        data_dir: &Path,
    ) -> Result<Arc<dyn OverlayClient>, OverlayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_state_codes() {
        assert_eq!(BackendState::from_code(2), BackendState::NeedsLogin);
        assert_eq!(BackendState::from_code(4), BackendState::Stopped);
        assert_eq!(BackendState::from_code(6), BackendState::Running);
        assert_eq!(BackendState::from_code(42), BackendState::Unknown(42));
    }

    #[test]
    fn bus_event_builders_set_one_field() {
        let e = BusEvent::netmap();
        assert!(e.netmap_changed);
        assert!(e.auth_url.is_none() && e.state.is_none());

        let e = BusEvent::auth("https://login.example/a");
        assert_eq!(e.auth_url.as_deref(), Some("https://login.example/a"));
        assert!(!e.netmap_changed);
    }
}
