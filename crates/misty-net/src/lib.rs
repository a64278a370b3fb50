//! misty-net: overlay connectivity. Session state, peer directory,
//! event watcher and reachability probes.

pub mod overlay;
pub mod peer;
pub mod prober;
pub mod session;
pub mod tailscale;
pub mod watcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use overlay::{
    BackendState, BusEvent, EventStream, OverlayBackend, OverlayClient, OverlayError, PeerStatus,
    PingKind, PingReply, StatusSnapshot,
};
pub use peer::{PeerDirectory, PeerRecord, PeerType};
pub use prober::{PingResult, Prober, PEER_NOT_FOUND};
pub use session::{Session, SessionError, SessionState, SessionStatus};
pub use tailscale::TailscaleCli;
pub use watcher::EventWatcher;
