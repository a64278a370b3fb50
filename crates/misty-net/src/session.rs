//! Session controller: this node's overlay membership and its view of peers.
//!
//! A `Session` owns the connection state machine and the peer directory.
//! Reads (`status`, `peers`, `server_peer`, `ping_peer`) may come from any
//! number of tasks. Writes come only from the event watcher through
//! [`Session::dispatch`].
//!
//! One `tokio::sync::Mutex` guards state and directory together. It is never
//! held across a call into the overlay client: a refresh queries status
//! first, then applies the result under a single lock acquisition, so readers
//! see either the previous view or the complete new one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use misty_core::{ConfigError, Identity, IdentityPaths};

use crate::overlay::{
    BackendState, BusEvent, OverlayBackend, OverlayClient, OverlayError, StatusSnapshot,
};
use crate::peer::{first_ipv4, PeerDirectory, PeerRecord, PeerType};
use crate::prober::{PingResult, Prober};

/// Connection status exposed to callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Offline,
    Unauthorized,
    Connected,
    Error,
}

impl From<BackendState> for SessionStatus {
    fn from(state: BackendState) -> Self {
        match state {
            BackendState::Running => SessionStatus::Connected,
            BackendState::Stopped => SessionStatus::Offline,
            BackendState::NeedsLogin => SessionStatus::Unauthorized,
            _ => SessionStatus::Error,
        }
    }
}

/// Snapshot of the session state. Always a copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Login URL, set only while unauthorized.
    pub auth_url: String,
    /// This node's own IPv4 overlay address, empty until known.
    pub connected_ip: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to load identity: {0}")]
    ConfigLoad(#[from] ConfigError),
    #[error("failed to start overlay client: {0}")]
    ClientInit(#[source] OverlayError),
}

/// Guarded by the session lock.
#[derive(Default)]
struct Shared {
    state: SessionState,
    peers: PeerDirectory,
}

struct Inner {
    client: Arc<dyn OverlayClient>,
    identity_paths: IdentityPaths,
    hostname: String,
    prober: Prober,
    shared: Mutex<Shared>,
}

/// Result of the I/O half of a refresh, applied later under the lock.
struct Refresh {
    snapshot: StatusSnapshot,
    server_hostname: Option<String>,
}

/// Handle to the session. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Load identity, start the overlay client under the hashed hostname with
    /// its state in `data_dir`, and return an `Offline` session with no peers.
    pub async fn create(
        backend: &dyn OverlayBackend,
        data_dir: &Path,
        identity_paths: IdentityPaths,
        probe_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let identity = Identity::load(&identity_paths)?;
        let hostname = identity.hostname();
        tracing::info!(
            hostname = %hostname,
            device_id = %identity.config.device_id,
            data_dir = %data_dir.display(),
            "starting overlay client"
        );

        let client = backend
            .start(&hostname, data_dir)
            .await
            .map_err(SessionError::ClientInit)?;

        Ok(Self::with_client(client, identity_paths, hostname, probe_timeout))
    }

    /// Wrap an already running client.
    pub fn with_client(
        client: Arc<dyn OverlayClient>,
        identity_paths: IdentityPaths,
        hostname: String,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                identity_paths,
                hostname,
                prober: Prober::new(probe_timeout),
                shared: Mutex::new(Shared::default()),
            }),
        }
    }

    /// The hostname the overlay client was started under.
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    pub(crate) fn client(&self) -> &Arc<dyn OverlayClient> {
        &self.inner.client
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub async fn status(&self) -> SessionState {
        self.inner.shared.lock().await.state.clone()
    }

    /// Every known peer, in no particular order.
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.inner.shared.lock().await.peers.records()
    }

    /// The server peer, or `None` if the latest snapshot did not contain it.
    pub async fn server_peer(&self) -> Option<PeerRecord> {
        self.inner.shared.lock().await.peers.server()
    }

    /// Classify `hostname` against the identity as it is on disk right now.
    pub async fn peer_type(&self, hostname: &str) -> PeerType {
        match self.server_hostname().await {
            Some(server) if server == hostname => PeerType::Server,
            _ => PeerType::Client,
        }
    }

    /// Probe a peer by hostname. Unknown peers are answered without touching
    /// the network; the lock is released before the probe is sent.
    pub async fn ping_peer(&self, hostname: &str) -> PingResult {
        let address = {
            let shared = self.inner.shared.lock().await;
            shared.peers.get(hostname).map(|p| p.address.clone())
        };
        let Some(address) = address else {
            tracing::debug!(hostname, "ping requested for unknown peer");
            return PingResult::not_found(hostname);
        };
        self.inner.prober.probe(self.inner.client.as_ref(), &address).await
    }

    // ── Writes (event watcher only) ──────────────────────────────────────────

    /// Apply one bus event: auth prompt, then state transition, then netmap.
    pub(crate) async fn dispatch(&self, event: BusEvent) {
        if let Some(url) = event.auth_url {
            self.handle_auth_url(url).await;
        }
        if let Some(state) = event.state {
            self.handle_state(state).await;
        }
        if event.netmap_changed {
            self.handle_netmap().await;
        }
    }

    async fn handle_auth_url(&self, url: String) {
        tracing::info!(url = %url, "login required");
        let mut shared = self.inner.shared.lock().await;
        shared.state.status = SessionStatus::Unauthorized;
        shared.state.auth_url = url;
    }

    async fn handle_state(&self, state: BackendState) {
        let status = SessionStatus::from(state);
        tracing::info!(?state, ?status, "backend state changed");

        let refresh = self.collect_refresh().await;

        let mut shared = self.inner.shared.lock().await;
        shared.state.status = status;
        if status != SessionStatus::Unauthorized {
            shared.state.auth_url.clear();
        }
        if let Some(refresh) = refresh {
            apply_refresh(&mut shared, refresh);
        }
    }

    async fn handle_netmap(&self) {
        tracing::debug!("network map changed");
        if let Some(refresh) = self.collect_refresh().await {
            let mut shared = self.inner.shared.lock().await;
            apply_refresh(&mut shared, refresh);
        }
    }

    /// Query status and recompute the server hostname. `None` means the
    /// status query failed and the current view must be kept.
    async fn collect_refresh(&self) -> Option<Refresh> {
        let snapshot = match self.inner.client.status().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to refresh status, keeping previous view");
                return None;
            }
        };
        Some(Refresh {
            snapshot,
            server_hostname: self.server_hostname().await,
        })
    }

    /// Hashed base name from a fresh read of the identity files. The read
    /// runs on the blocking pool.
    async fn server_hostname(&self) -> Option<String> {
        let paths = self.inner.identity_paths.clone();
        match tokio::task::spawn_blocking(move || Identity::load(&paths)).await {
            Ok(Ok(identity)) => Some(identity.hostname()),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to reload identity, no peer will be classed as server");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "identity reload task failed");
                None
            }
        }
    }
}

fn apply_refresh(shared: &mut Shared, refresh: Refresh) {
    if let Some(ip) = first_ipv4(&refresh.snapshot.self_addresses) {
        shared.state.connected_ip = ip.to_string();
    }
    shared.peers =
        PeerDirectory::from_snapshot(&refresh.snapshot.peers, refresh.server_hostname.as_deref());
    let server_known = shared.peers.server().is_some();
    tracing::info!(
        peers = shared.peers.len(),
        connected_ip = %shared.state.connected_ip,
        server_known,
        "peer directory refreshed"
    );
}
