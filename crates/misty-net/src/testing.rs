//! Scripted in-memory overlay for tests.
//!
//! `ScriptedOverlay` implements both overlay traits. Tests set the snapshot
//! returned by `status`, choose how `ping` behaves, and push bus events
//! through `emit` after a subscriber has called `watch_events`.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;

use crate::overlay::{
    BusEvent, EventStream, OverlayBackend, OverlayClient, OverlayError, PeerStatus, PingKind,
    PingReply, StatusSnapshot,
};

/// How the scripted client answers probes.
#[derive(Debug, Clone)]
pub enum PingBehavior {
    Reply(f64),
    Fail(String),
    /// The client reports its own deadline expiry.
    ClientTimeout,
    /// Never answers.
    Hang,
}

#[derive(Default)]
struct Script {
    snapshot: StatusSnapshot,
    status_error: Option<String>,
    start_error: Option<String>,
    started: Option<(String, PathBuf)>,
    ping: Option<PingBehavior>,
    pinged: Vec<IpAddr>,
    subscriber: Option<mpsc::UnboundedSender<Result<BusEvent, OverlayError>>>,
}

#[derive(Default)]
pub struct ScriptedOverlay {
    script: Mutex<Script>,
    status_calls: AtomicUsize,
    ping_calls: AtomicUsize,
}

impl ScriptedOverlay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("scripted overlay lock poisoned")
    }

    pub fn set_snapshot(&self, snapshot: StatusSnapshot) {
        let mut script = self.script();
        script.snapshot = snapshot;
        script.status_error = None;
    }

    /// Replace the snapshot with one listing `peers`, keeping self addresses.
    pub fn set_peers(&self, peers: &[(&str, &str)]) {
        let mut script = self.script();
        script.snapshot.peers = peers.iter().map(|(h, a)| peer(h, &[*a])).collect();
        script.status_error = None;
    }

    /// Make subsequent `status` calls fail.
    pub fn fail_status(&self, message: &str) {
        self.script().status_error = Some(message.to_string());
    }

    pub fn fail_start(&self, message: &str) {
        self.script().start_error = Some(message.to_string());
    }

    pub fn set_ping(&self, behavior: PingBehavior) {
        self.script().ping = Some(behavior);
    }

    /// Hostname and data dir passed to `start`, if it was called.
    pub fn started_with(&self) -> Option<(String, PathBuf)> {
        self.script().started.clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    pub fn pinged(&self) -> Vec<IpAddr> {
        self.script().pinged.clone()
    }

    pub fn has_subscriber(&self) -> bool {
        self.script().subscriber.is_some()
    }

    /// Deliver an event to the current subscriber. Returns false if nobody listens.
    pub fn emit(&self, event: BusEvent) -> bool {
        match self.script().subscriber.as_ref() {
            Some(tx) => tx.unbounded_send(Ok(event)).is_ok(),
            None => false,
        }
    }

    /// Deliver a stream error to the current subscriber.
    pub fn emit_error(&self, message: &str) -> bool {
        match self.script().subscriber.as_ref() {
            Some(tx) => tx
                .unbounded_send(Err(OverlayError::Watch(message.to_string())))
                .is_ok(),
            None => false,
        }
    }

    /// End the event stream.
    pub fn close_events(&self) {
        self.script().subscriber = None;
    }
}

/// Build a `PeerStatus` from string addresses.
pub fn peer(hostname: &str, addrs: &[&str]) -> PeerStatus {
    PeerStatus {
        hostname: hostname.to_string(),
        addresses: addrs.iter().filter_map(|a| a.parse().ok()).collect(),
    }
}

#[async_trait]
impl OverlayClient for ScriptedOverlay {
    async fn status(&self) -> Result<StatusSnapshot, OverlayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        match &script.status_error {
            Some(message) => Err(OverlayError::Status(message.clone())),
            None => Ok(script.snapshot.clone()),
        }
    }

    async fn watch_events(&self) -> Result<EventStream, OverlayError> {
        let (tx, rx) = mpsc::unbounded();
        self.script().subscriber = Some(tx);
        Ok(rx.boxed())
    }

    async fn ping(&self, addr: IpAddr, _kind: PingKind) -> Result<PingReply, OverlayError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = {
            let mut script = self.script();
            script.pinged.push(addr);
            script.ping.clone().unwrap_or(PingBehavior::Reply(0.001))
        };
        match behavior {
            PingBehavior::Reply(latency_seconds) => Ok(PingReply { latency_seconds }),
            PingBehavior::Fail(message) => Err(OverlayError::Ping(message)),
            PingBehavior::ClientTimeout => Err(OverlayError::Timeout),
            PingBehavior::Hang => std::future::pending().await,
        }
    }
}

#[async_trait]
impl OverlayBackend for Arc<ScriptedOverlay> {
    async fn start(
        &self,
        hostname: &str,
        data_dir: &Path,
    ) -> Result<Arc<dyn OverlayClient>, OverlayError> {
        let mut script = self.script();
        if let Some(message) = &script.start_error {
            return Err(OverlayError::Start(message.clone()));
        }
        script.started = Some((hostname.to_string(), data_dir.to_path_buf()));
        drop(script);
        Ok(self.clone() as Arc<dyn OverlayClient>)
    }
}
