//! Overlay backend driving a `tailscaled` instance through the `tailscale` CLI.
//!
//! `tailscaled` runs in userspace-networking mode with its state directory and
//! control socket inside the session data dir, so it never touches the host's
//! own tailscale installation. Every client call is one CLI invocation against
//! that socket.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};

use crate::overlay::{
    BackendState, BusEvent, EventStream, OverlayBackend, OverlayClient, OverlayError, PeerStatus,
    PingKind, PingReply, StatusSnapshot,
};

const SOCKET_NAME: &str = "tailscaled.sock";
const SOCKET_WAIT: Duration = Duration::from_secs(10);
const SOCKET_POLL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 8192;
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

// ── Backend ─────────────────────────────────────────────────────────────────

/// Starts `tailscaled` from the configured binaries.
#[derive(Debug, Clone)]
pub struct TailscaleCli {
    tailscale_bin: PathBuf,
    tailscaled_bin: PathBuf,
    ping_timeout: Duration,
}

impl TailscaleCli {
    pub fn new(tailscale_bin: impl Into<PathBuf>, tailscaled_bin: impl Into<PathBuf>) -> Self {
        Self {
            tailscale_bin: tailscale_bin.into(),
            tailscaled_bin: tailscaled_bin.into(),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// Deadline passed to `tailscale ping --timeout`. Keep it equal to the
    /// prober's deadline so either side expiring reads as a timeout.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }
}

#[async_trait]
impl OverlayBackend for TailscaleCli {
    async fn start(
        &self,
        hostname: &str,
        data_dir: &Path,
    ) -> Result<Arc<dyn OverlayClient>, OverlayError> {
        let socket = data_dir.join(SOCKET_NAME);
        // a stale socket from a previous run would pass the readiness check
        if socket.exists() {
            tokio::fs::remove_file(&socket).await?;
        }

        let mut daemon = Command::new(&self.tailscaled_bin)
            .arg("--tun=userspace-networking")
            .arg(format!("--statedir={}", data_dir.display()))
            .arg(format!("--socket={}", socket.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OverlayError::Start(format!("spawn {}: {e}", self.tailscaled_bin.display()))
            })?;

        wait_for_socket(&mut daemon, &socket).await?;
        tracing::info!(
            hostname,
            socket = %socket.display(),
            pid = daemon.id().unwrap_or_default(),
            "tailscaled started"
        );

        Ok(Arc::new(TailscaleClient {
            tailscale_bin: self.tailscale_bin.clone(),
            socket,
            hostname: hostname.to_string(),
            ping_timeout: self.ping_timeout,
            login_started: AtomicBool::new(false),
            _daemon: Mutex::new(daemon),
        }))
    }
}

async fn wait_for_socket(daemon: &mut Child, socket: &Path) -> Result<(), OverlayError> {
    let deadline = tokio::time::Instant::now() + SOCKET_WAIT;
    loop {
        if let Some(status) = daemon.try_wait()? {
            return Err(OverlayError::Start(format!("tailscaled exited early: {status}")));
        }
        if tokio::fs::try_exists(socket).await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OverlayError::Start(format!(
                "control socket {} did not appear within {}s",
                socket.display(),
                SOCKET_WAIT.as_secs()
            )));
        }
        tokio::time::sleep(SOCKET_POLL).await;
    }
}

// ── Client ──────────────────────────────────────────────────────────────────

pub struct TailscaleClient {
    tailscale_bin: PathBuf,
    socket: PathBuf,
    hostname: String,
    ping_timeout: Duration,
    login_started: AtomicBool,
    /// Dropping the client kills the daemon.
    _daemon: Mutex<Child>,
}

impl TailscaleClient {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.tailscale_bin);
        cmd.arg(format!("--socket={}", self.socket.display()))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Run `tailscale up` in the background. It blocks until login completes,
    /// the auth URL reaches us through the event bus meanwhile.
    fn start_login(&self) {
        if self.login_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut cmd = self.command();
        cmd.arg("up")
            .arg(format!("--hostname={}", self.hostname))
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        tokio::spawn(async move {
            match cmd.output().await {
                Ok(out) if out.status.success() => tracing::info!("tailscale up completed"),
                Ok(out) => tracing::warn!(
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "tailscale up failed"
                ),
                Err(e) => tracing::warn!(error = %e, "failed to run tailscale up"),
            }
        });
    }
}

#[async_trait]
impl OverlayClient for TailscaleClient {
    async fn status(&self) -> Result<StatusSnapshot, OverlayError> {
        let out = self
            .command()
            .args(["status", "--json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !out.status.success() {
            return Err(OverlayError::Status(failure_text(&out)));
        }
        parse_status(&out.stdout)
    }

    async fn watch_events(&self) -> Result<EventStream, OverlayError> {
        let mut child = self
            .command()
            .args(["debug", "watch-ipn"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OverlayError::Watch("watch-ipn stdout not captured".into()))?;

        // subscribed first, so the login prompt cannot slip past us
        self.start_login();

        let state = WatchState {
            _child: child,
            stdout,
            decoder: NotifyDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        };
        Ok(stream::unfold(state, next_event).boxed())
    }

    async fn ping(&self, addr: IpAddr, kind: PingKind) -> Result<PingReply, OverlayError> {
        let mut cmd = self.command();
        cmd.arg("ping");
        match kind {
            PingKind::Icmp => {
                cmd.arg("--icmp");
            }
            PingKind::Tsmp => {
                cmd.arg("--tsmp");
            }
            PingKind::Disco => {}
        }
        let out = cmd
            .args(["--c", "1"])
            .arg(format!("--timeout={}", go_duration(self.ping_timeout)))
            .arg(addr.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        ping_outcome(
            out.status.success(),
            &String::from_utf8_lossy(&out.stdout),
            &String::from_utf8_lossy(&out.stderr),
        )
    }
}

fn failure_text(out: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    let text = text.trim();
    if text.is_empty() {
        format!("tailscale exited with {}", out.status)
    } else {
        text.to_string()
    }
}

// ── `status --json` ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusJson {
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<IpAddr>>,
    #[serde(rename = "Peer", default)]
    peer: Option<HashMap<String, PeerJson>>,
}

#[derive(Deserialize)]
struct PeerJson {
    #[serde(rename = "HostName", default)]
    host_name: String,
    #[serde(rename = "TailscaleIPs", default)]
    tailscale_ips: Option<Vec<IpAddr>>,
}

fn parse_status(raw: &[u8]) -> Result<StatusSnapshot, OverlayError> {
    let status: StatusJson = serde_json::from_slice(raw)?;
    let peers = status
        .peer
        .unwrap_or_default()
        .into_values()
        .map(|p| PeerStatus {
            hostname: p.host_name,
            addresses: p.tailscale_ips.unwrap_or_default(),
        })
        .collect();
    Ok(StatusSnapshot {
        self_addresses: status.tailscale_ips.unwrap_or_default(),
        peers,
    })
}

// ── `ping` ──────────────────────────────────────────────────────────────────

/// Latency in seconds from a line like `pong from host (100.64.0.2) via DERP(fra) in 23ms`.
fn parse_pong_latency(line: &str) -> Option<f64> {
    if !line.starts_with("pong from") {
        return None;
    }
    let (_, dur) = line.trim_end().rsplit_once(" in ")?;
    parse_duration_secs(dur)
}

/// Classify one `tailscale ping` run. The CLI reports its own deadline as
/// `ping "<ip>" timed out` on stdout and a bare `no reply` on stderr, so both
/// streams are checked before the error text is chosen.
fn ping_outcome(success: bool, stdout: &str, stderr: &str) -> Result<PingReply, OverlayError> {
    if success {
        if let Some(latency_seconds) = stdout.lines().find_map(parse_pong_latency) {
            return Ok(PingReply { latency_seconds });
        }
    }
    if stdout.contains("timed out") || stderr.contains("timed out") {
        return Err(OverlayError::Timeout);
    }
    let message = [stderr, stdout]
        .into_iter()
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or("tailscale ping failed");
    Err(OverlayError::Ping(message.to_string()))
}

/// Format as a Go duration flag value, e.g. `5s` or `1500ms`.
fn go_duration(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

/// Parse a single-unit duration such as `850µs`, `23ms`, `1.5s`.
fn parse_duration_secs(text: &str) -> Option<f64> {
    let split = text.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    let (value, unit) = text.split_at(split);
    let value: f64 = value.parse().ok()?;
    let scale = match unit {
        "ns" => 1e-9,
        "us" | "µs" | "μs" => 1e-6,
        "ms" => 1e-3,
        "s" => 1.0,
        "m" => 60.0,
        _ => return None,
    };
    Some(value * scale)
}

// ── `debug watch-ipn` ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NotifyJson {
    #[serde(rename = "State", default)]
    state: Option<u8>,
    #[serde(rename = "BrowseToURL", default)]
    browse_to_url: Option<String>,
    #[serde(rename = "NetMap", default)]
    net_map: Option<serde_json::Value>,
}

impl NotifyJson {
    fn into_event(self) -> Option<BusEvent> {
        let event = BusEvent {
            auth_url: self.browse_to_url.filter(|u| !u.is_empty()),
            state: self.state.map(BackendState::from_code),
            netmap_changed: self.net_map.is_some(),
        };
        (event != BusEvent::default()).then_some(event)
    }
}

/// Splits a byte stream of concatenated, possibly pretty-printed JSON
/// notifications into bus events.
#[derive(Default)]
struct NotifyDecoder {
    buf: Vec<u8>,
}

impl NotifyDecoder {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<BusEvent>, OverlayError> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        let mut consumed = 0;
        {
            let mut iter = serde_json::Deserializer::from_slice(&self.buf).into_iter::<NotifyJson>();
            loop {
                match iter.next() {
                    Some(Ok(notify)) => {
                        consumed = iter.byte_offset();
                        events.extend(notify.into_event());
                    }
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        consumed = iter.byte_offset();
                        break;
                    }
                }
            }
        }
        self.buf.drain(..consumed);
        Ok(events)
    }
}

struct WatchState {
    /// Killed when the stream is dropped.
    _child: Child,
    stdout: ChildStdout,
    decoder: NotifyDecoder,
    pending: VecDeque<BusEvent>,
    done: bool,
}

async fn next_event(
    mut state: WatchState,
) -> Option<(Result<BusEvent, OverlayError>, WatchState)> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((Ok(event), state));
        }
        if state.done {
            return None;
        }
        let n = match state.stdout.read(&mut chunk).await {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) => {
                state.done = true;
                return Some((Err(e.into()), state));
            }
        };
        match state.decoder.push(&chunk[..n]) {
            Ok(events) => state.pending.extend(events),
            Err(e) => {
                state.done = true;
                return Some((Err(e), state));
            }
        }
    }
}
