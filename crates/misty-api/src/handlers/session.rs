//! /hello, /auth, /server handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use misty_net::{PeerRecord, SessionState};

use super::ApiState;

// ── /hello ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HelloResponse {
    pub message: &'static str,
}

pub async fn handle_hello() -> Json<HelloResponse> {
    Json(HelloResponse {
        message: "hello world",
    })
}

// ── /auth ────────────────────────────────────────────────────────────────────

pub async fn handle_auth(State(state): State<ApiState>) -> Json<SessionState> {
    Json(state.session.status().await)
}

// ── /server ──────────────────────────────────────────────────────────────────

/// The server peer, or `null` when it is not in the current directory.
pub async fn handle_server(State(state): State<ApiState>) -> Json<Option<PeerRecord>> {
    Json(state.session.server_peer().await)
}
