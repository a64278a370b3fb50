//! /peers and /ping handlers.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use misty_net::{PeerRecord, PingResult};

use super::ApiState;

// ── /peers ───────────────────────────────────────────────────────────────────

pub async fn handle_peers(State(state): State<ApiState>) -> Json<Vec<PeerRecord>> {
    Json(state.session.peers().await)
}

// ── /ping ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct PingQuery {
    #[serde(default)]
    pub hostname: String,
}

pub async fn handle_ping(
    State(state): State<ApiState>,
    Query(query): Query<PingQuery>,
) -> Result<Json<PingResult>, (StatusCode, String)> {
    if query.hostname.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "hostname parameter is required".to_string(),
        ));
    }
    Ok(Json(state.session.ping_peer(&query.hostname).await))
}
