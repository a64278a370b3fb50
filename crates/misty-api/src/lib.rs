//! misty-api: HTTP JSON surface over a running session.

pub mod handlers;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// All routes, nested under `/api`, with permissive CORS for the desktop client.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/hello", get(handlers::handle_hello))
        .route("/auth", get(handlers::handle_auth))
        .route("/peers", get(handlers::handle_peers))
        .route("/server", get(handlers::handle_server))
        .route("/ping", get(handlers::handle_ping))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    serve_on(listener, state).await
}

/// Serve on an already bound listener.
pub async fn serve_on(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}
