//! BMS realtime relay.
//!
//! Accepts authenticated WebSocket clients on `/main`, `/admin` and `/pos`,
//! tracks which rooms each socket has joined, and fans out events published
//! over HTTP to every socket in the target room.

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use state::{AppState, RoomHub};

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/api/{namespace}/rooms/{room}/events", post(routes::publish_event))
        // WebSocket
        .route("/{namespace}", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the relay on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}
