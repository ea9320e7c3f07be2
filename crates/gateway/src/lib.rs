//! Real-time gateway: one WebSocket session per connected client, room
//! membership, per-room ordered fan-out of collaborator events, and call
//! signaling relay.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

pub mod api;
pub mod app_state;
pub mod auth;
pub mod calls;
pub mod config;
pub mod directory;
pub mod registry;
pub mod router;
pub mod ws;

pub use app_state::AppState;

pub fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/events", post(api::publish_event))
        .route(
            "/conversations/:conversation_id/members",
            put(api::put_conversation_members),
        )
        .route("/presence/:user_id", get(api::presence))
        .route("/ws", get(ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}
