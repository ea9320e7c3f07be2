//! HTTP surface used by the storage collaborator.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ConversationId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{DeliveryReport, PublishRequest},
};
use tracing::{info, warn};

use crate::AppState;

pub const PUBLISH_KEY_HEADER: &str = "x-gateway-key";

#[derive(Debug, Deserialize, Serialize)]
pub struct ConversationMembersRequest {
    pub members: Vec<UserId>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub online: bool,
    pub sessions: usize,
}

pub async fn healthz() -> &'static str {
    "ok"
}

fn ensure_publisher(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ApiError>)> {
    let Some(expected) = state.publish_key.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(PUBLISH_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    if provided == Some(expected) {
        return Ok(());
    }
    warn!("rejected collaborator request with missing or wrong gateway key");
    Err((
        StatusCode::UNAUTHORIZED,
        Json(ApiError::unauthorized("missing or invalid gateway key")),
    ))
}

pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PublishRequest>,
) -> Result<Json<DeliveryReport>, (StatusCode, Json<ApiError>)> {
    ensure_publisher(&state, &headers)?;
    let report = state.router.publish(request).await;
    Ok(Json(report))
}

pub async fn put_conversation_members(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<i64>,
    headers: HeaderMap,
    Json(request): Json<ConversationMembersRequest>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    ensure_publisher(&state, &headers)?;
    if request.members.len() > 10_000 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, "too many members")),
        ));
    }
    let conversation_id = ConversationId(conversation_id);
    state
        .directory
        .set_members(conversation_id, request.members.clone())
        .await;
    let pruned = state
        .router
        .prune_conversation_room(conversation_id, &request.members);
    if pruned > 0 {
        info!(
            conversation_id = conversation_id.0,
            pruned, "removed former members from the conversation room"
        );
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn presence(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> Json<PresenceResponse> {
    let (online, sessions) = state.router.presence(UserId(user_id));
    Json(PresenceResponse {
        user_id: UserId(user_id),
        online,
        sessions,
    })
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
