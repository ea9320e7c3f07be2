use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use shared::{
    domain::{ConversationId, Room, SessionId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{ClientRequest, ServerEvent},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{auth::verify_session_token, AppState};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> Result<Response, (StatusCode, Json<ApiError>)> {
    let user_id = verify_session_token(&state.auth_secret, &q.token).map_err(|error| {
        debug!(%error, "rejected channel upgrade");
        (
            StatusCode::UNAUTHORIZED,
            Json(ApiError::unauthorized("invalid session token")),
        )
    })?;
    Ok(ws
        .on_upgrade(move |socket| ws_connection(state, socket, user_id))
        .into_response())
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.session_queue_capacity);
    let session_id = state.router.connect(user_id, outbound_tx);
    info!(%session_id, user_id = user_id.0, "session opened");

    let mut send_task = tokio::spawn(async move {
        let mut outbound = ReceiverStream::new(outbound_rx);
        while let Some(event) = outbound.next().await {
            let text = match serde_json::to_string(event.as_ref()) {
                Ok(v) => v,
                Err(error) => {
                    warn!(%error, event = event.name(), "failed to encode server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        // Queue closed: the router evicted this session.
        let _ = sender.send(Message::Close(None)).await;
    });

    let recv_state = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_frame(&recv_state, session_id, user_id, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.calls.on_disconnect(session_id, user_id);
    let rooms = state
        .router
        .disconnect(session_id)
        .map(|closed| closed.rooms.len())
        .unwrap_or_default();
    info!(%session_id, user_id = user_id.0, rooms, "session closed");
}

async fn handle_frame(state: &AppState, session_id: SessionId, user_id: UserId, text: &str) {
    let request = match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => request,
        Err(error) => {
            warn!(%session_id, %error, "ignoring malformed client frame");
            reply_error(state, session_id, ApiError::validation("malformed request"));
            return;
        }
    };
    debug!(%session_id, request = request.name(), "client request");

    if let Err(error) = dispatch(state, session_id, user_id, request).await {
        debug!(%session_id, %error, "client request rejected");
        reply_error(state, session_id, error);
    }
}

async fn dispatch(
    state: &AppState,
    session_id: SessionId,
    user_id: UserId,
    request: ClientRequest,
) -> Result<(), ApiError> {
    match request {
        ClientRequest::JoinPost(post_id) => {
            state.router.join_room(session_id, Room::Post(post_id));
        }
        ClientRequest::LeavePost(post_id) => {
            state.router.leave_room(session_id, Room::Post(post_id));
        }
        ClientRequest::JoinConversation(conversation_id) => {
            ensure_conversation_member(state, conversation_id, user_id).await?;
            state
                .router
                .join_room(session_id, Room::Conversation(conversation_id));
        }
        ClientRequest::LeaveConversation(conversation_id) => {
            state
                .router
                .leave_room(session_id, Room::Conversation(conversation_id));
        }
        ClientRequest::CallStart(start) => {
            state.calls.start(session_id, user_id, start).await?;
        }
        ClientRequest::CallAnswer(call) => {
            state.calls.answer(session_id, user_id, call.room_id)?;
        }
        ClientRequest::CallRefuse(call) => {
            state.calls.refuse(session_id, user_id, call.room_id, false)?;
        }
        ClientRequest::CallBusy(call) => {
            state.calls.refuse(session_id, user_id, call.room_id, true)?;
        }
        ClientRequest::CallEnd(call) => {
            state.calls.end(session_id, user_id, call.room_id)?;
        }
    }
    Ok(())
}

/// Membership is only enforced for conversations the directory knows about.
async fn ensure_conversation_member(
    state: &AppState,
    conversation_id: ConversationId,
    user_id: UserId,
) -> Result<(), ApiError> {
    match state.router.conversation_members(conversation_id).await {
        Some(members) if !members.contains(&user_id) => Err(ApiError::new(
            ErrorCode::Forbidden,
            "not a conversation member",
        )),
        _ => Ok(()),
    }
}

fn reply_error(state: &AppState, session_id: SessionId, error: ApiError) {
    state
        .router
        .send_to_session(session_id, ServerEvent::Error(error));
}
