//! Server half of call signaling: ring, answer, refuse/busy, end.
//!
//! Each call owns a `call:<id>` room. Callees are rung by user id, so every
//! session of a callee sees `call:incoming`; the first one to answer joins
//! the room and receives a media token through `call:join`. The user's other
//! sessions get `call:end` once one of them answers or refuses.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use call_tokens::{mint_token, room_name_for_call, CallTokenConfig};
use shared::{
    domain::{CallId, ConversationKind, Room, SessionId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{CallSignal, CallStartRequest, ServerEvent},
};
use tracing::{debug, info, warn};

use crate::router::EventRouter;

struct ActiveCall {
    signal: CallSignal,
    caller_session: SessionId,
    caller_token_sent: bool,
    participants: BTreeSet<SessionId>,
    ringing: BTreeSet<UserId>,
}

impl ActiveCall {
    fn is_private(&self) -> bool {
        self.signal.conversation_type == ConversationKind::Private
    }

    fn room(&self) -> Room {
        Room::Call(self.signal.room_id)
    }

    fn signal_from(&self, participant: Option<UserId>) -> CallSignal {
        CallSignal {
            participant,
            ..self.signal.clone()
        }
    }
}

pub struct CallRelay {
    router: EventRouter,
    tokens: CallTokenConfig,
    calls: Mutex<HashMap<CallId, ActiveCall>>,
}

impl CallRelay {
    pub fn new(router: EventRouter, tokens: CallTokenConfig) -> Self {
        Self {
            router,
            tokens,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CallId, ActiveCall>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_calls(&self) -> usize {
        self.lock().len()
    }

    fn token_signal(&self, call: &ActiveCall, user_id: UserId) -> Result<CallSignal, ApiError> {
        let room_name = room_name_for_call(call.signal.room_id);
        let token = mint_token(&self.tokens, user_id, &room_name).map_err(|e| {
            ApiError::new(ErrorCode::Internal, format!("call token mint failed: {e}"))
        })?;
        Ok(CallSignal {
            token: Some(token),
            ..call.signal.clone()
        })
    }

    pub async fn start(
        &self,
        session_id: SessionId,
        user_id: UserId,
        request: CallStartRequest,
    ) -> Result<CallId, ApiError> {
        let members = self
            .router
            .conversation_members(request.conversation_id)
            .await
            .ok_or_else(|| ApiError::not_found("conversation not found"))?;
        if !members.contains(&user_id) {
            return Err(ApiError::new(
                ErrorCode::Forbidden,
                "caller is not a conversation member",
            ));
        }
        let callees: Vec<UserId> = members.into_iter().filter(|id| *id != user_id).collect();
        if callees.is_empty() {
            return Err(ApiError::validation("conversation has nobody else to call"));
        }

        let room_id = request.room_id;
        if self.lock().contains_key(&room_id) {
            return Err(ApiError::validation("call room already in use"));
        }
        let mut caller_info = request.caller_info;
        caller_info.user_id = user_id;
        let mut call = ActiveCall {
            signal: CallSignal {
                room_id,
                token: None,
                conversation_id: request.conversation_id,
                conversation_type: request.conversation_type,
                caller_info,
                conversation_name: request.conversation_name,
                participant: None,
            },
            caller_session: session_id,
            caller_token_sent: false,
            participants: BTreeSet::from([session_id]),
            ringing: callees.iter().copied().collect(),
        };

        // Group calls open the media room for the caller right away.
        if !call.is_private() {
            let join = self.token_signal(&call, user_id)?;
            call.caller_token_sent = true;
            self.router
                .send_to_session(session_id, ServerEvent::CallJoin(join));
        }

        self.router.join_room(session_id, call.room());
        let report = self
            .router
            .send_to_users(&callees, ServerEvent::CallIncoming(call.signal.clone()));
        info!(
            call_id = %room_id,
            caller = user_id.0,
            rung_sessions = report.delivered,
            "call started"
        );
        self.lock().insert(room_id, call);
        Ok(room_id)
    }

    pub fn answer(
        &self,
        session_id: SessionId,
        user_id: UserId,
        room_id: CallId,
    ) -> Result<(), ApiError> {
        let mut calls = self.lock();
        let call = calls
            .get_mut(&room_id)
            .ok_or_else(|| ApiError::not_found("call not found"))?;
        if !call.ringing.remove(&user_id) {
            return Err(ApiError::new(
                ErrorCode::Forbidden,
                "user is not being rung for this call",
            ));
        }

        call.participants.insert(session_id);
        self.router.join_room(session_id, call.room());
        let join = self.token_signal(call, user_id)?;
        self.router.send_to_session(session_id, ServerEvent::CallJoin(join));

        if !call.caller_token_sent {
            let caller_id = call.signal.caller_info.user_id;
            let caller_join = self.token_signal(call, caller_id)?;
            call.caller_token_sent = true;
            self.router
                .send_to_session(call.caller_session, ServerEvent::CallJoin(caller_join));
        }

        self.router.send_to_room(
            call.room(),
            ServerEvent::CallAnswer(call.signal_from(Some(user_id))),
            Some(session_id),
        );
        self.stop_ringing_elsewhere(call, user_id, session_id);
        Ok(())
    }

    /// Callee declined (`busy == false`) or was already in another call.
    pub fn refuse(
        &self,
        session_id: SessionId,
        user_id: UserId,
        room_id: CallId,
        busy: bool,
    ) -> Result<(), ApiError> {
        let mut calls = self.lock();
        let call = calls
            .get_mut(&room_id)
            .ok_or_else(|| ApiError::not_found("call not found"))?;
        if !call.ringing.remove(&user_id) {
            return Ok(());
        }

        let signal = call.signal_from(Some(user_id));
        let event = if busy {
            ServerEvent::CallBusy(signal)
        } else {
            ServerEvent::CallRefuse(signal)
        };
        self.router.send_to_session(call.caller_session, event);
        self.stop_ringing_elsewhere(call, user_id, session_id);

        if call.is_private() {
            if let Some(call) = calls.remove(&room_id) {
                self.tear_down(call);
            }
        }
        Ok(())
    }

    pub fn end(
        &self,
        session_id: SessionId,
        user_id: UserId,
        room_id: CallId,
    ) -> Result<(), ApiError> {
        let mut calls = self.lock();
        let call = calls
            .get_mut(&room_id)
            .ok_or_else(|| ApiError::not_found("call not found"))?;
        if !call.participants.contains(&session_id) {
            return Err(ApiError::new(ErrorCode::Forbidden, "not a call participant"));
        }

        if call.is_private() {
            if let Some(call) = calls.remove(&room_id) {
                self.router.send_to_room(
                    call.room(),
                    ServerEvent::CallEnd(call.signal_from(Some(user_id))),
                    Some(session_id),
                );
                self.tear_down(call);
            }
            return Ok(());
        }

        call.participants.remove(&session_id);
        self.router.leave_room(session_id, call.room());
        if call.participants.is_empty() {
            if let Some(call) = calls.remove(&room_id) {
                self.tear_down(call);
            }
        }
        Ok(())
    }

    /// Ends or leaves every call the closing session took part in.
    pub fn on_disconnect(&self, session_id: SessionId, user_id: UserId) {
        let joined: Vec<CallId> = self
            .lock()
            .iter()
            .filter(|(_, call)| call.participants.contains(&session_id))
            .map(|(id, _)| *id)
            .collect();
        for room_id in joined {
            if let Err(error) = self.end(session_id, user_id, room_id) {
                warn!(call_id = %room_id, %error, "failed to end call on disconnect");
            }
        }
    }

    fn stop_ringing_elsewhere(&self, call: &ActiveCall, user_id: UserId, session_id: SessionId) {
        let report = self.router.send_to_user_except(
            user_id,
            session_id,
            ServerEvent::CallEnd(call.signal_from(Some(user_id))),
        );
        if report.delivered > 0 {
            debug!(
                call_id = %call.signal.room_id,
                sessions = report.delivered,
                "stopped ringing on other sessions"
            );
        }
    }

    /// Stops ringing anyone still rung and empties the call room.
    fn tear_down(&self, call: ActiveCall) {
        if !call.ringing.is_empty() {
            let ringing: Vec<UserId> = call.ringing.iter().copied().collect();
            self.router
                .send_to_users(&ringing, ServerEvent::CallEnd(call.signal_from(None)));
        }
        for session_id in &call.participants {
            self.router.leave_room(*session_id, call.room());
        }
        info!(call_id = %call.signal.room_id, "call ended");
    }
}

#[cfg(test)]
#[path = "tests/calls_tests.rs"]
mod tests;
