//! Local call slot: `Idle -> RingingOut | RingingIn -> Connected -> Idle`.
//!
//! Only one call may be outside `Idle`. An incoming ring while the slot is
//! taken is answered with `call:busy` on the spot and changes nothing.

use std::collections::BTreeSet;

use shared::{
    domain::{CallId, ConversationId, ConversationKind, UserId, UserSummary},
    protocol::{CallRoomRef, CallSignal, CallStartRequest, ClientRequest},
};
use tracing::{debug, info};

use crate::{error::CallError, store::Effect};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPhase {
    Idle,
    /// Waiting for our media token.
    RingingOut { signal: CallSignal },
    RingingIn { signal: CallSignal, answered: bool },
    Connected {
        signal: CallSignal,
        participants: BTreeSet<UserId>,
    },
}

impl CallPhase {
    pub fn room_id(&self) -> Option<CallId> {
        match self {
            CallPhase::Idle => None,
            CallPhase::RingingOut { signal }
            | CallPhase::RingingIn { signal, .. }
            | CallPhase::Connected { signal, .. } => Some(signal.room_id),
        }
    }
}

#[derive(Debug)]
pub struct CallCoordinator {
    me: UserId,
    phase: CallPhase,
}

impl CallCoordinator {
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            phase: CallPhase::Idle,
        }
    }

    pub fn phase(&self) -> &CallPhase {
        &self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == CallPhase::Idle
    }

    fn is_current(&self, room_id: CallId) -> bool {
        self.phase.room_id() == Some(room_id)
    }

    pub fn start(
        &mut self,
        caller: UserSummary,
        conversation_id: ConversationId,
        conversation_type: ConversationKind,
        conversation_name: String,
    ) -> Result<Vec<Effect>, CallError> {
        if !self.is_idle() {
            return Err(CallError::Busy);
        }
        let signal = CallSignal {
            room_id: CallId::new(),
            token: None,
            conversation_id,
            conversation_type,
            caller_info: caller,
            conversation_name,
            participant: None,
        };
        let request = ClientRequest::CallStart(CallStartRequest {
            room_id: signal.room_id,
            conversation_id,
            conversation_type,
            conversation_name: signal.conversation_name.clone(),
            caller_info: signal.caller_info.clone(),
        });
        info!(call_id = %signal.room_id, conversation_id = conversation_id.0, "calling");
        self.phase = CallPhase::RingingOut { signal };
        Ok(vec![Effect::Send(request)])
    }

    pub fn on_incoming(&mut self, signal: &CallSignal) -> Vec<Effect> {
        if self.is_current(signal.room_id) {
            return Vec::new();
        }
        if !self.is_idle() {
            info!(call_id = %signal.room_id, "declining ring as busy");
            return vec![Effect::Send(ClientRequest::CallBusy(CallRoomRef {
                room_id: signal.room_id,
            }))];
        }
        self.phase = CallPhase::RingingIn {
            signal: signal.clone(),
            answered: false,
        };
        Vec::new()
    }

    pub fn answer(&mut self) -> Result<Vec<Effect>, CallError> {
        let CallPhase::RingingIn { signal, answered } = &mut self.phase else {
            return Err(CallError::NotRinging);
        };
        if *answered {
            return Ok(Vec::new());
        }
        *answered = true;
        Ok(vec![Effect::Send(ClientRequest::CallAnswer(CallRoomRef {
            room_id: signal.room_id,
        }))])
    }

    /// Private calls tell the caller; group calls just stop ringing here.
    pub fn decline(&mut self) -> Result<Vec<Effect>, CallError> {
        let CallPhase::RingingIn { signal, .. } = &self.phase else {
            return Err(CallError::NotRinging);
        };
        let effects = match signal.conversation_type {
            ConversationKind::Private => vec![Effect::Send(ClientRequest::CallRefuse(CallRoomRef {
                room_id: signal.room_id,
            }))],
            ConversationKind::Group => Vec::new(),
        };
        self.phase = CallPhase::Idle;
        Ok(effects)
    }

    /// Token delivery for our own seat in the call.
    pub fn on_join(&mut self, signal: &CallSignal) -> Vec<Effect> {
        if !self.is_current(signal.room_id) {
            debug!(call_id = %signal.room_id, "token for a call we are not in");
            return Vec::new();
        }
        let Some(token) = signal.token.clone() else {
            return Vec::new();
        };
        let ready = match &self.phase {
            CallPhase::RingingOut { .. } => true,
            CallPhase::RingingIn { answered, .. } => *answered,
            _ => false,
        };
        if !ready {
            return Vec::new();
        }
        let mut participants = BTreeSet::from([self.me]);
        if let Some(participant) = signal.participant {
            participants.insert(participant);
        }
        self.phase = CallPhase::Connected {
            signal: signal.clone(),
            participants,
        };
        vec![Effect::OpenMediaRoom {
            room: signal.room_id,
            token,
        }]
    }

    pub fn on_answer(&mut self, signal: &CallSignal) -> Vec<Effect> {
        let current = self.phase.room_id();
        if let CallPhase::Connected { participants, .. } = &mut self.phase {
            if current == Some(signal.room_id) {
                if let Some(participant) = signal.participant {
                    participants.insert(participant);
                }
            }
        }
        Vec::new()
    }

    /// `call:refuse` or `call:busy` for a call we placed.
    pub fn on_declined(&mut self, signal: &CallSignal, busy: bool) -> Vec<Effect> {
        if !self.is_current(signal.room_id) {
            return Vec::new();
        }
        let who = match signal.conversation_type {
            ConversationKind::Private => signal.conversation_name.clone(),
            ConversationKind::Group => "A member".to_string(),
        };
        let toast = if busy {
            Effect::Toast(format!("{who} is busy"))
        } else {
            Effect::Toast(format!("{who} declined the call"))
        };
        if signal.conversation_type == ConversationKind::Private
            && matches!(self.phase, CallPhase::RingingOut { .. })
        {
            self.phase = CallPhase::Idle;
        }
        vec![toast]
    }

    pub fn on_end(&mut self, signal: &CallSignal) -> Vec<Effect> {
        if !self.is_current(signal.room_id) {
            return Vec::new();
        }
        let was_connected = matches!(self.phase, CallPhase::Connected { .. });
        self.phase = CallPhase::Idle;
        info!(call_id = %signal.room_id, "call ended remotely");
        if was_connected {
            vec![Effect::CloseMediaRoom]
        } else {
            Vec::new()
        }
    }

    /// Drops the local slot without signaling. The gateway already ended the
    /// call when the old session went away.
    pub fn reset(&mut self) -> Vec<Effect> {
        let was_connected = matches!(self.phase, CallPhase::Connected { .. });
        self.phase = CallPhase::Idle;
        if was_connected {
            vec![Effect::CloseMediaRoom]
        } else {
            Vec::new()
        }
    }

    /// Local hang-up, including cancelling an unanswered outgoing call.
    pub fn hang_up(&mut self) -> Result<Vec<Effect>, CallError> {
        if matches!(self.phase, CallPhase::RingingIn { .. }) {
            return self.decline();
        }
        let Some(room_id) = self.phase.room_id() else {
            return Err(CallError::NoActiveCall);
        };
        let was_connected = matches!(self.phase, CallPhase::Connected { .. });
        self.phase = CallPhase::Idle;
        let mut effects = vec![Effect::Send(ClientRequest::CallEnd(CallRoomRef { room_id }))];
        if was_connected {
            effects.push(Effect::CloseMediaRoom);
        }
        Ok(effects)
    }
}

#[cfg(test)]
#[path = "tests/call_tests.rs"]
mod tests;
