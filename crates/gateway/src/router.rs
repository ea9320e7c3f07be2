//! Event fan-out from the storage collaborator (and the call relay) to live
//! sessions.
//!
//! Delivery enqueues onto each target session's bounded queue while the
//! registry lock is held, so the order in which events are accepted here is
//! the order every member of a room observes them. A session whose queue is
//! full is evicted instead of silently skipping events; its client reconnects
//! and resynchronizes.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use shared::{
    domain::{ConversationId, Room, SessionId, UserId},
    protocol::{DeliveryReport, EchoPolicy, PublishRequest, ServerEvent, Target},
};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::{
    directory::ConversationDirectory,
    registry::{ClosedSession, Outbound, PresenceRegistry},
};

#[derive(Clone)]
pub struct EventRouter {
    registry: Arc<Mutex<PresenceRegistry>>,
    directory: Arc<dyn ConversationDirectory>,
}

impl EventRouter {
    pub fn new(directory: Arc<dyn ConversationDirectory>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(PresenceRegistry::new())),
            directory,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PresenceRegistry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn connect(&self, user_id: UserId, outbound: Outbound) -> SessionId {
        self.lock().register(user_id, outbound)
    }

    pub fn disconnect(&self, session_id: SessionId) -> Option<ClosedSession> {
        self.lock().on_disconnect(session_id)
    }

    pub fn join_room(&self, session_id: SessionId, room: Room) -> bool {
        self.lock().join_room(session_id, room)
    }

    pub fn leave_room(&self, session_id: SessionId, room: Room) -> bool {
        self.lock().leave_room(session_id, room)
    }

    /// `(online, session_count)` for a user.
    pub fn presence(&self, user_id: UserId) -> (bool, usize) {
        let registry = self.lock();
        let sessions = registry.sessions_for_user(user_id).len();
        (sessions > 0, sessions)
    }

    pub fn room_members(&self, room: Room) -> Vec<SessionId> {
        self.lock().room_members(room)
    }

    /// Removes sessions of users outside `members` from the conversation room.
    pub fn prune_conversation_room(
        &self,
        conversation_id: ConversationId,
        members: &[UserId],
    ) -> usize {
        let room = Room::Conversation(conversation_id);
        let mut registry = self.lock();
        let strangers: Vec<SessionId> = registry
            .room_members(room)
            .into_iter()
            .filter(|session| {
                !registry
                    .user_of(*session)
                    .is_some_and(|user_id| members.contains(&user_id))
            })
            .collect();
        for session_id in &strangers {
            registry.leave_room(*session_id, room);
        }
        strangers.len()
    }

    pub fn rooms_containing(&self, session_id: SessionId) -> usize {
        self.lock().rooms_containing(session_id)
    }

    pub async fn conversation_members(
        &self,
        conversation_id: ConversationId,
    ) -> Option<Vec<UserId>> {
        match self.directory.members(conversation_id).await {
            Ok(members) => members,
            Err(error) => {
                warn!(
                    conversation_id = conversation_id.0,
                    %error,
                    "conversation directory lookup failed"
                );
                None
            }
        }
    }

    pub async fn publish(&self, request: PublishRequest) -> DeliveryReport {
        let PublishRequest {
            target,
            event,
            origin_session,
            echo,
        } = request;

        let member_users = match target {
            Target::Conversation(conversation_id) => {
                self.conversation_members(conversation_id).await
            }
            _ => None,
        };

        let name = event.name();
        let mut registry = self.lock();
        let mut targets: BTreeSet<SessionId> = match target {
            Target::User(user_id) => registry.sessions_for_user(user_id).into_iter().collect(),
            Target::Room(room) => registry.room_members(room).into_iter().collect(),
            Target::Conversation(conversation_id) => {
                let room = registry.room_members(Room::Conversation(conversation_id));
                let mut sessions: BTreeSet<SessionId> = match &member_users {
                    // Room sessions of users dropped from the conversation get nothing.
                    Some(members) => room
                        .into_iter()
                        .filter(|session| {
                            registry
                                .user_of(*session)
                                .is_some_and(|user_id| members.contains(&user_id))
                        })
                        .collect(),
                    None => room.into_iter().collect(),
                };
                for user_id in member_users.iter().flatten() {
                    sessions.extend(registry.sessions_for_user(*user_id));
                }
                sessions
            }
        };
        if echo == EchoPolicy::ExcludeOrigin {
            if let Some(origin) = origin_session {
                targets.remove(&origin);
            }
        }

        let report = deliver_locked(&mut registry, targets, Arc::new(event));
        debug!(
            event = name,
            ?target,
            delivered = report.delivered,
            evicted = report.evicted,
            "published event"
        );
        report
    }

    pub fn send_to_session(&self, session_id: SessionId, event: ServerEvent) -> bool {
        let mut registry = self.lock();
        deliver_locked(&mut registry, [session_id], Arc::new(event)).delivered == 1
    }

    pub fn send_to_room(
        &self,
        room: Room,
        event: ServerEvent,
        except: Option<SessionId>,
    ) -> DeliveryReport {
        let mut registry = self.lock();
        let targets = registry
            .room_members(room)
            .into_iter()
            .filter(|session| Some(*session) != except);
        deliver_locked(&mut registry, targets, Arc::new(event))
    }

    /// Every session of `user_id` other than `except`.
    pub fn send_to_user_except(
        &self,
        user_id: UserId,
        except: SessionId,
        event: ServerEvent,
    ) -> DeliveryReport {
        let mut registry = self.lock();
        let targets: Vec<SessionId> = registry
            .sessions_for_user(user_id)
            .into_iter()
            .filter(|session| *session != except)
            .collect();
        deliver_locked(&mut registry, targets, Arc::new(event))
    }

    pub fn send_to_users(&self, users: &[UserId], event: ServerEvent) -> DeliveryReport {
        let mut registry = self.lock();
        let targets: BTreeSet<SessionId> = users
            .iter()
            .flat_map(|user_id| registry.sessions_for_user(*user_id))
            .collect();
        deliver_locked(&mut registry, targets, Arc::new(event))
    }
}

fn deliver_locked(
    registry: &mut PresenceRegistry,
    targets: impl IntoIterator<Item = SessionId>,
    event: Arc<ServerEvent>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    let mut evicted = Vec::new();

    for session_id in targets {
        let Some(outbound) = registry.outbound(session_id) else {
            continue;
        };
        match outbound.try_send(Arc::clone(&event)) {
            Ok(()) => report.delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(%session_id, event = event.name(), "session queue full; evicting");
                evicted.push(session_id);
            }
            Err(TrySendError::Closed(_)) => evicted.push(session_id),
        }
    }

    for session_id in evicted {
        if registry.on_disconnect(session_id).is_some() {
            report.evicted += 1;
        }
    }
    report
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
