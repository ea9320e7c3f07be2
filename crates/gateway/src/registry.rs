//! Presence & room membership for live sessions.
//!
//! Membership is purely runtime state. A session is indexed three ways
//! (by id, by user, by room) and every mutation updates all three together,
//! so callers hold the registry lock for the whole operation.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use shared::{
    domain::{Room, SessionId, UserId},
    protocol::ServerEvent,
};
use tokio::sync::mpsc;

pub type Outbound = mpsc::Sender<Arc<ServerEvent>>;

struct SessionEntry {
    user_id: UserId,
    rooms: BTreeSet<Room>,
    outbound: Outbound,
}

/// What was torn down when a session left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub rooms: Vec<Room>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    sessions: HashMap<SessionId, SessionEntry>,
    users: HashMap<UserId, BTreeSet<SessionId>>,
    rooms: HashMap<Room, BTreeSet<SessionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, user_id: UserId, outbound: Outbound) -> SessionId {
        let session_id = SessionId::new();
        self.sessions.insert(
            session_id,
            SessionEntry {
                user_id,
                rooms: BTreeSet::new(),
                outbound,
            },
        );
        self.users.entry(user_id).or_default().insert(session_id);
        session_id
    }

    /// Returns `false` when the session is unknown (already disconnected).
    pub fn join_room(&mut self, session_id: SessionId, room: Room) -> bool {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        entry.rooms.insert(room);
        self.rooms.entry(room).or_default().insert(session_id);
        true
    }

    pub fn leave_room(&mut self, session_id: SessionId, room: Room) -> bool {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        let was_member = entry.rooms.remove(&room);
        self.detach_from_room(session_id, room);
        was_member
    }

    pub fn on_disconnect(&mut self, session_id: SessionId) -> Option<ClosedSession> {
        let entry = self.sessions.remove(&session_id)?;
        for room in &entry.rooms {
            self.detach_from_room(session_id, *room);
        }
        if let Some(sessions) = self.users.get_mut(&entry.user_id) {
            sessions.remove(&session_id);
            if sessions.is_empty() {
                self.users.remove(&entry.user_id);
            }
        }
        Some(ClosedSession {
            session_id,
            user_id: entry.user_id,
            rooms: entry.rooms.into_iter().collect(),
        })
    }

    fn detach_from_room(&mut self, session_id: SessionId, room: Room) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&session_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }

    pub fn user_of(&self, session_id: SessionId) -> Option<UserId> {
        self.sessions.get(&session_id).map(|entry| entry.user_id)
    }

    pub fn sessions_for_user(&self, user_id: UserId) -> Vec<SessionId> {
        self.users
            .get(&user_id)
            .map(|sessions| sessions.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn room_members(&self, room: Room) -> Vec<SessionId> {
        self.rooms
            .get(&room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn rooms_of(&self, session_id: SessionId) -> Vec<Room> {
        self.sessions
            .get(&session_id)
            .map(|entry| entry.rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Counts rooms whose member set still mentions `session_id`.
    pub fn rooms_containing(&self, session_id: SessionId) -> usize {
        self.rooms
            .values()
            .filter(|members| members.contains(&session_id))
            .count()
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn outbound(&self, session_id: SessionId) -> Option<&Outbound> {
        self.sessions.get(&session_id).map(|entry| &entry.outbound)
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
