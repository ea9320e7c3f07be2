//! Reconciled client state.
//!
//! [`ClientStore::apply`] folds one server event at a time into the store and
//! returns the side effects the caller must perform. It never does I/O, so
//! every merge rule can be exercised directly.

pub mod bubbles;
pub mod notifications;
pub mod posts;
pub mod reactions;

use shared::{
    domain::{CallId, ConversationId, PostId, Room, UserId, UserSummary},
    protocol::{ClientRequest, ServerEvent},
};
use tracing::{debug, warn};

use crate::call::CallCoordinator;

pub use bubbles::{Bubble, BubbleKey, BubbleSet, ChatMessage, OpenBubble};
pub use notifications::{NotificationItem, NotificationList};
pub use posts::{PostThread, PostThreads};
pub use reactions::{ReactionEntry, ReactionSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(ClientRequest),
    /// Read receipt for everything shown in the conversation.
    MarkRead(ConversationId),
    Toast(String),
    RedirectToAuth,
    OpenMediaRoom { room: CallId, token: String },
    CloseMediaRoom,
}

#[derive(Debug)]
pub struct ClientStore {
    me: UserSummary,
    pub bubbles: BubbleSet,
    pub posts: PostThreads,
    pub notifications: NotificationList,
    pub call: CallCoordinator,
    locked: bool,
}

impl ClientStore {
    pub fn new(me: UserSummary) -> Self {
        Self {
            call: CallCoordinator::new(me.user_id),
            me,
            bubbles: BubbleSet::new(),
            posts: PostThreads::new(),
            notifications: NotificationList::new(),
            locked: false,
        }
    }

    pub fn me(&self) -> &UserSummary {
        &self.me
    }

    pub fn user_id(&self) -> UserId {
        self.me.user_id
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Rooms this client should be in: open conversations and viewed posts.
    pub fn tracked_rooms(&self) -> Vec<Room> {
        let conversations = self
            .bubbles
            .iter()
            .filter_map(|bubble| bubble.conversation_id)
            .map(Room::Conversation);
        let posts = self.posts.post_ids().map(Room::Post);
        conversations.chain(posts).collect()
    }

    pub fn is_viewing_post(&self, post_id: PostId) -> bool {
        self.posts.get(post_id).is_some()
    }

    pub fn apply(&mut self, event: &ServerEvent) -> Vec<Effect> {
        let me = self.me.user_id;
        match event {
            ServerEvent::NewMessage(payload) => {
                self.bubbles.merge_incoming(me, payload);
                Vec::new()
            }
            ServerEvent::ReactToMessage(payload) => {
                self.bubbles.apply_reaction(payload);
                Vec::new()
            }
            ServerEvent::NewFriendRequest(payload) => {
                self.notifications.push_friend_request(payload);
                Vec::new()
            }
            ServerEvent::ReactToPost(payload) | ServerEvent::UpdateReactToPost(payload) => {
                self.posts.apply_post_reaction(payload, false);
                Vec::new()
            }
            ServerEvent::DeleteReactToPost(payload) => {
                self.posts.apply_post_reaction(payload, true);
                Vec::new()
            }
            ServerEvent::ReactToComment(payload) | ServerEvent::UpdateReactToComment(payload) => {
                self.posts.apply_comment_reaction(payload, false);
                Vec::new()
            }
            ServerEvent::DeleteReactToComment(payload) => {
                self.posts.apply_comment_reaction(payload, true);
                Vec::new()
            }
            ServerEvent::NewComment(payload) | ServerEvent::NewReply(payload) => {
                self.posts.add_comment(payload);
                Vec::new()
            }
            ServerEvent::GroupMembershipChanged(payload) => {
                if self.bubbles.apply_membership(me, payload) {
                    vec![
                        Effect::Send(ClientRequest::LeaveConversation(payload.conversation_id)),
                        Effect::Toast("You were removed from a group conversation".into()),
                    ]
                } else {
                    Vec::new()
                }
            }
            ServerEvent::CallIncoming(signal) => self.call.on_incoming(signal),
            ServerEvent::CallJoin(signal) => self.call.on_join(signal),
            ServerEvent::CallAnswer(signal) => self.call.on_answer(signal),
            ServerEvent::CallRefuse(signal) => self.call.on_declined(signal, false),
            ServerEvent::CallBusy(signal) => self.call.on_declined(signal, true),
            ServerEvent::CallEnd(signal) => self.call.on_end(signal),
            ServerEvent::AccountLocked(payload) => {
                self.locked = true;
                let mut effects = Vec::new();
                if !self.call.is_idle() {
                    if let Ok(hang_up) = self.call.hang_up() {
                        effects.extend(hang_up);
                    }
                }
                effects.push(Effect::Toast(payload.message.clone()));
                effects.push(Effect::RedirectToAuth);
                effects
            }
            ServerEvent::Error(error) => {
                if error.requires_reauth() {
                    warn!(%error, "gateway requires re-authentication");
                    vec![Effect::Toast(error.message.clone()), Effect::RedirectToAuth]
                } else {
                    debug!(%error, "gateway rejected a request");
                    vec![Effect::Toast(error.message.clone())]
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
