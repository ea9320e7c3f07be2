//! Open conversation bubbles.
//!
//! Invariants kept by [`BubbleSet`]:
//! - at most one bubble per conversation id or per private counterpart;
//! - at most [`MAX_OPEN`] bubbles are un-minimized, the least recently
//!   focused one is minimized to make room;
//! - `unread` only grows while a bubble is minimized and drops to zero the
//!   moment it is shown, which is also when a read receipt is due.

use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, ConversationKind, MessageId, MessageKind, UserId, UserSummary},
    protocol::{GroupMembershipPayload, MessageReactionPayload, NewMessagePayload},
};
use tracing::debug;

use super::{reactions::ReactionSet, Effect};

pub const MAX_OPEN: usize = 2;

/// How a caller names a bubble before or after its conversation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BubbleKey {
    Conversation(ConversationId),
    /// Private chat with a friend, possibly not yet created on the server.
    Friend(UserId),
}

#[derive(Debug, Clone)]
pub struct OpenBubble {
    pub conversation_id: Option<ConversationId>,
    pub kind: ConversationKind,
    pub counterpart: Option<UserSummary>,
    pub title: String,
    pub members: Vec<UserSummary>,
}

impl OpenBubble {
    pub fn private(friend: UserSummary, conversation_id: Option<ConversationId>) -> Self {
        Self {
            conversation_id,
            kind: ConversationKind::Private,
            title: friend.display_name(),
            counterpart: Some(friend),
            members: Vec::new(),
        }
    }

    pub fn group(
        conversation_id: ConversationId,
        title: impl Into<String>,
        members: Vec<UserSummary>,
    ) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            kind: ConversationKind::Group,
            counterpart: None,
            title: title.into(),
            members,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Set for messages composed on this client until confirmed.
    pub local_id: Option<u64>,
    pub message_id: Option<MessageId>,
    pub sender: UserSummary,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub reactions: ReactionSet,
    pub pending: bool,
}

impl ChatMessage {
    fn from_payload(payload: &NewMessagePayload) -> Self {
        Self {
            local_id: None,
            message_id: Some(payload.message_id),
            sender: payload.sender.clone(),
            kind: payload.message_type,
            content: payload.content.clone(),
            created_at: payload.created_at,
            reactions: ReactionSet::new(),
            pending: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bubble {
    pub conversation_id: Option<ConversationId>,
    pub kind: ConversationKind,
    pub counterpart: Option<UserSummary>,
    pub title: String,
    pub members: Vec<UserSummary>,
    pub minimized: bool,
    pub unread: u32,
    pub messages: Vec<ChatMessage>,
    last_focus: u64,
}

impl Bubble {
    pub fn matches(&self, key: BubbleKey) -> bool {
        match key {
            BubbleKey::Conversation(id) => self.conversation_id == Some(id),
            BubbleKey::Friend(user_id) => {
                self.kind == ConversationKind::Private
                    && self.counterpart.as_ref().map(|c| c.user_id) == Some(user_id)
            }
        }
    }

    pub fn key(&self) -> Option<BubbleKey> {
        match (self.conversation_id, &self.counterpart) {
            (Some(id), _) => Some(BubbleKey::Conversation(id)),
            (None, Some(friend)) => Some(BubbleKey::Friend(friend.user_id)),
            (None, None) => None,
        }
    }

    pub fn message(&self, message_id: MessageId) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .find(|message| message.message_id == Some(message_id))
    }

    fn message_mut(&mut self, message_id: MessageId) -> Option<&mut ChatMessage> {
        self.messages
            .iter_mut()
            .find(|message| message.message_id == Some(message_id))
    }

    fn sort_messages(&mut self) {
        self.messages.sort_by_key(|message| message.created_at);
    }
}

#[derive(Debug, Default)]
pub struct BubbleSet {
    /// Front of the vector is the most recently opened.
    bubbles: Vec<Bubble>,
    focus_clock: u64,
    next_local_id: u64,
}

impl BubbleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bubble> {
        self.bubbles.iter()
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    pub fn get(&self, key: BubbleKey) -> Option<&Bubble> {
        self.bubbles.iter().find(|bubble| bubble.matches(key))
    }

    fn position(&self, key: BubbleKey) -> Option<usize> {
        self.bubbles.iter().position(|bubble| bubble.matches(key))
    }

    fn position_of_conversation(&self, conversation_id: ConversationId) -> Option<usize> {
        self.position(BubbleKey::Conversation(conversation_id))
    }

    pub fn open_count(&self) -> usize {
        self.bubbles.iter().filter(|bubble| !bubble.minimized).count()
    }

    /// Opens a bubble or brings the existing one to the front, then focuses it.
    pub fn open(&mut self, request: OpenBubble) -> Vec<Effect> {
        let existing = request
            .conversation_id
            .and_then(|id| self.position(BubbleKey::Conversation(id)))
            .or_else(|| {
                request
                    .counterpart
                    .as_ref()
                    .filter(|_| request.kind == ConversationKind::Private)
                    .and_then(|friend| self.position(BubbleKey::Friend(friend.user_id)))
            });

        match existing {
            Some(index) => {
                let mut bubble = self.bubbles.remove(index);
                if bubble.conversation_id.is_none() {
                    bubble.conversation_id = request.conversation_id;
                }
                if !request.members.is_empty() {
                    bubble.members = request.members;
                }
                self.bubbles.insert(0, bubble);
            }
            None => self.bubbles.insert(
                0,
                Bubble {
                    conversation_id: request.conversation_id,
                    kind: request.kind,
                    counterpart: request.counterpart,
                    title: request.title,
                    members: request.members,
                    minimized: true,
                    unread: 0,
                    messages: Vec::new(),
                    last_focus: 0,
                },
            ),
        }
        self.focus_index(0)
    }

    pub fn focus(&mut self, key: BubbleKey) -> Vec<Effect> {
        match self.position(key) {
            Some(index) => self.focus_index(index),
            None => Vec::new(),
        }
    }

    fn focus_index(&mut self, index: usize) -> Vec<Effect> {
        self.focus_clock += 1;
        let clock = self.focus_clock;
        let mut effects = Vec::new();
        {
            let bubble = &mut self.bubbles[index];
            bubble.minimized = false;
            bubble.last_focus = clock;
            if bubble.unread > 0 {
                bubble.unread = 0;
                if let Some(id) = bubble.conversation_id {
                    effects.push(Effect::MarkRead(id));
                }
            }
        }

        while self.open_count() > MAX_OPEN {
            let Some(evict) = self
                .bubbles
                .iter_mut()
                .enumerate()
                .filter(|(i, bubble)| *i != index && !bubble.minimized)
                .min_by_key(|(_, bubble)| bubble.last_focus)
                .map(|(_, bubble)| bubble)
            else {
                break;
            };
            evict.minimized = true;
        }
        effects
    }

    pub fn minimize(&mut self, key: BubbleKey) -> bool {
        match self.bubbles.iter_mut().find(|bubble| bubble.matches(key)) {
            Some(bubble) => {
                bubble.minimized = true;
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self, key: BubbleKey) -> Option<Bubble> {
        let index = self.position(key)?;
        Some(self.bubbles.remove(index))
    }

    /// Records the id of a lazily created private conversation. Returns
    /// `false` when the bubble was closed in the meantime.
    pub fn assign_conversation(&mut self, friend: UserId, conversation_id: ConversationId) -> bool {
        match self
            .bubbles
            .iter_mut()
            .find(|bubble| bubble.matches(BubbleKey::Friend(friend)))
        {
            Some(bubble) => {
                bubble.conversation_id = Some(conversation_id);
                true
            }
            None => false,
        }
    }

    /// Optimistically appends a message composed locally. Returns its local id.
    pub fn push_local(
        &mut self,
        key: BubbleKey,
        sender: UserSummary,
        kind: MessageKind,
        content: String,
    ) -> Option<u64> {
        let index = self.position(key)?;
        self.next_local_id += 1;
        let local_id = self.next_local_id;
        self.bubbles[index].messages.push(ChatMessage {
            local_id: Some(local_id),
            message_id: None,
            sender,
            kind,
            content,
            created_at: Utc::now(),
            reactions: ReactionSet::new(),
            pending: true,
        });
        Some(local_id)
    }

    /// Binds a pending message to its persisted copy. If the echo already
    /// added the persisted message separately, the local copy is dropped.
    pub fn confirm_sent(&mut self, local_id: u64, persisted: &NewMessagePayload) {
        for bubble in &mut self.bubbles {
            let Some(local) = bubble
                .messages
                .iter()
                .position(|message| message.local_id == Some(local_id))
            else {
                continue;
            };
            let duplicate = bubble.messages.iter().enumerate().any(|(i, message)| {
                i != local && message.message_id == Some(persisted.message_id)
            });
            if duplicate {
                bubble.messages.remove(local);
            } else {
                let message = &mut bubble.messages[local];
                message.message_id = Some(persisted.message_id);
                message.created_at = persisted.created_at;
                message.pending = false;
            }
            return;
        }
        debug!(local_id, "confirmed message no longer has a bubble");
    }

    /// Removes a pending message whose persistence failed.
    pub fn rollback(&mut self, local_id: u64) -> bool {
        for bubble in &mut self.bubbles {
            if let Some(index) = bubble
                .messages
                .iter()
                .position(|message| message.local_id == Some(local_id) && message.pending)
            {
                bubble.messages.remove(index);
                return true;
            }
        }
        false
    }

    /// Idempotent merge of a live `newMessage`.
    pub fn merge_incoming(&mut self, me: UserId, payload: &NewMessagePayload) -> bool {
        let index = self.position_of_conversation(payload.conversation_id).or_else(|| {
            // A private bubble opened before its conversation existed. Only a
            // message known to be private may bind it.
            if payload.conversation_type != Some(ConversationKind::Private) {
                return None;
            }
            self.position(BubbleKey::Friend(payload.sender.user_id))
                .filter(|i| self.bubbles[*i].conversation_id.is_none())
        });
        let Some(index) = index else {
            debug!(
                conversation_id = payload.conversation_id.0,
                "message for a conversation without a bubble"
            );
            return false;
        };

        let bubble = &mut self.bubbles[index];
        if bubble.conversation_id.is_none() {
            bubble.conversation_id = Some(payload.conversation_id);
        }
        if bubble.message(payload.message_id).is_some() {
            return false;
        }

        let from_me = payload.sender.user_id == me;
        if from_me {
            // Echo that overtook the send confirmation.
            if let Some(pending) = bubble.messages.iter_mut().find(|message| {
                message.pending
                    && message.message_id.is_none()
                    && message.content == payload.content
            }) {
                pending.message_id = Some(payload.message_id);
                pending.pending = false;
                return true;
            }
        }

        bubble.messages.push(ChatMessage::from_payload(payload));
        if bubble.minimized && !from_me {
            bubble.unread += 1;
        }
        true
    }

    /// Merges a fetched history page without touching unread counts.
    pub fn merge_page(
        &mut self,
        conversation_id: ConversationId,
        page: &[NewMessagePayload],
    ) -> usize {
        self.merge_history(conversation_id, page, None)
    }

    /// Merges messages missed while disconnected. Those from others count as
    /// unread when the bubble is minimized, as if they had arrived live.
    pub fn merge_missed(
        &mut self,
        me: UserId,
        conversation_id: ConversationId,
        page: &[NewMessagePayload],
    ) -> usize {
        self.merge_history(conversation_id, page, Some(me))
    }

    fn merge_history(
        &mut self,
        conversation_id: ConversationId,
        page: &[NewMessagePayload],
        count_unread_for: Option<UserId>,
    ) -> usize {
        let Some(index) = self.position_of_conversation(conversation_id) else {
            return 0;
        };
        let bubble = &mut self.bubbles[index];
        let mut added = 0;
        for payload in page {
            if bubble.message(payload.message_id).is_some() {
                continue;
            }
            bubble.messages.push(ChatMessage::from_payload(payload));
            added += 1;
            let from_other = count_unread_for.is_some_and(|me| payload.sender.user_id != me);
            if bubble.minimized && from_other {
                bubble.unread += 1;
            }
        }
        if added > 0 {
            bubble.sort_messages();
        }
        added
    }

    pub fn apply_reaction(&mut self, payload: &MessageReactionPayload) -> bool {
        let Some(index) = self.position_of_conversation(payload.conversation_id) else {
            return false;
        };
        match self.bubbles[index].message_mut(payload.message_id) {
            Some(message) => {
                message
                    .reactions
                    .apply(payload.user_id, payload.reaction_type, payload.revision)
            }
            None => false,
        }
    }

    pub fn reactions_mut(
        &mut self,
        conversation_id: ConversationId,
        message_id: MessageId,
    ) -> Option<&mut ReactionSet> {
        let index = self.position_of_conversation(conversation_id)?;
        self.bubbles[index]
            .message_mut(message_id)
            .map(|message| &mut message.reactions)
    }

    /// Replaces a group bubble's members with a fetched list.
    pub fn set_members(
        &mut self,
        conversation_id: ConversationId,
        members: Vec<UserSummary>,
    ) -> bool {
        match self.position_of_conversation(conversation_id) {
            Some(index) => {
                self.bubbles[index].members = members;
                true
            }
            None => false,
        }
    }

    /// Returns true when the local user was removed and the bubble closed.
    pub fn apply_membership(&mut self, me: UserId, payload: &GroupMembershipPayload) -> bool {
        let Some(index) = self.position_of_conversation(payload.conversation_id) else {
            return false;
        };
        if payload.removed.contains(&me) {
            self.bubbles.remove(index);
            return true;
        }
        self.bubbles[index].members = payload.members.clone();
        false
    }
}

#[cfg(test)]
#[path = "tests/bubbles_tests.rs"]
mod tests;
