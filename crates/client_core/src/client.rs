//! `ChatClient` ties the store to the channel and the storage API.
//!
//! The store lock is never held across a network call: local actions apply
//! optimistically, release the lock, persist, then confirm or roll back. Live
//! events keep merging in the meantime.

use std::sync::Arc;

use shared::{
    domain::{
        CallId, CommentId, ConversationId, ConversationKind, FriendRequestId, MessageId,
        MessageKind, PostId, ReactionKind, UserId, UserSummary,
    },
    protocol::{ClientRequest, NewMessagePayload, ServerEvent},
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelEvent, RequestSink},
    error::{CallError, ClientError, StorageError},
    storage_api::{ConversationSummary, PageQuery, SendMessage, StorageApi},
    store::{BubbleKey, ClientStore, Effect, OpenBubble},
};

const HISTORY_PAGE: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotice {
    /// A server event has been merged into the store.
    Event(ServerEvent),
    Toast(String),
    RedirectToAuth,
    OpenMediaRoom { room: CallId, token: String },
    CloseMediaRoom,
    Resynced,
}

pub struct ChatClient {
    store: Mutex<ClientStore>,
    channel: Arc<dyn RequestSink>,
    storage: Arc<dyn StorageApi>,
    notices: broadcast::Sender<ClientNotice>,
}

impl ChatClient {
    pub fn new(
        store: ClientStore,
        channel: Arc<dyn RequestSink>,
        storage: Arc<dyn StorageApi>,
    ) -> Arc<Self> {
        let (notices, _) = broadcast::channel(256);
        Arc::new(Self {
            store: Mutex::new(store),
            channel,
            storage,
            notices,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotice> {
        self.notices.subscribe()
    }

    /// Read access for rendering.
    pub async fn with_store<R>(&self, read: impl FnOnce(&ClientStore) -> R) -> R {
        let store = self.store.lock().await;
        read(&store)
    }

    fn notify(&self, notice: ClientNotice) {
        let _ = self.notices.send(notice);
    }

    fn toast(&self, text: impl Into<String>) {
        self.notify(ClientNotice::Toast(text.into()));
    }

    async fn request(&self, request: ClientRequest) {
        let name = request.name();
        if let Err(error) = self.channel.send(request).await {
            warn!(%error, request = name, "failed to queue channel request");
        }
    }

    async fn perform(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send(request) => self.request(request).await,
                Effect::MarkRead(conversation_id) => {
                    if let Err(error) = self.storage.mark_read(conversation_id).await {
                        warn!(%error, conversation_id = conversation_id.0, "read receipt failed");
                    }
                }
                Effect::Toast(text) => self.toast(text),
                Effect::RedirectToAuth => self.notify(ClientNotice::RedirectToAuth),
                Effect::OpenMediaRoom { room, token } => {
                    self.notify(ClientNotice::OpenMediaRoom { room, token })
                }
                Effect::CloseMediaRoom => self.notify(ClientNotice::CloseMediaRoom),
            }
        }
    }

    /// Drives the client from the channel until the event stream ends.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ChannelEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("channel event stream ended");
    }

    pub async fn handle_event(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::Event(event) => {
                let effects = self.store.lock().await.apply(&event);
                self.notify(ClientNotice::Event(event));
                self.perform(effects).await;
            }
            ChannelEvent::Reconnected => {
                let client = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(error) = client.resync().await {
                        warn!(%error, "resync after reconnect incomplete");
                    }
                });
            }
            ChannelEvent::AuthRejected => self.notify(ClientNotice::RedirectToAuth),
        }
    }

    /// Re-joins tracked rooms and replaces accumulated deltas with
    /// authoritative state after a new physical connection.
    pub async fn resync(&self) -> Result<(), ClientError> {
        let (rooms, conversations, call_effects) = {
            let mut store = self.store.lock().await;
            let conversations: Vec<ConversationId> = store
                .bubbles
                .iter()
                .filter_map(|bubble| bubble.conversation_id)
                .collect();
            (store.tracked_rooms(), conversations, store.call.reset())
        };
        self.perform(call_effects).await;
        for room in rooms {
            if let Some(join) = ClientRequest::join(room) {
                self.request(join).await;
            }
        }

        let mut first_error = None;
        match self.storage.friend_request_count().await {
            Ok(count) => self
                .store
                .lock()
                .await
                .notifications
                .set_friend_request_count(count),
            Err(error) => {
                warn!(%error, "friend request count refetch failed");
                first_error.get_or_insert(error);
            }
        }
        for conversation_id in conversations {
            match self.fetch_history(conversation_id).await {
                Ok(page) => {
                    let mut store = self.store.lock().await;
                    let me = store.user_id();
                    let missed = store.bubbles.merge_missed(me, conversation_id, &page);
                    debug!(conversation_id = conversation_id.0, missed, "history refetched");
                }
                Err(error) => {
                    warn!(%error, conversation_id = conversation_id.0, "history refetch failed");
                    first_error.get_or_insert(error);
                }
            }
        }
        self.notify(ClientNotice::Resynced);
        match first_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    async fn fetch_history(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<NewMessagePayload>, StorageError> {
        self.storage
            .fetch_messages(
                conversation_id,
                PageQuery {
                    limit: HISTORY_PAGE,
                    before: None,
                },
            )
            .await
    }

    pub async fn open_conversation(&self, request: OpenBubble) -> Result<(), ClientError> {
        let (effects, conversation_id, newly_tracked, empty) = {
            let mut store = self.store.lock().await;
            let already_tracked = request
                .conversation_id
                .is_some_and(|id| store.bubbles.get(BubbleKey::Conversation(id)).is_some());
            let effects = store.bubbles.open(request);
            let front = store.bubbles.iter().next();
            let conversation_id = front.and_then(|bubble| bubble.conversation_id);
            let empty = front.is_some_and(|bubble| bubble.messages.is_empty());
            (effects, conversation_id, !already_tracked, empty)
        };
        if let Some(conversation_id) = conversation_id {
            if newly_tracked {
                self.request(ClientRequest::JoinConversation(conversation_id)).await;
            }
            if empty {
                let page = self.fetch_history(conversation_id).await?;
                self.store
                    .lock()
                    .await
                    .bubbles
                    .merge_page(conversation_id, &page);
            }
        }
        self.perform(effects).await;
        Ok(())
    }

    pub async fn focus_bubble(&self, key: BubbleKey) {
        let effects = self.store.lock().await.bubbles.focus(key);
        self.perform(effects).await;
    }

    pub async fn minimize_bubble(&self, key: BubbleKey) {
        self.store.lock().await.bubbles.minimize(key);
    }

    /// In-flight sends for the bubble still complete; their results are dropped.
    pub async fn close_bubble(&self, key: BubbleKey) {
        let closed = self.store.lock().await.bubbles.close(key);
        if let Some(conversation_id) = closed.and_then(|bubble| bubble.conversation_id) {
            self.request(ClientRequest::LeaveConversation(conversation_id)).await;
        }
    }

    pub async fn send_message(
        &self,
        key: BubbleKey,
        content: impl Into<String>,
    ) -> Result<(), ClientError> {
        let content = content.into();
        let (local_id, conversation_id, friend) = {
            let mut store = self.store.lock().await;
            let me = store.me().clone();
            let (conversation_id, friend) = store
                .bubbles
                .get(key)
                .map(|bubble| {
                    (
                        bubble.conversation_id,
                        bubble.counterpart.as_ref().map(|c| c.user_id),
                    )
                })
                .ok_or_else(|| ClientError::NoSuchBubble(format!("{key:?}")))?;
            let local_id = store
                .bubbles
                .push_local(key, me, MessageKind::Text, content.clone())
                .ok_or_else(|| ClientError::NoSuchBubble(format!("{key:?}")))?;
            (local_id, conversation_id, friend)
        };

        let conversation_id = match (conversation_id, friend) {
            (Some(id), _) => id,
            (None, Some(friend)) => match self.storage.create_conversation(friend).await {
                Ok(created) => {
                    let still_open = self
                        .store
                        .lock()
                        .await
                        .bubbles
                        .assign_conversation(friend, created.conversation_id);
                    // A bubble closed mid-flight has no room to follow.
                    if still_open {
                        self.request(ClientRequest::JoinConversation(created.conversation_id))
                            .await;
                    }
                    created.conversation_id
                }
                Err(error) => return Err(self.rollback_message(local_id, error).await),
            },
            (None, None) => {
                self.store.lock().await.bubbles.rollback(local_id);
                return Err(ClientError::NoSuchBubble(format!("{key:?}")));
            }
        };

        let sent = self
            .storage
            .send_message(SendMessage {
                conversation_id,
                content,
                message_type: MessageKind::Text,
            })
            .await;
        match sent {
            Ok(persisted) => {
                self.store
                    .lock()
                    .await
                    .bubbles
                    .confirm_sent(local_id, &persisted);
                Ok(())
            }
            Err(error) => Err(self.rollback_message(local_id, error).await),
        }
    }

    async fn rollback_message(&self, local_id: u64, error: StorageError) -> ClientError {
        warn!(%error, local_id, "message send failed, rolling back");
        self.store.lock().await.bubbles.rollback(local_id);
        self.toast("Message could not be sent");
        error.into()
    }

    pub async fn react_to_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        kind: ReactionKind,
    ) -> Result<(), ClientError> {
        let previous = {
            let mut store = self.store.lock().await;
            let me = store.user_id();
            store
                .bubbles
                .reactions_mut(conversation_id, message_id)
                .map(|reactions| reactions.toggle(me, kind))
                .ok_or_else(|| ClientError::NotTracked(format!("message {message_id}")))?
        };
        if let Err(error) = self
            .storage
            .react_to_message(conversation_id, message_id, kind)
            .await
        {
            warn!(%error, message_id = message_id.0, "reaction failed, rolling back");
            let mut store = self.store.lock().await;
            let me = store.user_id();
            if let Some(reactions) = store.bubbles.reactions_mut(conversation_id, message_id) {
                reactions.restore(me, previous);
            }
            drop(store);
            self.toast("Reaction could not be saved");
            return Err(error.into());
        }
        Ok(())
    }

    pub async fn react_to_post(
        &self,
        post_id: PostId,
        kind: ReactionKind,
    ) -> Result<(), ClientError> {
        let previous = {
            let mut store = self.store.lock().await;
            let me = store.user_id();
            store
                .posts
                .post_reactions_mut(post_id)
                .map(|reactions| reactions.toggle(me, kind))
                .ok_or_else(|| ClientError::NotTracked(format!("post {post_id}")))?
        };
        if let Err(error) = self.storage.react_to_post(post_id, kind).await {
            warn!(%error, post_id = post_id.0, "post reaction failed, rolling back");
            let mut store = self.store.lock().await;
            let me = store.user_id();
            if let Some(reactions) = store.posts.post_reactions_mut(post_id) {
                reactions.restore(me, previous);
            }
            drop(store);
            self.toast("Reaction could not be saved");
            return Err(error.into());
        }
        Ok(())
    }

    pub async fn react_to_comment(
        &self,
        post_id: PostId,
        comment_id: CommentId,
        kind: ReactionKind,
    ) -> Result<(), ClientError> {
        let previous = {
            let mut store = self.store.lock().await;
            let me = store.user_id();
            store
                .posts
                .comment_reactions_mut(post_id, comment_id)
                .map(|reactions| reactions.toggle(me, kind))
                .ok_or_else(|| ClientError::NotTracked(format!("comment {comment_id}")))?
        };
        if let Err(error) = self.storage.react_to_comment(comment_id, kind).await {
            warn!(%error, comment_id = comment_id.0, "comment reaction failed, rolling back");
            let mut store = self.store.lock().await;
            let me = store.user_id();
            if let Some(reactions) = store.posts.comment_reactions_mut(post_id, comment_id) {
                reactions.restore(me, previous);
            }
            drop(store);
            self.toast("Reaction could not be saved");
            return Err(error.into());
        }
        Ok(())
    }

    pub async fn accept_friend_request(&self, request: FriendRequestId) -> Result<(), ClientError> {
        self.resolve_friend_request(request, true).await
    }

    pub async fn decline_friend_request(
        &self,
        request: FriendRequestId,
    ) -> Result<(), ClientError> {
        self.resolve_friend_request(request, false).await
    }

    async fn resolve_friend_request(
        &self,
        request: FriendRequestId,
        accept: bool,
    ) -> Result<(), ClientError> {
        let removed = self
            .store
            .lock()
            .await
            .notifications
            .take_friend_request(request)
            .ok_or(ClientError::NoSuchNotification(request.0))?;

        let result = if accept {
            self.storage.accept_friend_request(request).await
        } else {
            self.storage.delete_friend_request(request).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(error) if error.is_not_found() => {
                debug!(request = request.0, "friend request already resolved elsewhere");
                self.toast("This friend request is no longer available");
                Ok(())
            }
            Err(error) => {
                warn!(%error, request = request.0, "friend request action failed, restoring");
                self.store.lock().await.notifications.restore(removed);
                self.toast("Friend request could not be updated");
                Err(error.into())
            }
        }
    }

    pub async fn send_friend_request(&self, user_id: UserId) -> Result<(), ClientError> {
        if let Err(error) = self.storage.send_friend_request(user_id).await {
            warn!(%error, user_id = user_id.0, "friend request failed");
            self.toast("Friend request could not be sent");
            return Err(error.into());
        }
        Ok(())
    }

    pub async fn recent_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, ClientError> {
        Ok(self.storage.fetch_recent_conversations(page, limit).await?)
    }

    /// Refetches a group's members and stores them on its open bubble.
    pub async fn refresh_group_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserSummary>, ClientError> {
        let members = self.storage.fetch_group_members(conversation_id).await?;
        self.store
            .lock()
            .await
            .bubbles
            .set_members(conversation_id, members.clone());
        Ok(members)
    }

    /// The bubble's member list follows once the server broadcasts the change.
    pub async fn add_group_members(
        &self,
        conversation_id: ConversationId,
        members: &[UserId],
    ) -> Result<(), ClientError> {
        if let Err(error) = self
            .storage
            .add_group_members(conversation_id, members)
            .await
        {
            warn!(%error, conversation_id = conversation_id.0, "adding group members failed");
            self.toast("Members could not be added");
            return Err(error.into());
        }
        Ok(())
    }

    pub async fn remove_group_member(
        &self,
        conversation_id: ConversationId,
        member: UserId,
    ) -> Result<(), ClientError> {
        if let Err(error) = self
            .storage
            .remove_group_member(conversation_id, member)
            .await
        {
            warn!(%error, conversation_id = conversation_id.0, "removing group member failed");
            self.toast("Member could not be removed");
            return Err(error.into());
        }
        Ok(())
    }

    pub async fn join_post(&self, post_id: PostId) {
        if self.store.lock().await.posts.open(post_id) {
            self.request(ClientRequest::JoinPost(post_id)).await;
        }
    }

    pub async fn leave_post(&self, post_id: PostId) {
        if self.store.lock().await.posts.close(post_id) {
            self.request(ClientRequest::LeavePost(post_id)).await;
        }
    }

    pub async fn start_call(
        &self,
        conversation_id: ConversationId,
        conversation_type: ConversationKind,
        conversation_name: impl Into<String>,
    ) -> Result<CallId, ClientError> {
        let (effects, room_id) = {
            let mut store = self.store.lock().await;
            let me = store.me().clone();
            let effects = store
                .call
                .start(me, conversation_id, conversation_type, conversation_name.into())?;
            let room_id = store.call.phase().room_id();
            (effects, room_id)
        };
        self.perform(effects).await;
        room_id.ok_or(ClientError::Call(CallError::NoActiveCall))
    }

    pub async fn answer_call(&self) -> Result<(), ClientError> {
        let effects = self.store.lock().await.call.answer()?;
        self.perform(effects).await;
        Ok(())
    }

    pub async fn decline_call(&self) -> Result<(), ClientError> {
        let effects = self.store.lock().await.call.decline()?;
        self.perform(effects).await;
        Ok(())
    }

    pub async fn hang_up(&self) -> Result<(), ClientError> {
        let effects = self.store.lock().await.call.hang_up()?;
        self.perform(effects).await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
