use std::{collections::HashSet, sync::Mutex as StdMutex};

use tokio::sync::Notify;

use super::*;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use shared::{
    domain::{NotificationId, UserId, UserSummary},
    protocol::{CallSignal, FriendRequestPayload, NewMessagePayload},
};

use crate::{error::ChannelError, storage_api::ConversationSummary};

fn user(id: i64) -> UserSummary {
    UserSummary {
        user_id: UserId(id),
        first_name: format!("User{id}"),
        last_name: "Test".into(),
        avatar: None,
    }
}

#[derive(Default)]
struct RecordingSink {
    sent: StdMutex<Vec<ClientRequest>>,
}

impl RecordingSink {
    fn sent(&self) -> Vec<ClientRequest> {
        self.sent.lock().expect("sink lock").clone()
    }
}

#[async_trait]
impl RequestSink for RecordingSink {
    async fn send(&self, request: ClientRequest) -> Result<(), ChannelError> {
        self.sent.lock().expect("sink lock").push(request);
        Ok(())
    }
}

#[derive(Default)]
struct FakeStorage {
    failing: StdMutex<HashSet<&'static str>>,
    missing: StdMutex<HashSet<&'static str>>,
    calls: StdMutex<Vec<String>>,
    history: StdMutex<Vec<NewMessagePayload>>,
    friend_requests: u32,
    next_conversation: i64,
    group_members: Vec<UserSummary>,
    /// Holds `create_conversation` until notified.
    create_gate: Option<Arc<Notify>>,
}

impl FakeStorage {
    fn fail(&self, operation: &'static str) {
        self.failing.lock().expect("lock").insert(operation);
    }

    fn gone(&self, operation: &'static str) {
        self.missing.lock().expect("lock").insert(operation);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }

    fn record(
        &self,
        operation: &'static str,
        detail: impl std::fmt::Display,
    ) -> Result<(), StorageError> {
        self.calls
            .lock()
            .expect("lock")
            .push(format!("{operation} {detail}"));
        if self.missing.lock().expect("lock").contains(operation) {
            return Err(StorageError::NotFound(operation.into()));
        }
        if self.failing.lock().expect("lock").contains(operation) {
            return Err(StorageError::Status {
                status: 500,
                message: operation.into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageApi for FakeStorage {
    async fn create_conversation(
        &self,
        participant: UserId,
    ) -> Result<ConversationSummary, StorageError> {
        self.record("create_conversation", participant)?;
        if let Some(gate) = &self.create_gate {
            gate.notified().await;
        }
        Ok(ConversationSummary {
            conversation_id: ConversationId(self.next_conversation),
            conversation_type: ConversationKind::Private,
            name: format!("User{participant}"),
            members: vec![user(1), user(participant.0)],
            last_message: None,
        })
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        _page: PageQuery,
    ) -> Result<Vec<NewMessagePayload>, StorageError> {
        self.record("fetch_messages", conversation_id)?;
        Ok(self
            .history
            .lock()
            .expect("lock")
            .iter()
            .filter(|message| message.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn fetch_recent_conversations(
        &self,
        page: u32,
        _limit: u32,
    ) -> Result<Vec<ConversationSummary>, StorageError> {
        self.record("fetch_recent_conversations", page)?;
        Ok(Vec::new())
    }

    async fn fetch_group_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserSummary>, StorageError> {
        self.record("fetch_group_members", conversation_id)?;
        Ok(self.group_members.clone())
    }

    async fn add_group_members(
        &self,
        conversation_id: ConversationId,
        _members: &[UserId],
    ) -> Result<(), StorageError> {
        self.record("add_group_members", conversation_id)
    }

    async fn remove_group_member(
        &self,
        conversation_id: ConversationId,
        _member: UserId,
    ) -> Result<(), StorageError> {
        self.record("remove_group_member", conversation_id)
    }

    async fn send_message(&self, message: SendMessage) -> Result<NewMessagePayload, StorageError> {
        self.record("send_message", message.conversation_id)?;
        Ok(NewMessagePayload {
            conversation_id: message.conversation_id,
            message_id: MessageId(500),
            content: message.content,
            message_type: message.message_type,
            conversation_type: None,
            sender: user(1),
            created_at: Utc::now(),
        })
    }

    async fn react_to_message(
        &self,
        _conversation_id: ConversationId,
        message_id: MessageId,
        _kind: ReactionKind,
    ) -> Result<(), StorageError> {
        self.record("react_to_message", message_id)
    }

    async fn react_to_post(
        &self,
        post_id: PostId,
        _kind: ReactionKind,
    ) -> Result<(), StorageError> {
        self.record("react_to_post", post_id)
    }

    async fn react_to_comment(
        &self,
        comment_id: CommentId,
        _kind: ReactionKind,
    ) -> Result<(), StorageError> {
        self.record("react_to_comment", comment_id)
    }

    async fn send_friend_request(&self, user_id: UserId) -> Result<(), StorageError> {
        self.record("send_friend_request", user_id)
    }

    async fn accept_friend_request(&self, request: FriendRequestId) -> Result<(), StorageError> {
        self.record("accept_friend_request", request)
    }

    async fn delete_friend_request(&self, request: FriendRequestId) -> Result<(), StorageError> {
        self.record("delete_friend_request", request)
    }

    async fn friend_request_count(&self) -> Result<u32, StorageError> {
        self.record("friend_request_count", "")?;
        Ok(self.friend_requests)
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), StorageError> {
        self.record("mark_read", conversation_id)
    }
}

struct Harness {
    client: Arc<ChatClient>,
    sink: Arc<RecordingSink>,
    storage: Arc<FakeStorage>,
    notices: broadcast::Receiver<ClientNotice>,
}

fn harness(storage: FakeStorage) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let storage = Arc::new(storage);
    let client = ChatClient::new(
        ClientStore::new(user(1)),
        sink.clone(),
        storage.clone(),
    );
    let notices = client.subscribe();
    Harness {
        client,
        sink,
        storage,
        notices,
    }
}

fn drain(notices: &mut broadcast::Receiver<ClientNotice>) -> Vec<ClientNotice> {
    let mut seen = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        seen.push(notice);
    }
    seen
}

fn toasts(notices: &mut broadcast::Receiver<ClientNotice>) -> Vec<String> {
    drain(notices)
        .into_iter()
        .filter_map(|notice| match notice {
            ClientNotice::Toast(text) => Some(text),
            _ => None,
        })
        .collect()
}

fn stored_message(conversation: i64, id: i64, sender: i64, minutes_ago: i64) -> NewMessagePayload {
    NewMessagePayload {
        conversation_id: ConversationId(conversation),
        message_id: MessageId(id),
        content: format!("history {id}"),
        message_type: MessageKind::Text,
        conversation_type: None,
        sender: user(sender),
        created_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

fn friend_request(id: i64) -> ServerEvent {
    ServerEvent::NewFriendRequest(FriendRequestPayload {
        friend_request_id: FriendRequestId(id),
        user_id: UserId(7),
        first_name: "User7".into(),
        last_name: "Test".into(),
        avatar: None,
        notification_id: NotificationId(id + 100),
        content: "wants to be friends".into(),
        created_at: Utc::now(),
    })
}

fn ring(kind: ConversationKind) -> CallSignal {
    CallSignal {
        room_id: CallId::new(),
        token: None,
        conversation_id: ConversationId(10),
        conversation_type: kind,
        caller_info: user(2),
        conversation_name: "User2".into(),
        participant: None,
    }
}

#[tokio::test]
async fn opening_a_conversation_joins_and_loads_history_once() {
    let storage = FakeStorage::default();
    storage
        .history
        .lock()
        .expect("lock")
        .extend([stored_message(10, 1, 2, 5), stored_message(10, 2, 1, 3)]);
    let h = harness(storage);

    let request = OpenBubble::private(user(2), Some(ConversationId(10)));
    h.client.open_conversation(request.clone()).await.expect("open");
    h.client.open_conversation(request).await.expect("reopen");

    assert_eq!(
        h.sink.sent(),
        vec![ClientRequest::JoinConversation(ConversationId(10))]
    );
    let fetches = h
        .storage
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("fetch_messages"))
        .count();
    assert_eq!(fetches, 1);
    let loaded = h
        .client
        .with_store(|store| {
            store
                .bubbles
                .get(BubbleKey::Conversation(ConversationId(10)))
                .map(|bubble| (bubble.messages.len(), bubble.unread))
        })
        .await;
    assert_eq!(loaded, Some((2, 0)));
}

#[tokio::test]
async fn first_message_to_a_friend_creates_the_conversation() {
    let h = harness(FakeStorage {
        next_conversation: 42,
        ..FakeStorage::default()
    });
    h.client
        .open_conversation(OpenBubble::private(user(2), None))
        .await
        .expect("open");
    assert!(h.sink.sent().is_empty());

    h.client
        .send_message(BubbleKey::Friend(UserId(2)), "hi there")
        .await
        .expect("send");

    assert_eq!(
        h.sink.sent(),
        vec![ClientRequest::JoinConversation(ConversationId(42))]
    );
    assert_eq!(
        h.storage.calls(),
        vec!["create_conversation 2".to_string(), "send_message 42".to_string()]
    );
    let messages = h
        .client
        .with_store(|store| {
            let bubble = store
                .bubbles
                .get(BubbleKey::Conversation(ConversationId(42)))
                .expect("bubble bound to the new conversation");
            bubble
                .messages
                .iter()
                .map(|message| (message.message_id, message.pending))
                .collect::<Vec<_>>()
        })
        .await;
    assert_eq!(messages, vec![(Some(MessageId(500)), false)]);
}

#[tokio::test]
async fn bubble_closed_during_creation_does_not_join_the_room() {
    let gate = Arc::new(Notify::new());
    let h = harness(FakeStorage {
        next_conversation: 42,
        create_gate: Some(gate.clone()),
        ..FakeStorage::default()
    });
    h.client
        .open_conversation(OpenBubble::private(user(2), None))
        .await
        .expect("open");

    let client = h.client.clone();
    let send = tokio::spawn(async move {
        client
            .send_message(BubbleKey::Friend(UserId(2)), "hello?")
            .await
    });
    while h.storage.calls().is_empty() {
        tokio::task::yield_now().await;
    }
    h.client.close_bubble(BubbleKey::Friend(UserId(2))).await;
    gate.notify_one();
    send.await.expect("task").expect("message still persisted");

    assert!(h.sink.sent().is_empty());
    assert_eq!(
        h.storage.calls(),
        vec!["create_conversation 2".to_string(), "send_message 42".to_string()]
    );
    let open = h.client.with_store(|store| store.bubbles.len()).await;
    assert_eq!(open, 0);
}

#[tokio::test]
async fn failed_send_rolls_back_and_notifies() {
    let mut h = harness(FakeStorage::default());
    h.storage.fail("send_message");
    h.client
        .open_conversation(OpenBubble::private(user(2), Some(ConversationId(10))))
        .await
        .expect("open");
    drain(&mut h.notices);

    let err = h
        .client
        .send_message(BubbleKey::Conversation(ConversationId(10)), "lost")
        .await
        .expect_err("storage failure");
    assert!(matches!(err, ClientError::Storage(StorageError::Status { status: 500, .. })));

    let remaining = h
        .client
        .with_store(|store| {
            store
                .bubbles
                .get(BubbleKey::Conversation(ConversationId(10)))
                .map(|bubble| bubble.messages.len())
        })
        .await;
    assert_eq!(remaining, Some(0));
    assert_eq!(toasts(&mut h.notices), vec!["Message could not be sent".to_string()]);
}

#[tokio::test]
async fn sending_without_a_bubble_is_an_error() {
    let h = harness(FakeStorage::default());
    let err = h
        .client
        .send_message(BubbleKey::Conversation(ConversationId(99)), "nobody")
        .await
        .expect_err("no bubble");
    assert!(matches!(err, ClientError::NoSuchBubble(_)));
    assert!(h.storage.calls().is_empty());
}

#[tokio::test]
async fn failed_reaction_restores_the_previous_choice() {
    let storage = FakeStorage::default();
    storage
        .history
        .lock()
        .expect("lock")
        .push(stored_message(10, 1, 2, 1));
    let mut h = harness(storage);
    h.client
        .open_conversation(OpenBubble::private(user(2), Some(ConversationId(10))))
        .await
        .expect("open");

    h.client
        .react_to_message(ConversationId(10), MessageId(1), ReactionKind::Like)
        .await
        .expect("like");
    h.storage.fail("react_to_message");
    drain(&mut h.notices);

    h.client
        .react_to_message(ConversationId(10), MessageId(1), ReactionKind::Love)
        .await
        .expect_err("rejected");

    let mine = h
        .client
        .with_store(|store| {
            store
                .bubbles
                .get(BubbleKey::Conversation(ConversationId(10)))
                .and_then(|bubble| bubble.message(MessageId(1)))
                .and_then(|message| message.reactions.get(UserId(1)))
        })
        .await;
    assert_eq!(mine, Some(ReactionKind::Like));
    assert_eq!(toasts(&mut h.notices), vec!["Reaction could not be saved".to_string()]);
}

#[tokio::test]
async fn reacting_to_an_unloaded_post_is_rejected() {
    let h = harness(FakeStorage::default());
    let err = h
        .client
        .react_to_post(PostId(5), ReactionKind::Like)
        .await
        .expect_err("not viewing");
    assert!(matches!(err, ClientError::NotTracked(_)));

    h.client.join_post(PostId(5)).await;
    h.client.join_post(PostId(5)).await;
    h.client
        .react_to_post(PostId(5), ReactionKind::Like)
        .await
        .expect("react");
    assert_eq!(h.sink.sent(), vec![ClientRequest::JoinPost(PostId(5))]);
}

#[tokio::test]
async fn friend_request_already_resolved_stays_removed() {
    let mut h = harness(FakeStorage::default());
    h.client
        .handle_event(ChannelEvent::Event(friend_request(3)))
        .await;
    h.storage.gone("accept_friend_request");
    drain(&mut h.notices);

    h.client
        .accept_friend_request(FriendRequestId(3))
        .await
        .expect("treated as resolved");

    let (items, count) = h
        .client
        .with_store(|store| {
            (
                store.notifications.items().len(),
                store.notifications.friend_request_count(),
            )
        })
        .await;
    assert_eq!((items, count), (0, 0));
    assert_eq!(
        toasts(&mut h.notices),
        vec!["This friend request is no longer available".to_string()]
    );
}

#[tokio::test]
async fn failed_friend_request_action_restores_the_notification() {
    let mut h = harness(FakeStorage::default());
    h.client
        .handle_event(ChannelEvent::Event(friend_request(3)))
        .await;
    h.storage.fail("delete_friend_request");
    drain(&mut h.notices);

    h.client
        .decline_friend_request(FriendRequestId(3))
        .await
        .expect_err("server error");

    let count = h
        .client
        .with_store(|store| store.notifications.friend_request_count())
        .await;
    assert_eq!(count, 1);
    assert_eq!(
        toasts(&mut h.notices),
        vec!["Friend request could not be updated".to_string()]
    );

    let err = h
        .client
        .accept_friend_request(FriendRequestId(77))
        .await
        .expect_err("unknown");
    assert!(matches!(err, ClientError::NoSuchNotification(77)));
}

#[tokio::test]
async fn resync_rejoins_rooms_and_replaces_counts() {
    let storage = FakeStorage {
        friend_requests: 6,
        ..FakeStorage::default()
    };
    let mut h = harness(storage);
    h.client
        .open_conversation(OpenBubble::private(user(2), Some(ConversationId(10))))
        .await
        .expect("open");
    h.client.join_post(PostId(5)).await;
    h.storage
        .history
        .lock()
        .expect("lock")
        .push(stored_message(10, 8, 2, 1));
    h.sink.sent.lock().expect("lock").clear();
    drain(&mut h.notices);

    h.client.resync().await.expect("resync");

    assert_eq!(
        h.sink.sent(),
        vec![
            ClientRequest::JoinConversation(ConversationId(10)),
            ClientRequest::JoinPost(PostId(5)),
        ]
    );
    let (count, has_missed) = h
        .client
        .with_store(|store| {
            let bubble = store
                .bubbles
                .get(BubbleKey::Conversation(ConversationId(10)))
                .expect("bubble");
            (
                store.notifications.friend_request_count(),
                bubble.message(MessageId(8)).is_some(),
            )
        })
        .await;
    assert_eq!(count, 6);
    assert!(has_missed);
    assert!(drain(&mut h.notices).contains(&ClientNotice::Resynced));
}

#[tokio::test]
async fn resync_counts_missed_messages_on_a_minimized_bubble() {
    let h = harness(FakeStorage::default());
    h.client
        .open_conversation(OpenBubble::private(user(2), Some(ConversationId(10))))
        .await
        .expect("open");
    h.client
        .minimize_bubble(BubbleKey::Conversation(ConversationId(10)))
        .await;
    h.storage.history.lock().expect("lock").extend([
        stored_message(10, 8, 2, 3),
        stored_message(10, 9, 1, 2),
        stored_message(10, 10, 2, 1),
    ]);

    h.client.resync().await.expect("resync");
    h.client.resync().await.expect("second resync adds nothing");

    let (messages, unread) = h
        .client
        .with_store(|store| {
            let bubble = store
                .bubbles
                .get(BubbleKey::Conversation(ConversationId(10)))
                .expect("bubble");
            (bubble.messages.len(), bubble.unread)
        })
        .await;
    assert_eq!((messages, unread), (3, 2));
}

#[tokio::test]
async fn resync_reports_partial_failure() {
    let h = harness(FakeStorage::default());
    h.client
        .open_conversation(OpenBubble::private(user(2), Some(ConversationId(10))))
        .await
        .expect("open");
    h.storage.fail("friend_request_count");

    let err = h.client.resync().await.expect_err("count failed");
    assert!(matches!(err, ClientError::Storage(_)));
    assert!(h
        .storage
        .calls()
        .iter()
        .filter(|call| call.starts_with("fetch_messages"))
        .count()
        >= 2);
}

#[tokio::test]
async fn friend_request_failure_is_reported() {
    let mut h = harness(FakeStorage::default());
    h.client
        .send_friend_request(UserId(9))
        .await
        .expect("sent");
    h.storage.fail("send_friend_request");

    let err = h
        .client
        .send_friend_request(UserId(9))
        .await
        .expect_err("server error");
    assert!(matches!(err, ClientError::Storage(StorageError::Status { status: 500, .. })));
    assert_eq!(
        h.storage.calls(),
        vec![
            "send_friend_request 9".to_string(),
            "send_friend_request 9".to_string()
        ]
    );
    assert_eq!(
        toasts(&mut h.notices),
        vec!["Friend request could not be sent".to_string()]
    );
}

#[tokio::test]
async fn group_membership_changes_go_through_storage() {
    let mut h = harness(FakeStorage {
        group_members: vec![user(1), user(3), user(4)],
        ..FakeStorage::default()
    });
    h.client
        .open_conversation(OpenBubble::group(ConversationId(20), "Team", vec![user(1)]))
        .await
        .expect("open");

    h.client
        .add_group_members(ConversationId(20), &[UserId(3), UserId(4)])
        .await
        .expect("add");
    let members = h
        .client
        .refresh_group_members(ConversationId(20))
        .await
        .expect("refresh");
    assert_eq!(members.len(), 3);
    let stored = h
        .client
        .with_store(|store| {
            store
                .bubbles
                .get(BubbleKey::Conversation(ConversationId(20)))
                .map(|bubble| bubble.members.len())
        })
        .await;
    assert_eq!(stored, Some(3));

    h.storage.fail("remove_group_member");
    drain(&mut h.notices);
    h.client
        .remove_group_member(ConversationId(20), UserId(4))
        .await
        .expect_err("server error");
    assert_eq!(toasts(&mut h.notices), vec!["Member could not be removed".to_string()]);
    assert!(h
        .storage
        .calls()
        .ends_with(&["remove_group_member 20".to_string()]));
}

#[tokio::test]
async fn second_incoming_call_is_auto_declined_as_busy() {
    let h = harness(FakeStorage::default());
    let first = ring(ConversationKind::Private);
    h.client
        .handle_event(ChannelEvent::Event(ServerEvent::CallIncoming(first.clone())))
        .await;
    h.client.answer_call().await.expect("answer");

    let second = ring(ConversationKind::Group);
    h.client
        .handle_event(ChannelEvent::Event(ServerEvent::CallIncoming(second.clone())))
        .await;

    assert_eq!(
        h.sink.sent(),
        vec![
            ClientRequest::CallAnswer(shared::protocol::CallRoomRef {
                room_id: first.room_id
            }),
            ClientRequest::CallBusy(shared::protocol::CallRoomRef {
                room_id: second.room_id
            }),
        ]
    );
    let active = h
        .client
        .with_store(|store| store.call.phase().room_id())
        .await;
    assert_eq!(active, Some(first.room_id));
}

#[tokio::test]
async fn started_call_can_be_cancelled_before_an_answer() {
    let h = harness(FakeStorage::default());
    let room_id = h
        .client
        .start_call(ConversationId(10), ConversationKind::Private, "User2")
        .await
        .expect("start");
    let err = h
        .client
        .start_call(ConversationId(11), ConversationKind::Group, "Team")
        .await
        .expect_err("busy");
    assert!(matches!(err, ClientError::Call(CallError::Busy)));

    h.client.hang_up().await.expect("cancel");
    let sent = h.sink.sent();
    assert!(matches!(&sent[0], ClientRequest::CallStart(start) if start.room_id == room_id));
    assert_eq!(
        sent[1],
        ClientRequest::CallEnd(shared::protocol::CallRoomRef { room_id })
    );
}

#[tokio::test]
async fn rejected_session_asks_for_reauthentication() {
    let mut h = harness(FakeStorage::default());
    h.client.handle_event(ChannelEvent::AuthRejected).await;
    assert_eq!(drain(&mut h.notices), vec![ClientNotice::RedirectToAuth]);
}
