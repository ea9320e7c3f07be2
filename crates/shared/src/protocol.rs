use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        CallId, CommentId, ConversationId, ConversationKind, FriendRequestId, MessageId,
        MessageKind, NotificationId, PostId, ReactionId, ReactionKind, Room, SessionId, UserId,
        UserSummary,
    },
    error::ApiError,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub content: String,
    pub message_type: MessageKind,
    /// Lets a client bind a private bubble opened before its conversation existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<ConversationKind>,
    pub sender: UserSummary,
    pub created_at: DateTime<Utc>,
}

/// Resulting reaction of one user on one message; `None` means cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReactionPayload {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub reaction_type: Option<ReactionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequestPayload {
    pub friend_request_id: FriendRequestId,
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub notification_id: NotificationId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostReactionPayload {
    pub post_id: PostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_reaction_id: Option<ReactionId>,
    #[serde(default)]
    pub reaction_type: Option<ReactionKind>,
    pub user: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentReactionPayload {
    pub post_id: PostId,
    pub comment_id: CommentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_reaction_id: Option<ReactionId>,
    #[serde(default)]
    pub reaction_type: Option<ReactionKind>,
    pub user: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    pub comment_id: CommentId,
    pub post_id: PostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<CommentId>,
    pub content: String,
    pub author: UserSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMembershipPayload {
    pub conversation_id: ConversationId,
    pub members: Vec<UserSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<UserId>,
}

/// Body of every `call:*` signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSignal {
    pub room_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub conversation_id: ConversationId,
    pub conversation_type: ConversationKind,
    pub caller_info: UserSummary,
    pub conversation_name: String,
    /// Participant that produced the signal, when it is not the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLockedPayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "newMessage")]
    NewMessage(NewMessagePayload),
    #[serde(rename = "reactToMessage")]
    ReactToMessage(MessageReactionPayload),
    #[serde(rename = "newFriendRequest")]
    NewFriendRequest(FriendRequestPayload),
    #[serde(rename = "reactToPost")]
    ReactToPost(PostReactionPayload),
    #[serde(rename = "updateReactToPost")]
    UpdateReactToPost(PostReactionPayload),
    #[serde(rename = "deleteReactToPost")]
    DeleteReactToPost(PostReactionPayload),
    #[serde(rename = "reactToComment")]
    ReactToComment(CommentReactionPayload),
    #[serde(rename = "updateReactToComment")]
    UpdateReactToComment(CommentReactionPayload),
    #[serde(rename = "deleteReactToComment")]
    DeleteReactToComment(CommentReactionPayload),
    #[serde(rename = "newComment")]
    NewComment(CommentPayload),
    #[serde(rename = "newReply")]
    NewReply(CommentPayload),
    #[serde(rename = "groupMembershipChanged")]
    GroupMembershipChanged(GroupMembershipPayload),
    #[serde(rename = "call:incoming")]
    CallIncoming(CallSignal),
    #[serde(rename = "call:join")]
    CallJoin(CallSignal),
    #[serde(rename = "call:answer")]
    CallAnswer(CallSignal),
    #[serde(rename = "call:refuse")]
    CallRefuse(CallSignal),
    #[serde(rename = "call:busy")]
    CallBusy(CallSignal),
    #[serde(rename = "call:end")]
    CallEnd(CallSignal),
    #[serde(rename = "accountLocked")]
    AccountLocked(AccountLockedPayload),
    #[serde(rename = "error")]
    Error(ApiError),
}

impl ServerEvent {
    /// Wire name, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage(_) => "newMessage",
            ServerEvent::ReactToMessage(_) => "reactToMessage",
            ServerEvent::NewFriendRequest(_) => "newFriendRequest",
            ServerEvent::ReactToPost(_) => "reactToPost",
            ServerEvent::UpdateReactToPost(_) => "updateReactToPost",
            ServerEvent::DeleteReactToPost(_) => "deleteReactToPost",
            ServerEvent::ReactToComment(_) => "reactToComment",
            ServerEvent::UpdateReactToComment(_) => "updateReactToComment",
            ServerEvent::DeleteReactToComment(_) => "deleteReactToComment",
            ServerEvent::NewComment(_) => "newComment",
            ServerEvent::NewReply(_) => "newReply",
            ServerEvent::GroupMembershipChanged(_) => "groupMembershipChanged",
            ServerEvent::CallIncoming(_) => "call:incoming",
            ServerEvent::CallJoin(_) => "call:join",
            ServerEvent::CallAnswer(_) => "call:answer",
            ServerEvent::CallRefuse(_) => "call:refuse",
            ServerEvent::CallBusy(_) => "call:busy",
            ServerEvent::CallEnd(_) => "call:end",
            ServerEvent::AccountLocked(_) => "accountLocked",
            ServerEvent::Error(_) => "error",
        }
    }
}

/// The caller picks the room id so it can cancel before anyone answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStartRequest {
    pub room_id: CallId,
    pub conversation_id: ConversationId,
    pub conversation_type: ConversationKind,
    pub conversation_name: String,
    pub caller_info: UserSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRoomRef {
    pub room_id: CallId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    #[serde(rename = "joinPost")]
    JoinPost(PostId),
    #[serde(rename = "leavePost")]
    LeavePost(PostId),
    #[serde(rename = "joinConversation")]
    JoinConversation(ConversationId),
    #[serde(rename = "leaveConversation")]
    LeaveConversation(ConversationId),
    #[serde(rename = "call:start")]
    CallStart(CallStartRequest),
    #[serde(rename = "call:answer")]
    CallAnswer(CallRoomRef),
    #[serde(rename = "call:refuse")]
    CallRefuse(CallRoomRef),
    #[serde(rename = "call:busy")]
    CallBusy(CallRoomRef),
    #[serde(rename = "call:end")]
    CallEnd(CallRoomRef),
}

impl ClientRequest {
    pub fn join(room: Room) -> Option<Self> {
        match room {
            Room::Post(id) => Some(ClientRequest::JoinPost(id)),
            Room::Conversation(id) => Some(ClientRequest::JoinConversation(id)),
            Room::Call(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::JoinPost(_) => "joinPost",
            ClientRequest::LeavePost(_) => "leavePost",
            ClientRequest::JoinConversation(_) => "joinConversation",
            ClientRequest::LeaveConversation(_) => "leaveConversation",
            ClientRequest::CallStart(_) => "call:start",
            ClientRequest::CallAnswer(_) => "call:answer",
            ClientRequest::CallRefuse(_) => "call:refuse",
            ClientRequest::CallBusy(_) => "call:busy",
            ClientRequest::CallEnd(_) => "call:end",
        }
    }
}

/// Who an event published by the storage collaborator is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    User(UserId),
    Room(Room),
    /// Every member of the conversation plus every session in its room.
    Conversation(ConversationId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    #[default]
    ExcludeOrigin,
    IncludeOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub target: Target,
    pub event: ServerEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_session: Option<SessionId>,
    #[serde(default)]
    pub echo: EchoPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub evicted: usize,
}
