//! REST boundary of the storage collaborator.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use shared::{
    domain::{
        CommentId, ConversationId, ConversationKind, FriendRequestId, MessageId, MessageKind,
        PostId, ReactionKind, UserId, UserSummary,
    },
    protocol::NewMessagePayload,
};
use tracing::debug;

use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub conversation_type: ConversationKind,
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<NewMessagePayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub conversation_id: ConversationId,
    pub content: String,
    pub message_type: MessageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub limit: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<MessageId>,
}

#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn create_conversation(
        &self,
        participant: UserId,
    ) -> Result<ConversationSummary, StorageError>;
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        page: PageQuery,
    ) -> Result<Vec<NewMessagePayload>, StorageError>;
    async fn fetch_recent_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, StorageError>;
    async fn fetch_group_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserSummary>, StorageError>;
    async fn add_group_members(
        &self,
        conversation_id: ConversationId,
        members: &[UserId],
    ) -> Result<(), StorageError>;
    async fn remove_group_member(
        &self,
        conversation_id: ConversationId,
        member: UserId,
    ) -> Result<(), StorageError>;
    /// Persists a message and returns the stored copy.
    async fn send_message(&self, message: SendMessage) -> Result<NewMessagePayload, StorageError>;
    async fn react_to_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        kind: ReactionKind,
    ) -> Result<(), StorageError>;
    async fn react_to_post(&self, post_id: PostId, kind: ReactionKind) -> Result<(), StorageError>;
    async fn react_to_comment(
        &self,
        comment_id: CommentId,
        kind: ReactionKind,
    ) -> Result<(), StorageError>;
    async fn send_friend_request(&self, user_id: UserId) -> Result<(), StorageError>;
    async fn accept_friend_request(&self, request: FriendRequestId) -> Result<(), StorageError>;
    async fn delete_friend_request(&self, request: FriendRequestId) -> Result<(), StorageError>;
    async fn friend_request_count(&self) -> Result<u32, StorageError>;
    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), StorageError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationBody {
    participant_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MembersBody<'a> {
    user_ids: &'a [UserId],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReactionBody {
    reaction_type: ReactionKind,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FriendRequestBody {
    user_id: UserId,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u32,
}

pub struct HttpStorageApi {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpStorageApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, token)
    }

    pub fn with_client(
        http: Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, StorageError> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), %message, "storage request failed");
        Err(match status {
            StatusCode::NOT_FOUND => StorageError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Unauthorized(message),
            _ => StorageError::Status {
                status: status.as_u16(),
                message,
            },
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StorageError> {
        Ok(self.execute(request).await?.json().await?)
    }
}

#[async_trait]
impl StorageApi for HttpStorageApi {
    async fn create_conversation(
        &self,
        participant: UserId,
    ) -> Result<ConversationSummary, StorageError> {
        self.json(
            self.http
                .post(self.url("/conversations"))
                .json(&CreateConversationBody {
                    participant_id: participant,
                }),
        )
        .await
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        page: PageQuery,
    ) -> Result<Vec<NewMessagePayload>, StorageError> {
        self.json(
            self.http
                .get(self.url(&format!("/conversations/{conversation_id}/messages")))
                .query(&page),
        )
        .await
    }

    async fn fetch_recent_conversations(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, StorageError> {
        self.json(
            self.http
                .get(self.url("/conversations"))
                .query(&[("page", page), ("limit", limit)]),
        )
        .await
    }

    async fn fetch_group_members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<UserSummary>, StorageError> {
        self.json(
            self.http
                .get(self.url(&format!("/conversations/{conversation_id}/members"))),
        )
        .await
    }

    async fn add_group_members(
        &self,
        conversation_id: ConversationId,
        members: &[UserId],
    ) -> Result<(), StorageError> {
        self.execute(
            self.http
                .post(self.url(&format!("/conversations/{conversation_id}/members")))
                .json(&MembersBody { user_ids: members }),
        )
        .await?;
        Ok(())
    }

    async fn remove_group_member(
        &self,
        conversation_id: ConversationId,
        member: UserId,
    ) -> Result<(), StorageError> {
        self.execute(
            self.http
                .delete(self.url(&format!("/conversations/{conversation_id}/members/{member}"))),
        )
        .await?;
        Ok(())
    }

    async fn send_message(&self, message: SendMessage) -> Result<NewMessagePayload, StorageError> {
        let path = format!("/conversations/{}/messages", message.conversation_id);
        self.json(self.http.post(self.url(&path)).json(&message)).await
    }

    async fn react_to_message(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        kind: ReactionKind,
    ) -> Result<(), StorageError> {
        let path = format!("/conversations/{conversation_id}/messages/{message_id}/reactions");
        self.execute(
            self.http
                .post(self.url(&path))
                .json(&ReactionBody { reaction_type: kind }),
        )
        .await?;
        Ok(())
    }

    async fn react_to_post(&self, post_id: PostId, kind: ReactionKind) -> Result<(), StorageError> {
        self.execute(
            self.http
                .post(self.url(&format!("/posts/{post_id}/reactions")))
                .json(&ReactionBody { reaction_type: kind }),
        )
        .await?;
        Ok(())
    }

    async fn react_to_comment(
        &self,
        comment_id: CommentId,
        kind: ReactionKind,
    ) -> Result<(), StorageError> {
        self.execute(
            self.http
                .post(self.url(&format!("/comments/{comment_id}/reactions")))
                .json(&ReactionBody { reaction_type: kind }),
        )
        .await?;
        Ok(())
    }

    async fn send_friend_request(&self, user_id: UserId) -> Result<(), StorageError> {
        self.execute(
            self.http
                .post(self.url("/friend-requests"))
                .json(&FriendRequestBody { user_id }),
        )
        .await?;
        Ok(())
    }

    async fn accept_friend_request(&self, request: FriendRequestId) -> Result<(), StorageError> {
        self.execute(
            self.http
                .post(self.url(&format!("/friend-requests/{request}/accept"))),
        )
        .await?;
        Ok(())
    }

    async fn delete_friend_request(&self, request: FriendRequestId) -> Result<(), StorageError> {
        self.execute(self.http.delete(self.url(&format!("/friend-requests/{request}"))))
            .await?;
        Ok(())
    }

    async fn friend_request_count(&self) -> Result<u32, StorageError> {
        let response: CountResponse = self
            .json(self.http.get(self.url("/friend-requests/count")))
            .await?;
        Ok(response.count)
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), StorageError> {
        self.execute(
            self.http
                .post(self.url(&format!("/conversations/{conversation_id}/read"))),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/storage_api_tests.rs"]
mod tests;
