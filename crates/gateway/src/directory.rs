use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use shared::domain::{ConversationId, UserId};
use tokio::sync::RwLock;

/// Conversation membership as known by the storage collaborator.
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// `None` when the conversation is unknown to the directory.
    async fn members(&self, conversation_id: ConversationId)
        -> anyhow::Result<Option<Vec<UserId>>>;
}

/// Directory fed over HTTP by the storage collaborator.
#[derive(Default)]
pub struct InMemoryDirectory {
    members: RwLock<HashMap<ConversationId, BTreeSet<UserId>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_members(&self, conversation_id: ConversationId, members: Vec<UserId>) {
        let mut guard = self.members.write().await;
        if members.is_empty() {
            guard.remove(&conversation_id);
        } else {
            guard.insert(conversation_id, members.into_iter().collect());
        }
    }
}

#[async_trait]
impl ConversationDirectory for InMemoryDirectory {
    async fn members(
        &self,
        conversation_id: ConversationId,
    ) -> anyhow::Result<Option<Vec<UserId>>> {
        Ok(self
            .members
            .read()
            .await
            .get(&conversation_id)
            .map(|members| members.iter().copied().collect()))
    }
}
