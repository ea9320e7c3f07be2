//! Live state of post-detail rooms the client is viewing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{CommentId, PostId, UserSummary},
    protocol::{CommentPayload, CommentReactionPayload, PostReactionPayload},
};

use super::reactions::ReactionSet;

#[derive(Debug, Clone)]
pub struct CommentState {
    pub comment_id: CommentId,
    pub parent: Option<CommentId>,
    pub author: UserSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub reactions: ReactionSet,
    pub replies: Vec<CommentId>,
}

#[derive(Debug, Clone, Default)]
pub struct PostThread {
    pub reactions: ReactionSet,
    pub comments: BTreeMap<CommentId, CommentState>,
    /// Top-level comments in arrival order, plus replies whose parent is
    /// not loaded yet.
    pub roots: Vec<CommentId>,
}

impl PostThread {
    fn add_comment(&mut self, payload: &CommentPayload) -> bool {
        if self.comments.contains_key(&payload.comment_id) {
            return false;
        }
        let parent = payload
            .parent_comment_id
            .and_then(|parent| self.comments.get_mut(&parent));
        match parent {
            Some(parent) => parent.replies.push(payload.comment_id),
            None => self.roots.push(payload.comment_id),
        }

        // Replies that arrived before this comment move under it.
        let comments = &self.comments;
        let mut adopted = Vec::new();
        self.roots.retain(|root| {
            let orphan = comments
                .get(root)
                .is_some_and(|comment| comment.parent == Some(payload.comment_id));
            if orphan {
                adopted.push(*root);
            }
            !orphan
        });

        self.comments.insert(
            payload.comment_id,
            CommentState {
                comment_id: payload.comment_id,
                parent: payload.parent_comment_id,
                author: payload.author.clone(),
                content: payload.content.clone(),
                created_at: payload.created_at,
                reactions: ReactionSet::new(),
                replies: adopted,
            },
        );
        true
    }
}

#[derive(Debug, Default)]
pub struct PostThreads {
    threads: BTreeMap<PostId, PostThread>,
}

impl PostThreads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the thread was already open.
    pub fn open(&mut self, post_id: PostId) -> bool {
        if self.threads.contains_key(&post_id) {
            return false;
        }
        self.threads.insert(post_id, PostThread::default());
        true
    }

    pub fn close(&mut self, post_id: PostId) -> bool {
        self.threads.remove(&post_id).is_some()
    }

    pub fn get(&self, post_id: PostId) -> Option<&PostThread> {
        self.threads.get(&post_id)
    }

    pub fn post_ids(&self) -> impl Iterator<Item = PostId> + '_ {
        self.threads.keys().copied()
    }

    pub fn post_reactions_mut(&mut self, post_id: PostId) -> Option<&mut ReactionSet> {
        self.threads.get_mut(&post_id).map(|thread| &mut thread.reactions)
    }

    pub fn comment_reactions_mut(
        &mut self,
        post_id: PostId,
        comment_id: CommentId,
    ) -> Option<&mut ReactionSet> {
        self.threads
            .get_mut(&post_id)?
            .comments
            .get_mut(&comment_id)
            .map(|comment| &mut comment.reactions)
    }

    /// `cleared` is set for delete events, whose payload may still name the old kind.
    pub fn apply_post_reaction(&mut self, payload: &PostReactionPayload, cleared: bool) -> bool {
        let kind = if cleared { None } else { payload.reaction_type };
        self.post_reactions_mut(payload.post_id)
            .is_some_and(|set| set.apply(payload.user.user_id, kind, payload.revision))
    }

    pub fn apply_comment_reaction(
        &mut self,
        payload: &CommentReactionPayload,
        cleared: bool,
    ) -> bool {
        let kind = if cleared { None } else { payload.reaction_type };
        self.comment_reactions_mut(payload.post_id, payload.comment_id)
            .is_some_and(|set| set.apply(payload.user.user_id, kind, payload.revision))
    }

    pub fn add_comment(&mut self, payload: &CommentPayload) -> bool {
        self.threads
            .get_mut(&payload.post_id)
            .is_some_and(|thread| thread.add_comment(payload))
    }
}

#[cfg(test)]
#[path = "tests/posts_tests.rs"]
mod tests;
