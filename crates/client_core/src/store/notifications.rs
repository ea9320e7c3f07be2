use chrono::{DateTime, Utc};
use shared::{
    domain::{FriendRequestId, NotificationId, NotificationKind, UserSummary},
    protocol::FriendRequestPayload,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationItem {
    pub id: NotificationId,
    pub actor: UserSummary,
    pub kind: NotificationKind,
    pub reference: FriendRequestId,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Removed item kept aside until the storage call resolves.
#[derive(Debug, Clone)]
pub struct RemovedNotification {
    index: usize,
    item: NotificationItem,
}

impl RemovedNotification {
    pub fn item(&self) -> &NotificationItem {
        &self.item
    }
}

/// Recency-ordered notifications plus the pending friend-request badge.
#[derive(Debug, Default)]
pub struct NotificationList {
    items: Vec<NotificationItem>,
    friend_requests: u32,
}

impl NotificationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[NotificationItem] {
        &self.items
    }

    pub fn friend_request_count(&self) -> u32 {
        self.friend_requests
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|item| !item.read).count()
    }

    /// Authoritative count fetched after a reconnect.
    pub fn set_friend_request_count(&mut self, count: u32) {
        self.friend_requests = count;
    }

    pub fn push_friend_request(&mut self, payload: &FriendRequestPayload) -> bool {
        let known = self.items.iter().any(|item| {
            item.id == payload.notification_id
                || (item.kind == NotificationKind::FriendRequest
                    && item.reference == payload.friend_request_id)
        });
        if known {
            return false;
        }
        let item = NotificationItem {
            id: payload.notification_id,
            actor: UserSummary {
                user_id: payload.user_id,
                first_name: payload.first_name.clone(),
                last_name: payload.last_name.clone(),
                avatar: payload.avatar.clone(),
            },
            kind: NotificationKind::FriendRequest,
            reference: payload.friend_request_id,
            content: payload.content.clone(),
            read: false,
            created_at: payload.created_at,
        };
        let index = self
            .items
            .iter()
            .position(|existing| existing.created_at < item.created_at)
            .unwrap_or(self.items.len());
        self.items.insert(index, item);
        self.friend_requests += 1;
        true
    }

    pub fn take_friend_request(&mut self, request: FriendRequestId) -> Option<RemovedNotification> {
        let index = self.items.iter().position(|item| {
            item.kind == NotificationKind::FriendRequest && item.reference == request
        })?;
        let item = self.items.remove(index);
        self.friend_requests = self.friend_requests.saturating_sub(1);
        Some(RemovedNotification { index, item })
    }

    pub fn restore(&mut self, removed: RemovedNotification) {
        if self.items.iter().any(|item| item.id == removed.item.id) {
            return;
        }
        let index = removed.index.min(self.items.len());
        self.items.insert(index, removed.item);
        self.friend_requests += 1;
    }

    pub fn dismiss(&mut self, id: NotificationId) -> Option<NotificationItem> {
        let index = self.items.iter().position(|item| item.id == id)?;
        let item = self.items.remove(index);
        if item.kind == NotificationKind::FriendRequest {
            self.friend_requests = self.friend_requests.saturating_sub(1);
        }
        Some(item)
    }

    pub fn mark_all_read(&mut self) {
        for item in &mut self.items {
            item.read = true;
        }
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
