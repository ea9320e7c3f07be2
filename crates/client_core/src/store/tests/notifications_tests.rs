use super::*;
use chrono::TimeZone;
use shared::domain::UserId;

fn request(id: i64, at: i64) -> FriendRequestPayload {
    FriendRequestPayload {
        friend_request_id: FriendRequestId(id),
        user_id: UserId(100 + id),
        first_name: "Req".into(),
        last_name: format!("{id}"),
        avatar: None,
        notification_id: NotificationId(500 + id),
        content: "sent you a friend request".into(),
        created_at: Utc.timestamp_opt(at, 0).single().expect("ts"),
    }
}

#[test]
fn friend_requests_are_deduplicated_and_newest_first() {
    let mut list = NotificationList::new();
    assert!(list.push_friend_request(&request(1, 100)));
    assert!(list.push_friend_request(&request(2, 300)));
    assert!(list.push_friend_request(&request(3, 200)));
    assert!(!list.push_friend_request(&request(2, 300)));

    let order: Vec<_> = list.items().iter().map(|item| item.reference).collect();
    assert_eq!(
        order,
        vec![FriendRequestId(2), FriendRequestId(3), FriendRequestId(1)]
    );
    assert_eq!(list.friend_request_count(), 3);
}

#[test]
fn restore_puts_item_back_in_place() {
    let mut list = NotificationList::new();
    list.push_friend_request(&request(1, 100));
    list.push_friend_request(&request(2, 200));

    let removed = list.take_friend_request(FriendRequestId(1)).expect("present");
    assert_eq!(list.friend_request_count(), 1);
    assert!(list.take_friend_request(FriendRequestId(1)).is_none());

    list.restore(removed);
    assert_eq!(list.friend_request_count(), 2);
    assert_eq!(list.items()[1].reference, FriendRequestId(1));
}

#[test]
fn dismiss_and_mark_read() {
    let mut list = NotificationList::new();
    list.push_friend_request(&request(1, 100));
    list.push_friend_request(&request(2, 200));
    assert_eq!(list.unread_count(), 2);

    list.mark_all_read();
    assert_eq!(list.unread_count(), 0);

    assert!(list.dismiss(NotificationId(501)).is_some());
    assert_eq!(list.friend_request_count(), 1);
    list.set_friend_request_count(9);
    assert_eq!(list.friend_request_count(), 9);
}
