use super::*;
use chrono::TimeZone;

const ME: UserId = UserId(1);

fn user(id: i64, name: &str) -> UserSummary {
    UserSummary {
        user_id: UserId(id),
        first_name: name.into(),
        last_name: "Test".into(),
        avatar: None,
    }
}

fn message(conversation: i64, id: i64, sender: UserSummary, content: &str) -> NewMessagePayload {
    NewMessagePayload {
        conversation_id: ConversationId(conversation),
        message_id: MessageId(id),
        content: content.into(),
        message_type: MessageKind::Text,
        conversation_type: None,
        sender,
        created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).single().expect("ts"),
    }
}

fn open_private(set: &mut BubbleSet, friend: i64, conversation: Option<i64>) -> Vec<Effect> {
    set.open(OpenBubble::private(
        user(friend, "Friend"),
        conversation.map(ConversationId),
    ))
}

#[test]
fn reopening_by_friend_or_conversation_reuses_the_bubble() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    open_private(&mut set, 3, Some(11));
    set.merge_incoming(ME, &message(10, 100, user(2, "Friend"), "hi"));

    open_private(&mut set, 2, None);
    assert_eq!(set.len(), 2);
    let front = set.iter().next().expect("front");
    assert_eq!(front.conversation_id, Some(ConversationId(10)));
    assert_eq!(front.messages.len(), 1);

    set.open(OpenBubble::group(ConversationId(11), "renamed", Vec::new()));
    assert_eq!(set.len(), 2);
    assert_eq!(
        set.iter().next().and_then(|bubble| bubble.conversation_id),
        Some(ConversationId(11))
    );
}

#[test]
fn third_open_bubble_minimizes_least_recently_focused() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    open_private(&mut set, 3, Some(11));
    open_private(&mut set, 4, Some(12));

    let minimized = |set: &BubbleSet, id: i64| {
        set.get(BubbleKey::Conversation(ConversationId(id)))
            .expect("bubble")
            .minimized
    };
    assert!(minimized(&set, 10));
    assert!(!minimized(&set, 11));
    assert!(!minimized(&set, 12));

    set.focus(BubbleKey::Conversation(ConversationId(10)));
    assert!(!minimized(&set, 10));
    assert!(minimized(&set, 11));
    assert!(!minimized(&set, 12));
    assert_eq!(set.open_count(), 2);
}

#[test]
fn unread_only_counts_while_minimized_and_resets_once() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    let key = BubbleKey::Conversation(ConversationId(10));

    set.merge_incoming(ME, &message(10, 1, user(2, "Friend"), "visible"));
    assert_eq!(set.get(key).expect("bubble").unread, 0);

    set.minimize(key);
    for id in 2..5 {
        set.merge_incoming(ME, &message(10, id, user(2, "Friend"), "while away"));
    }
    set.merge_incoming(ME, &message(10, 5, user(1, "Me"), "from another tab"));
    assert_eq!(set.get(key).expect("bubble").unread, 3);

    assert_eq!(set.focus(key), vec![Effect::MarkRead(ConversationId(10))]);
    assert_eq!(set.get(key).expect("bubble").unread, 0);
    assert!(set.focus(key).is_empty());
}

#[test]
fn confirm_after_echo_keeps_a_single_copy() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    let key = BubbleKey::Conversation(ConversationId(10));

    let local = set
        .push_local(key, user(1, "Me"), MessageKind::Text, "hello".into())
        .expect("local id");
    let persisted = message(10, 77, user(1, "Me"), "hello");
    assert!(set.merge_incoming(ME, &persisted));
    set.confirm_sent(local, &persisted);

    let bubble = set.get(key).expect("bubble");
    assert_eq!(bubble.messages.len(), 1);
    assert_eq!(bubble.messages[0].message_id, Some(MessageId(77)));
    assert!(!bubble.messages[0].pending);
}

#[test]
fn rollback_removes_only_the_failed_message() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    let key = BubbleKey::Conversation(ConversationId(10));
    let kept = set
        .push_local(key, user(1, "Me"), MessageKind::Text, "one".into())
        .expect("local");
    let failed = set
        .push_local(key, user(1, "Me"), MessageKind::Text, "two".into())
        .expect("local");
    set.confirm_sent(kept, &message(10, 5, user(1, "Me"), "one"));

    assert!(set.rollback(failed));
    assert!(!set.rollback(kept));
    let bubble = set.get(key).expect("bubble");
    assert_eq!(bubble.messages.len(), 1);
    assert_eq!(bubble.messages[0].content, "one");
}

fn typed(mut payload: NewMessagePayload, kind: ConversationKind) -> NewMessagePayload {
    payload.conversation_type = Some(kind);
    payload
}

#[test]
fn first_message_binds_a_lazily_created_private_bubble() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, None);
    let first = typed(message(42, 1, user(2, "Friend"), "hey"), ConversationKind::Private);
    assert!(set.merge_incoming(ME, &first));
    let bubble = set
        .get(BubbleKey::Conversation(ConversationId(42)))
        .expect("bound");
    assert_eq!(bubble.messages.len(), 1);
}

#[test]
fn group_message_from_a_friend_never_binds_their_private_bubble() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, None);

    let group = typed(message(77, 1, user(2, "Friend"), "team update"), ConversationKind::Group);
    assert!(!set.merge_incoming(ME, &group));
    assert!(!set.merge_incoming(ME, &message(77, 2, user(2, "Friend"), "untyped")));

    let bubble = set.get(BubbleKey::Friend(UserId(2))).expect("private bubble");
    assert_eq!(bubble.conversation_id, None);
    assert!(bubble.messages.is_empty());
    assert!(set.get(BubbleKey::Conversation(ConversationId(77))).is_none());
}

#[test]
fn message_for_closed_bubble_is_dropped() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    set.close(BubbleKey::Conversation(ConversationId(10)));
    assert!(!set.merge_incoming(ME, &message(10, 1, user(2, "Friend"), "late")));
    assert!(set.is_empty());
}

#[test]
fn history_page_merges_in_time_order_without_unread() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    let key = BubbleKey::Conversation(ConversationId(10));
    set.minimize(key);
    set.merge_incoming(ME, &message(10, 5, user(2, "Friend"), "live"));

    let page = vec![
        message(10, 3, user(2, "Friend"), "older"),
        message(10, 5, user(2, "Friend"), "live"),
        message(10, 4, user(1, "Me"), "mine"),
    ];
    assert_eq!(set.merge_page(ConversationId(10), &page), 2);

    let bubble = set.get(key).expect("bubble");
    let ids: Vec<_> = bubble.messages.iter().filter_map(|m| m.message_id).collect();
    assert_eq!(ids, vec![MessageId(3), MessageId(4), MessageId(5)]);
    assert_eq!(bubble.unread, 1);
}

#[test]
fn missed_messages_count_as_unread_only_while_minimized() {
    let mut set = BubbleSet::new();
    open_private(&mut set, 2, Some(10));
    open_private(&mut set, 3, Some(11));
    set.minimize(BubbleKey::Conversation(ConversationId(10)));

    let missed = vec![
        message(10, 1, user(2, "Friend"), "while you were away"),
        message(10, 2, user(1, "Me"), "from my phone"),
    ];
    assert_eq!(set.merge_missed(ME, ConversationId(10), &missed), 2);
    assert_eq!(set.merge_missed(ME, ConversationId(10), &missed), 0);
    let shown = vec![message(11, 3, user(3, "Other"), "visible")];
    assert_eq!(set.merge_missed(ME, ConversationId(11), &shown), 1);

    let unread = |id| set.get(BubbleKey::Conversation(ConversationId(id))).map(|b| b.unread);
    assert_eq!(unread(10), Some(1));
    assert_eq!(unread(11), Some(0));
}
