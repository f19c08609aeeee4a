use tracing::trace;

use crate::{
    store::{ChatSnapshot, StoreUpdate},
    types::TypingPayload,
};

/// `typing_start`: add the user to the typing set when the event targets the
/// active conversation and the user is in the directory.
///
/// `Some` means the set grew and the message sink should scroll to the tail.
/// There is no expiry; the sender is expected to follow up with `typing_end`.
pub fn typing_start(snapshot: &ChatSnapshot, payload: &TypingPayload) -> Option<StoreUpdate> {
    if !snapshot.is_active(&payload.conversation_id) {
        trace!(
            conversation_id = %payload.conversation_id,
            user_id = %payload.user_id,
            "typing_start for inactive conversation ignored"
        );
        return None;
    }
    if snapshot
        .typing_users
        .iter()
        .any(|user| user.id == payload.user_id)
    {
        return None;
    }
    let user = snapshot.user(&payload.user_id)?.clone();

    let mut typing_users = snapshot.typing_users.clone();
    typing_users.push(user);
    Some(StoreUpdate::default().with_typing_users(typing_users))
}

/// `typing_end`: remove the user regardless of conversation.
pub fn typing_end(snapshot: &ChatSnapshot, payload: &TypingPayload) -> Option<StoreUpdate> {
    if snapshot
        .typing_users
        .iter()
        .all(|user| user.id != payload.user_id)
    {
        return None;
    }
    let typing_users = snapshot
        .typing_users
        .iter()
        .filter(|user| user.id != payload.user_id)
        .cloned()
        .collect();
    Some(StoreUpdate::default().with_typing_users(typing_users))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fixtures::*;

    fn typing(conversation_id: &str, user_id: &str) -> TypingPayload {
        TypingPayload {
            conversation_id: conversation_id.to_owned(),
            user_id: user_id.to_owned(),
        }
    }

    #[test]
    fn start_in_active_conversation_adds_user_once() {
        let mut snapshot = snapshot();
        let update = typing_start(&snapshot, &typing("c1", "b")).expect("b should be added");
        snapshot.typing_users = update.typing_users.expect("typing slice");
        assert_eq!(snapshot.typing_users, vec![user("b", true)]);

        assert!(typing_start(&snapshot, &typing("c1", "b")).is_none());
    }

    #[test]
    fn start_for_inactive_conversation_never_mutates() {
        let snapshot = snapshot();
        assert!(typing_start(&snapshot, &typing("c2", "c")).is_none());

        let mut no_active = snapshot.clone();
        no_active.active_conversation = None;
        assert!(typing_start(&no_active, &typing("c1", "b")).is_none());
    }

    #[test]
    fn unresolved_user_is_silently_skipped() {
        let snapshot = snapshot();
        assert!(typing_start(&snapshot, &typing("c1", "ghost")).is_none());
    }

    #[test]
    fn end_removes_user_from_any_conversation() {
        let mut snapshot = snapshot();
        snapshot.typing_users = vec![user("b", true), user("c", true)];

        let update = typing_end(&snapshot, &typing("c2", "b")).expect("b should be removed");
        assert_eq!(update.typing_users, Some(vec![user("c", true)]));
    }

    #[test]
    fn end_for_absent_user_is_a_no_op() {
        let snapshot = snapshot();
        assert!(typing_end(&snapshot, &typing("c1", "b")).is_none());
    }
}
