use std::sync::Arc;

use tracing::debug;

use super::upsert_conversation;
use crate::{
    store::{ChatSnapshot, StoreUpdate},
    types::Conversation,
};

/// `conversation_update`: authoritative replace-or-insert by ID.
///
/// The payload replaces the stored entry wholesale (no message merge).
pub fn apply_conversation_update(snapshot: &ChatSnapshot, conversation: Conversation) -> StoreUpdate {
    debug!(
        conversation_id = %conversation.id,
        known = snapshot.conversation_index(&conversation.id).is_some(),
        members = conversation.members.len(),
        "conversation upsert"
    );
    upsert_conversation(snapshot, Arc::new(conversation))
}

/// Put a newly created conversation at the head of the list and make it active.
pub fn insert_created(snapshot: &ChatSnapshot, conversation: Conversation) -> StoreUpdate {
    let created = Arc::new(conversation);
    let mut conversations = Vec::with_capacity(snapshot.conversations.len() + 1);
    conversations.push(Arc::clone(&created));
    conversations.extend(
        snapshot
            .conversations
            .iter()
            .filter(|existing| existing.id != created.id)
            .cloned(),
    );
    StoreUpdate::default()
        .with_conversations(conversations)
        .with_active_conversation(Some(created))
        .with_typing_users(Vec::new())
}

/// Upsert a joined conversation and make it active.
pub fn activate_joined(snapshot: &ChatSnapshot, conversation: Conversation) -> StoreUpdate {
    let joined = Arc::new(conversation);
    upsert_conversation(snapshot, Arc::clone(&joined))
        .with_active_conversation(Some(joined))
        .with_typing_users(Vec::new())
}

/// Existing direct conversation with exactly `other_user_id`, if any.
pub fn find_direct_conversation<'a>(
    snapshot: &'a ChatSnapshot,
    other_user_id: &str,
) -> Option<&'a Arc<Conversation>> {
    snapshot
        .conversations
        .iter()
        .find(|conversation| !conversation.is_group && conversation.has_member(other_user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fixtures::*;

    #[test]
    fn update_replaces_whole_conversation() {
        let snapshot = snapshot();
        let replacement = (*conversation("c1", &["a", "b", "d"], Vec::new())).clone();

        let update = apply_conversation_update(&snapshot, replacement);
        let conversations = update.conversations.expect("list");
        assert_eq!(conversations.len(), 2);
        assert!(conversations[0].messages.is_empty());
        assert_eq!(conversations[0].members.len(), 3);

        let active = update.active_conversation.expect("active slice").expect("active");
        assert!(Arc::ptr_eq(&active, &conversations[0]));
    }

    #[test]
    fn update_for_new_id_appends() {
        let snapshot = snapshot();
        let update =
            apply_conversation_update(&snapshot, (*conversation("c3", &["a", "d"], Vec::new())).clone());
        let conversations = update.conversations.expect("list");
        assert_eq!(conversations[2].id, "c3");
        assert!(update.active_conversation.is_none());
    }

    #[test]
    fn created_goes_to_front_and_becomes_active() {
        let snapshot = snapshot();
        let update = insert_created(&snapshot, (*conversation("c9", &["a", "d"], Vec::new())).clone());
        let conversations = update.conversations.expect("list");
        let ids: Vec<_> = conversations.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c9", "c1", "c2"]);
        assert_eq!(
            update.active_conversation.expect("active slice").expect("active").id,
            "c9"
        );
    }

    #[test]
    fn finds_existing_direct_conversation() {
        let snapshot = snapshot();
        assert_eq!(find_direct_conversation(&snapshot, "c").expect("dm").id, "c2");
        assert!(find_direct_conversation(&snapshot, "z").is_none());
    }

    #[test]
    fn joined_conversation_is_activated() {
        let snapshot = snapshot();
        let update = activate_joined(&snapshot, (*snapshot.conversations[1]).clone());
        assert_eq!(update.conversations.expect("list").len(), 2);
        assert_eq!(
            update.active_conversation.expect("active slice").expect("active").id,
            "c2"
        );
    }
}
