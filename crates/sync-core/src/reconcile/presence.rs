use std::sync::Arc;

use tracing::debug;

use crate::{
    store::{ChatSnapshot, StoreUpdate},
    types::{Conversation, User, UserStatusPayload},
};

/// `user_status`: propagate presence/name to the directory, every
/// conversation that lists the user, and the active conversation.
///
/// Conversations without the user keep their `Arc`, so renderers can skip
/// them by pointer comparison. Returns `None` when nothing references the user.
pub fn apply_user_status(snapshot: &ChatSnapshot, payload: &UserStatusPayload) -> Option<StoreUpdate> {
    let mut update = StoreUpdate::default();

    if let Some(index) = snapshot.users.iter().position(|user| user.id == payload.user_id) {
        let mut users = snapshot.users.clone();
        apply_to_user(&mut users[index], payload);
        update = update.with_users(users);
    }

    let mut touched = false;
    let conversations: Vec<Arc<Conversation>> = snapshot
        .conversations
        .iter()
        .map(|conversation| {
            if !conversation.has_member(&payload.user_id) {
                return Arc::clone(conversation);
            }
            touched = true;
            Arc::new(with_member_updated(conversation, payload))
        })
        .collect();

    if let Some(active) = snapshot.active_conversation.as_deref()
        && active.has_member(&payload.user_id)
    {
        let updated = match conversations.iter().find(|c| c.id == active.id) {
            Some(listed) => Arc::clone(listed),
            // Not (yet) in the list.
            None => Arc::new(with_member_updated(active, payload)),
        };
        update = update.with_active_conversation(Some(updated));
    }
    if touched {
        update = update.with_conversations(conversations);
    }

    if let Some(current) = snapshot.current_user.as_ref()
        && current.id == payload.user_id
    {
        let mut current = current.clone();
        apply_to_user(&mut current, payload);
        update = update.with_current_user(Some(current));
    }

    if update.is_empty() {
        return None;
    }
    debug!(
        user_id = %payload.user_id,
        status = ?payload.status,
        slices = ?update.slices(),
        "presence applied"
    );
    Some(update)
}

fn with_member_updated(conversation: &Conversation, payload: &UserStatusPayload) -> Conversation {
    let mut updated = conversation.clone();
    for member in updated.members.iter_mut().flatten() {
        if member.id == payload.user_id {
            apply_to_user(member, payload);
        }
    }
    updated
}

fn apply_to_user(user: &mut User, payload: &UserStatusPayload) {
    if let Some(status) = payload.status {
        user.is_online = status.is_online();
    }
    if let Some(name) = payload.name.as_ref() {
        user.name = name.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reconcile::fixtures::*, store::StoreSlice, types::PresenceStatus};

    fn status(user_id: &str, status: Option<PresenceStatus>, name: Option<&str>) -> UserStatusPayload {
        UserStatusPayload {
            user_id: user_id.to_owned(),
            status,
            name: name.map(str::to_owned),
        }
    }

    fn apply(snapshot: &mut ChatSnapshot, payload: &UserStatusPayload) {
        let Some(update) = apply_user_status(snapshot, payload) else {
            return;
        };
        if let Some(users) = update.users {
            snapshot.users = users;
        }
        if let Some(conversations) = update.conversations {
            snapshot.conversations = conversations;
        }
        if let Some(active) = update.active_conversation {
            snapshot.active_conversation = active;
        }
        if let Some(current) = update.current_user {
            snapshot.current_user = current;
        }
    }

    fn member<'a>(conversation: &'a Conversation, user_id: &str) -> &'a User {
        conversation
            .members
            .iter()
            .flatten()
            .find(|m| m.id == user_id)
            .expect("member should exist")
    }

    #[test]
    fn offline_member_of_active_conversation_syncs_list_and_active() {
        let mut snapshot = snapshot();
        apply(&mut snapshot, &status("b", Some(PresenceStatus::Offline), None));

        let active = snapshot.active_conversation.clone().expect("active");
        assert!(!member(&active, "b").is_online);
        let listed = snapshot.conversation("c1").expect("c1");
        assert!(!member(listed, "b").is_online);
        assert!(Arc::ptr_eq(&active, listed));
        assert!(!snapshot.user("b").expect("directory entry").is_online);
    }

    #[test]
    fn unlisted_active_conversation_is_updated_alongside_list() {
        let mut snapshot = snapshot();
        snapshot.active_conversation = Some(conversation("c7", &["a", "b"], Vec::new()));

        let update = apply_user_status(&snapshot, &status("b", Some(PresenceStatus::Offline), None))
            .expect("b is referenced");
        assert_eq!(
            update.slices(),
            vec![StoreSlice::Conversations, StoreSlice::ActiveConversation, StoreSlice::Users]
        );
        apply(&mut snapshot, &status("b", Some(PresenceStatus::Offline), None));

        let active = snapshot.active_conversation.clone().expect("active");
        assert_eq!(active.id, "c7");
        assert!(!member(&active, "b").is_online);
        assert!(!member(snapshot.conversation("c1").expect("c1"), "b").is_online);
    }

    #[test]
    fn conversations_without_member_keep_identity() {
        let snapshot = snapshot();
        let update = apply_user_status(&snapshot, &status("b", Some(PresenceStatus::Offline), None))
            .expect("b is referenced");
        let conversations = update.conversations.expect("list");
        assert!(!Arc::ptr_eq(&conversations[0], &snapshot.conversations[0]));
        assert!(Arc::ptr_eq(&conversations[1], &snapshot.conversations[1]));
    }

    #[test]
    fn absent_user_creates_no_directory_entry() {
        let snapshot = snapshot();
        assert!(apply_user_status(&snapshot, &status("ghost", Some(PresenceStatus::Online), None)).is_none());
    }

    #[test]
    fn latest_processed_status_wins_under_interleaving() {
        let mut snapshot = snapshot();
        let sequence = [
            status("b", Some(PresenceStatus::Offline), None),
            status("c", Some(PresenceStatus::Offline), None),
            status("b", Some(PresenceStatus::Online), None),
            status("c", Some(PresenceStatus::Online), None),
            status("b", Some(PresenceStatus::Offline), None),
        ];
        for payload in &sequence {
            apply(&mut snapshot, payload);
        }

        assert!(!snapshot.user("b").expect("b").is_online);
        assert!(snapshot.user("c").expect("c").is_online);
        assert!(!member(snapshot.conversation("c1").expect("c1"), "b").is_online);
        assert!(member(snapshot.conversation("c2").expect("c2"), "c").is_online);
    }

    #[test]
    fn name_only_update_keeps_presence() {
        let mut snapshot = snapshot();
        apply(&mut snapshot, &status("c", None, Some("Cleo")));

        let c = snapshot.user("c").expect("c");
        assert_eq!(c.name, "Cleo");
        assert!(c.is_online);
        assert_eq!(member(snapshot.conversation("c2").expect("c2"), "c").name, "Cleo");
    }

    #[test]
    fn updates_current_user_entry() {
        let mut snapshot = snapshot();
        apply(&mut snapshot, &status("a", Some(PresenceStatus::Offline), None));
        assert!(!snapshot.current_user.expect("current").is_online);
    }
}
