//! Pure reconcilers: `(&ChatSnapshot, payload) -> StoreUpdate`.
//!
//! None of these touch the store. A `None` / empty result means the event
//! is a no-op for the current snapshot and no notification must be sent.

pub mod conversation;
pub mod message;
pub mod presence;
pub mod reaction;
pub mod receipt;
pub mod typing;

use std::sync::Arc;

use crate::{
    store::{ChatSnapshot, StoreUpdate},
    types::Conversation,
};

/// Replace-or-append `updated` by ID and keep the active conversation on the
/// same value when it is the one being written.
pub(crate) fn upsert_conversation(
    snapshot: &ChatSnapshot,
    updated: Arc<Conversation>,
) -> StoreUpdate {
    let mut conversations = snapshot.conversations.clone();
    match snapshot.conversation_index(&updated.id) {
        Some(index) => conversations[index] = Arc::clone(&updated),
        None => conversations.push(Arc::clone(&updated)),
    }

    let mut update = StoreUpdate::default().with_conversations(conversations);
    if snapshot.is_active(&updated.id) {
        update = update.with_active_conversation(Some(updated));
    }
    update
}

/// Conversation the snapshot knows under `conversation_id`, from the list
/// or, failing that, the active conversation.
pub(crate) fn resolve_conversation<'a>(
    snapshot: &'a ChatSnapshot,
    conversation_id: &str,
) -> Option<&'a Arc<Conversation>> {
    snapshot.conversation(conversation_id).or_else(|| {
        snapshot
            .active_conversation
            .as_ref()
            .filter(|active| active.id == conversation_id)
    })
}
