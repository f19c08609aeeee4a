use std::sync::Arc;

use tracing::debug;

use super::{resolve_conversation, upsert_conversation};
use crate::{
    normalization::refresh_last_message,
    store::{ChatSnapshot, StoreUpdate},
    timeline::{self, TimelineError},
    types::{Message, Reaction, ReactionPayload, User},
};

/// `reaction_add`: attach `{emoji, user}` unless that user already reacted
/// with the same emoji.
pub fn add_reaction(snapshot: &ChatSnapshot, payload: &ReactionPayload) -> Option<StoreUpdate> {
    let user = snapshot
        .user(&payload.user_id)
        .cloned()
        .unwrap_or_else(|| User::unresolved(payload.user_id.clone()));
    let reaction = Reaction {
        emoji: payload.emoji.clone(),
        user,
    };
    edit(snapshot, payload, |messages| {
        timeline::add_reaction(messages, &payload.message_id, reaction)
    })
}

/// `reaction_remove`: drop the matching `{emoji, user}` entry.
pub fn remove_reaction(snapshot: &ChatSnapshot, payload: &ReactionPayload) -> Option<StoreUpdate> {
    edit(snapshot, payload, |messages| {
        timeline::remove_reaction(
            messages,
            &payload.message_id,
            &payload.user_id,
            &payload.emoji,
        )
    })
}

fn edit(
    snapshot: &ChatSnapshot,
    payload: &ReactionPayload,
    op: impl FnOnce(&mut [Message]) -> Result<bool, TimelineError>,
) -> Option<StoreUpdate> {
    let Some(target) = resolve_conversation(snapshot, &payload.conversation_id) else {
        debug!(conversation_id = %payload.conversation_id, "reaction for unknown conversation ignored");
        return None;
    };

    let mut updated = (**target).clone();
    match op(&mut updated.messages) {
        Ok(true) => {}
        Ok(false) => return None,
        Err(err) => {
            debug!(error = %err, "reaction ignored");
            return None;
        }
    }
    refresh_last_message(&mut updated);
    Some(upsert_conversation(snapshot, Arc::new(updated)))
}
