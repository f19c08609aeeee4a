use crate::{
    timeline::dedupe_messages,
    types::{Conversation, ConversationPayload},
};

/// Turn a wire conversation into the shape the store relies on.
///
/// - repeated message IDs are collapsed
/// - `last_message` is the tail of `messages` (the server summary is kept
///   only when no messages were delivered)
/// - a missing `is_group` flag is derived from the member count
pub fn normalize_conversation(payload: ConversationPayload) -> Conversation {
    let messages = dedupe_messages(payload.messages);
    let is_group = payload.is_group.unwrap_or(payload.members.len() > 2);
    let mut conversation = Conversation {
        id: payload.id,
        name: payload.name,
        members: payload.members,
        messages,
        last_message: payload.last_message,
        is_group,
    };
    sync_last_message(&mut conversation);
    conversation
}

fn sync_last_message(conversation: &mut Conversation) {
    if let Some(tail) = conversation.messages.last() {
        conversation.last_message = Some(tail.clone());
    }
}

/// Copy edits of the message `last_message` points at (reactions) into it.
pub fn refresh_last_message(conversation: &mut Conversation) {
    let Some(last_id) = conversation.last_message.as_ref().map(|last| last.id.as_str()) else {
        return;
    };
    if let Some(current) = conversation.messages.iter().find(|m| m.id == last_id) {
        conversation.last_message = Some(current.clone());
    }
}

/// Name used for a new conversation when the user gave none.
///
/// Direct conversations take the other member's name.
pub fn default_conversation_name(other_member_names: &[&str]) -> String {
    match other_member_names {
        [only] => (*only).to_owned(),
        _ => "New Group".to_owned(),
    }
}
