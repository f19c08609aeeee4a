use thiserror::Error;

use crate::types::{Message, Reaction};

/// Errors that can occur while editing a conversation's message list.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineError {
    /// An edit referenced a message ID that is not present in the list.
    #[error("message '{0}' was not found")]
    MissingMessage(String),
}

/// Where [`upsert_message`] put the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// New ID, pushed to the tail.
    Appended,
    /// Redelivered ID, replaced at its original position.
    Replaced { index: usize },
}

/// Insert `message`, replacing an existing entry with the same ID in place.
pub fn upsert_message(messages: &mut Vec<Message>, message: Message) -> Placement {
    match messages.iter().position(|existing| existing.id == message.id) {
        Some(index) => {
            messages[index] = message;
            Placement::Replaced { index }
        }
        None => {
            messages.push(message);
            Placement::Appended
        }
    }
}

/// Add `reaction` unless the same user already reacted with the same emoji.
///
/// Returns whether the list changed.
pub fn add_reaction(
    messages: &mut [Message],
    message_id: &str,
    reaction: Reaction,
) -> Result<bool, TimelineError> {
    let message = find_mut(messages, message_id)?;
    let exists = message
        .reactions
        .iter()
        .any(|it| it.emoji == reaction.emoji && it.user.id == reaction.user.id);
    if exists {
        return Ok(false);
    }
    message.reactions.push(reaction);
    Ok(true)
}

/// Remove the reaction `user_id` made with `emoji`. Returns whether the list changed.
pub fn remove_reaction(
    messages: &mut [Message],
    message_id: &str,
    user_id: &str,
    emoji: &str,
) -> Result<bool, TimelineError> {
    let message = find_mut(messages, message_id)?;
    let before = message.reactions.len();
    message
        .reactions
        .retain(|it| !(it.emoji == emoji && it.user.id == user_id));
    Ok(message.reactions.len() != before)
}

/// Collapse repeated IDs: first position wins, latest value wins.
pub fn dedupe_messages(messages: Vec<Message>) -> Vec<Message> {
    let mut deduped = Vec::with_capacity(messages.len());
    for message in messages {
        upsert_message(&mut deduped, message);
    }
    deduped
}

fn find_mut<'a>(
    messages: &'a mut [Message],
    message_id: &str,
) -> Result<&'a mut Message, TimelineError> {
    messages
        .iter_mut()
        .find(|it| it.id == message_id)
        .ok_or_else(|| TimelineError::MissingMessage(message_id.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageKind, User};

    fn message(id: &str, content: &str) -> Message {
        Message {
            id: id.to_owned(),
            content: content.to_owned(),
            sender: None,
            created_at: String::new(),
            conversation_id: "c1".to_owned(),
            reactions: Vec::new(),
            kind: MessageKind::Text,
            client_txn_id: None,
        }
    }

    fn reaction(user: &str, emoji: &str) -> Reaction {
        Reaction {
            emoji: emoji.to_owned(),
            user: User::unresolved(user),
        }
    }

    #[test]
    fn redelivery_keeps_original_position() {
        let mut messages = vec![message("m1", "a"), message("m2", "b")];

        let placement = upsert_message(&mut messages, message("m1", "a-edited"));
        assert_eq!(placement, Placement::Replaced { index: 0 });
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "a-edited");

        assert_eq!(
            upsert_message(&mut messages, message("m3", "c")),
            Placement::Appended
        );
        assert_eq!(messages[2].id, "m3");
    }

    #[test]
    fn reactions_are_unique_per_user_and_emoji() {
        let mut messages = vec![message("m1", "a")];
        assert!(add_reaction(&mut messages, "m1", reaction("u1", "+1")).expect("add"));
        assert!(!add_reaction(&mut messages, "m1", reaction("u1", "+1")).expect("add again"));
        assert!(add_reaction(&mut messages, "m1", reaction("u2", "+1")).expect("other user"));
        assert_eq!(messages[0].reactions.len(), 2);

        assert!(remove_reaction(&mut messages, "m1", "u1", "+1").expect("remove"));
        assert!(!remove_reaction(&mut messages, "m1", "u1", "+1").expect("remove again"));
        assert_eq!(messages[0].reactions, vec![reaction("u2", "+1")]);
    }

    #[test]
    fn reaction_on_missing_message_is_an_error() {
        let mut messages = vec![message("m1", "a")];
        let err = add_reaction(&mut messages, "nope", reaction("u1", "+1"))
            .expect_err("missing message must fail");
        assert_eq!(err, TimelineError::MissingMessage("nope".into()));
    }

    #[test]
    fn dedupes_repeated_ids() {
        let deduped = dedupe_messages(vec![
            message("m1", "first"),
            message("m2", "b"),
            message("m1", "second"),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].content, "second");
        assert_eq!(deduped[1].id, "m2");
    }
}
