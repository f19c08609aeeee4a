use std::sync::Arc;

use tracing::debug;

use super::{resolve_conversation, upsert_conversation};
use crate::{
    outbox,
    store::{ChatSnapshot, StoreUpdate},
    timeline::{Placement, upsert_message},
    types::{Conversation, Message},
};

/// Result of reconciling one `message` event.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Target conversation resolved; commit the update.
    Applied(StoreUpdate),
    /// Neither the list nor the active conversation knows the target.
    /// The caller decides whether to fetch it.
    Unresolved(Message),
}

/// Reconcile one inbound message against the current snapshot.
pub fn reconcile_message(snapshot: &ChatSnapshot, message: Message) -> MessageOutcome {
    let Some(target) = resolve_conversation(snapshot, &message.conversation_id) else {
        return MessageOutcome::Unresolved(message);
    };
    let target = Arc::clone(target);
    MessageOutcome::Applied(merge_into(snapshot, &target, vec![message]))
}

/// Apply messages that waited on a fallback fetch.
///
/// If the conversation reached the list by another path while the fetch was
/// in flight, that entry wins over `fetched`. Messages are applied in the
/// order given.
pub fn apply_fetched(
    snapshot: &ChatSnapshot,
    fetched: Conversation,
    buffered: Vec<Message>,
) -> StoreUpdate {
    let base = match resolve_conversation(snapshot, &fetched.id) {
        Some(existing) => {
            debug!(
                conversation_id = %fetched.id,
                "conversation arrived before fallback fetch; keeping list entry"
            );
            Arc::clone(existing)
        }
        None => Arc::new(fetched),
    };
    merge_into(snapshot, &base, buffered)
}

/// Write `messages` into `base`, upsert the result and confirm any optimistic
/// entries the messages carry a correlation ID for.
///
/// `last_message` follows arrival order: it is the last message written here,
/// even when a redelivery kept an older position in the list.
fn merge_into(snapshot: &ChatSnapshot, base: &Conversation, messages: Vec<Message>) -> StoreUpdate {
    let mut updated = base.clone();
    let mut pending = None::<Vec<_>>;

    for message in messages {
        if let Some(txn_id) = message.client_txn_id.as_deref()
            && let Some(next) = outbox::confirm(
                pending.as_deref().unwrap_or(snapshot.pending_messages.as_slice()),
                txn_id,
            )
        {
            debug!(client_txn_id = txn_id, message_id = %message.id, "optimistic send confirmed");
            pending = Some(next);
        }

        let message_id = message.id.clone();
        updated.last_message = Some(message.clone());
        match upsert_message(&mut updated.messages, message) {
            Placement::Appended => {
                debug!(conversation_id = %updated.id, %message_id, "message appended");
            }
            Placement::Replaced { index } => {
                debug!(conversation_id = %updated.id, %message_id, index, "redelivered message replaced");
            }
        }
    }

    let mut update = upsert_conversation(snapshot, Arc::new(updated));
    if let Some(pending) = pending {
        update = update.with_pending_messages(pending);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{outbox::PendingMessage, reconcile::fixtures::*, store::StoreSlice};

    fn applied(outcome: MessageOutcome) -> StoreUpdate {
        match outcome {
            MessageOutcome::Applied(update) => update,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    fn commit(snapshot: &ChatSnapshot, update: StoreUpdate) -> ChatSnapshot {
        let mut next = snapshot.clone();
        if let Some(conversations) = update.conversations {
            next.conversations = conversations;
        }
        if let Some(active) = update.active_conversation {
            next.active_conversation = active;
        }
        if let Some(pending) = update.pending_messages {
            next.pending_messages = pending;
        }
        next
    }

    #[test]
    fn appends_new_message_and_moves_last_message() {
        let snapshot = snapshot();
        let update = applied(reconcile_message(&snapshot, message("m2", "c1", "b")));
        let next = commit(&snapshot, update);

        let c1 = next.conversation("c1").expect("c1 should exist");
        let ids: Vec<_> = c1.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(c1.last_message.as_ref().expect("last").id, "m2");
        assert_eq!(next.active_conversation.as_deref(), Some(&**c1));
    }

    #[test]
    fn replayed_message_is_not_duplicated() {
        let snapshot = snapshot();
        let once = commit(
            &snapshot,
            applied(reconcile_message(&snapshot, message("m2", "c1", "b"))),
        );
        let twice = commit(
            &once,
            applied(reconcile_message(&once, message("m2", "c1", "b"))),
        );

        let c1 = twice.conversation("c1").expect("c1 should exist");
        assert_eq!(c1.messages.len(), 2);
        assert_eq!(c1.messages[1].id, "m2");
        assert_eq!(c1.last_message.as_ref().expect("last").id, "m2");
    }

    #[test]
    fn duplicate_keeps_its_position() {
        let snapshot = snapshot();
        let next = commit(
            &snapshot,
            applied(reconcile_message(&snapshot, message("m2", "c1", "b"))),
        );
        let replay = commit(
            &next,
            applied(reconcile_message(&next, message("m1", "c1", "a"))),
        );
        let c1 = replay.conversation("c1").expect("c1");
        assert_eq!(c1.messages[0].id, "m1");
        assert_eq!(c1.messages.len(), 2);
    }

    #[test]
    fn redelivered_older_message_becomes_last_message() {
        let snapshot = snapshot();
        let next = commit(
            &snapshot,
            applied(reconcile_message(&snapshot, message("m2", "c1", "b"))),
        );
        let replay = commit(
            &next,
            applied(reconcile_message(&next, message("m1", "c1", "a"))),
        );

        let c1 = replay.conversation("c1").expect("c1");
        let ids: Vec<_> = c1.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(c1.last_message.as_ref().expect("last").id, "m1");
        assert_eq!(
            replay.active_conversation.as_ref().expect("active").last_message,
            c1.last_message
        );
    }

    #[test]
    fn other_conversations_stay_referentially_unchanged() {
        let snapshot = snapshot();
        let update = applied(reconcile_message(&snapshot, message("m2", "c1", "b")));
        let conversations = update.conversations.expect("list should be replaced");
        assert!(Arc::ptr_eq(&conversations[1], &snapshot.conversations[1]));
    }

    #[test]
    fn message_for_inactive_conversation_leaves_active_alone() {
        let snapshot = snapshot();
        let update = applied(reconcile_message(&snapshot, message("x1", "c2", "c")));
        assert!(update.active_conversation.is_none());
        assert_eq!(update.slices(), vec![StoreSlice::Conversations]);
    }

    #[test]
    fn unknown_conversation_is_unresolved() {
        let snapshot = snapshot();
        match reconcile_message(&snapshot, message("z1", "c404", "b")) {
            MessageOutcome::Unresolved(message) => assert_eq!(message.id, "z1"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn active_fallback_inserts_into_list() {
        let mut snapshot = snapshot();
        let orphan = conversation("c7", &["a", "b"], Vec::new());
        snapshot.active_conversation = Some(orphan);

        let next = commit(
            &snapshot,
            applied(reconcile_message(&snapshot, message("n1", "c7", "b"))),
        );
        assert_eq!(next.conversations.len(), 3);
        assert_eq!(
            next.active_conversation.expect("active").messages[0].id,
            "n1"
        );
    }

    #[test]
    fn correlation_id_confirms_pending_entry() {
        let mut snapshot = snapshot();
        snapshot.pending_messages = vec![PendingMessage {
            client_txn_id: "txn-1".into(),
            conversation_id: "c1".into(),
            content: "hello".into(),
            created_at_ms: 1,
        }];
        let mut echoed = message("m2", "c1", "a");
        echoed.client_txn_id = Some("txn-1".into());

        let update = applied(reconcile_message(&snapshot, echoed));
        assert_eq!(update.pending_messages, Some(Vec::new()));
    }

    #[test]
    fn fetched_conversation_applies_buffered_messages_in_order() {
        let snapshot = snapshot();
        let fetched = (*conversation("c5", &["a", "d"], vec![message("f1", "c5", "d")])).clone();

        let next = commit(
            &snapshot,
            apply_fetched(
                &snapshot,
                fetched,
                vec![message("f2", "c5", "d"), message("f3", "c5", "a")],
            ),
        );
        let c5 = next.conversation("c5").expect("c5 should be inserted");
        let ids: Vec<_> = c5.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);
        assert_eq!(c5.last_message.as_ref().expect("last").id, "f3");
    }

    #[test]
    fn list_entry_wins_over_fetched_copy() {
        let snapshot = snapshot();
        let stale = Conversation {
            name: "stale".into(),
            ..(*snapshot.conversations[1]).clone()
        };

        let update = apply_fetched(&snapshot, stale, vec![message("x1", "c2", "c")]);
        let conversations = update.conversations.expect("list");
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[1].name, "C2");
        assert_eq!(conversations[1].messages.len(), 1);
    }
}
