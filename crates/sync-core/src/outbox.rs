use serde::{Deserialize, Serialize};

/// Message rendered locally before the server confirmed it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingMessage {
    /// Client-generated correlation ID, echoed back on the confirming event.
    pub client_txn_id: String,
    pub conversation_id: String,
    pub content: String,
    /// Client send time in milliseconds since Unix epoch.
    pub created_at_ms: u64,
}

/// Return `pending` with `message` appended, unless its txn id is already tracked.
pub fn record(pending: &[PendingMessage], message: PendingMessage) -> Vec<PendingMessage> {
    let mut next = pending.to_vec();
    if next
        .iter()
        .all(|entry| entry.client_txn_id != message.client_txn_id)
    {
        next.push(message);
    }
    next
}

/// Remove the entry confirmed by `client_txn_id`.
///
/// Returns `None` when no entry matches so callers can leave the slice untouched.
pub fn confirm(pending: &[PendingMessage], client_txn_id: &str) -> Option<Vec<PendingMessage>> {
    let index = pending
        .iter()
        .position(|entry| entry.client_txn_id == client_txn_id)?;
    let mut next = pending.to_vec();
    next.remove(index);
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(txn: &str, conversation_id: &str) -> PendingMessage {
        PendingMessage {
            client_txn_id: txn.to_owned(),
            conversation_id: conversation_id.to_owned(),
            content: format!("body-{txn}"),
            created_at_ms: 1,
        }
    }

    #[test]
    fn records_each_txn_once() {
        let first = record(&[], pending("t1", "c1"));
        let second = record(&first, pending("t1", "c1"));
        assert_eq!(second.len(), 1);

        let third = record(&second, pending("t2", "c1"));
        assert_eq!(third.len(), 2);
    }

    #[test]
    fn confirms_by_txn_id_only() {
        let mut same_body = pending("t2", "c1");
        same_body.content = "body-t1".into();
        let slice = vec![pending("t1", "c1"), same_body];

        let next = confirm(&slice, "t2").expect("t2 should be confirmed");
        assert_eq!(next, vec![pending("t1", "c1")]);
        assert!(confirm(&next, "missing").is_none());
    }
}
