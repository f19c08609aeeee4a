use crate::{
    store::{ChatSnapshot, StoreUpdate},
    types::ReadReceiptPayload,
};

/// `read_receipt`: remember the last message each user read per conversation.
pub fn apply_read_receipt(snapshot: &ChatSnapshot, payload: &ReadReceiptPayload) -> Option<StoreUpdate> {
    let current = snapshot
        .read_receipts
        .get(&payload.conversation_id)
        .and_then(|by_user| by_user.get(&payload.user_id));
    if current == Some(&payload.last_read_message_id) {
        return None;
    }

    let mut receipts = snapshot.read_receipts.clone();
    receipts
        .entry(payload.conversation_id.clone())
        .or_default()
        .insert(payload.user_id.clone(), payload.last_read_message_id.clone());
    Some(StoreUpdate::default().with_read_receipts(receipts))
}
