use serde::{Deserialize, Serialize};

use crate::{
    error::{SyncError, SyncErrorCategory},
    types::{EventKind, OutboundEnvelope, ReactionPayload, ReadReceiptPayload, TypingPayload},
};

/// File attached to an outbound message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    /// `image` or `file`.
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Payload of an outbound `message` intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub conversation_id: String,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub sender_id: String,
    pub timestamp: u64,
    pub client_txn_id: String,
}

/// User actions the engine can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SendMessage {
        conversation_id: String,
        content: String,
        attachments: Vec<Attachment>,
        client_txn_id: String,
    },
    TypingStart {
        conversation_id: String,
    },
    TypingEnd {
        conversation_id: String,
    },
    AddReaction {
        conversation_id: String,
        message_id: String,
        emoji: String,
    },
    RemoveReaction {
        conversation_id: String,
        message_id: String,
        emoji: String,
    },
    ReadReceipt {
        conversation_id: String,
        message_id: String,
    },
}

impl Intent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SendMessage { .. } => EventKind::Message,
            Self::TypingStart { .. } => EventKind::TypingStart,
            Self::TypingEnd { .. } => EventKind::TypingEnd,
            Self::AddReaction { .. } => EventKind::ReactionAdd,
            Self::RemoveReaction { .. } => EventKind::ReactionRemove,
            Self::ReadReceipt { .. } => EventKind::ReadReceipt,
        }
    }

    /// Wrap the intent in the canonical `{event, payload, timestamp}` envelope
    /// on behalf of `user_id`.
    pub fn into_envelope(self, user_id: &str, now_ms: u64) -> Result<OutboundEnvelope, SyncError> {
        let event = self.kind();
        let payload = match self {
            Self::SendMessage {
                conversation_id,
                content,
                attachments,
                client_txn_id,
            } => serde_json::to_value(OutboundMessage {
                conversation_id,
                content,
                attachments,
                sender_id: user_id.to_owned(),
                timestamp: now_ms,
                client_txn_id,
            }),
            Self::TypingStart { conversation_id } | Self::TypingEnd { conversation_id } => {
                serde_json::to_value(TypingPayload {
                    conversation_id,
                    user_id: user_id.to_owned(),
                })
            }
            Self::AddReaction {
                conversation_id,
                message_id,
                emoji,
            }
            | Self::RemoveReaction {
                conversation_id,
                message_id,
                emoji,
            } => serde_json::to_value(ReactionPayload {
                message_id,
                conversation_id,
                user_id: user_id.to_owned(),
                emoji,
            }),
            Self::ReadReceipt {
                conversation_id,
                message_id,
            } => serde_json::to_value(ReadReceiptPayload {
                conversation_id,
                user_id: user_id.to_owned(),
                last_read_message_id: message_id,
                timestamp: Some(now_ms),
            }),
        }
        .map_err(|err| {
            SyncError::new(
                SyncErrorCategory::Serialization,
                "intent_encode_failed",
                format!("failed to encode {event} intent: {err}"),
            )
        })?;

        Ok(OutboundEnvelope {
            event,
            payload,
            timestamp: now_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_intent_carries_sender_and_correlation_id() {
        let envelope = Intent::SendMessage {
            conversation_id: "c1".into(),
            content: "hello".into(),
            attachments: Vec::new(),
            client_txn_id: "txn-1".into(),
        }
        .into_envelope("u1", 42)
        .expect("encode should work");

        assert_eq!(envelope.event, EventKind::Message);
        assert_eq!(envelope.timestamp, 42);
        assert_eq!(envelope.payload["conversationId"], "c1");
        assert_eq!(envelope.payload["senderId"], "u1");
        assert_eq!(envelope.payload["clientTxnId"], "txn-1");
        assert_eq!(envelope.payload["attachments"], serde_json::json!([]));
    }

    #[test]
    fn typing_and_reaction_payloads_use_wire_names() {
        let typing = Intent::TypingEnd {
            conversation_id: "c1".into(),
        }
        .into_envelope("u1", 1)
        .expect("encode");
        assert_eq!(
            typing.payload,
            serde_json::json!({"conversationId": "c1", "userId": "u1"})
        );

        let reaction = Intent::RemoveReaction {
            conversation_id: "c1".into(),
            message_id: "m1".into(),
            emoji: "+1".into(),
        }
        .into_envelope("u1", 1)
        .expect("encode");
        assert_eq!(reaction.event, EventKind::ReactionRemove);
        assert_eq!(reaction.payload["messageId"], "m1");
        assert_eq!(reaction.payload["userId"], "u1");
    }

    #[test]
    fn read_receipt_uses_last_read_message_id() {
        let envelope = Intent::ReadReceipt {
            conversation_id: "c1".into(),
            message_id: "m9".into(),
        }
        .into_envelope("u1", 7)
        .expect("encode");
        assert_eq!(envelope.payload["lastReadMessageId"], "m9");
        assert_eq!(envelope.payload["timestamp"], 7);
    }

    #[test]
    fn attachment_serializes_type_field() {
        let attachment = Attachment {
            id: "a1".into(),
            kind: "image".into(),
            url: "https://cdn.example/a1.png".into(),
            name: "a1.png".into(),
            size: None,
            mime_type: Some("image/png".into()),
        };
        let encoded = serde_json::to_value(&attachment).expect("encode");
        assert_eq!(encoded["type"], "image");
        assert_eq!(encoded["mimeType"], "image/png");
        assert!(encoded.get("size").is_none());
    }
}
