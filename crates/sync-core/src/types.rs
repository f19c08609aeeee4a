use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    error::SyncError,
    normalization::normalize_conversation,
    store::{ChatSnapshot, StoreSlice},
};

/// Directory entry for one chat participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct User {
    /// Stable user ID.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Avatar URL or asset reference (may be empty).
    #[serde(default)]
    pub avatar: String,
    /// Presence flag, written only by presence reconciliation.
    #[serde(default, alias = "isOnline")]
    pub is_online: bool,
}

impl User {
    /// Placeholder entry for a user ID that is not in the directory.
    pub fn unresolved(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Emoji reaction attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    /// Emoji as sent by the client.
    pub emoji: String,
    /// Reacting user.
    pub user: User,
}

/// Message content kind (`type` on the wire).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Image attachment message.
    Image,
    /// Generic file attachment message.
    File,
    /// Server-generated notice.
    System,
    /// Plain text. Unknown wire values also decode here.
    #[default]
    #[serde(other)]
    Text,
}

/// One chat message. Immutable apart from its reaction list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Message ID, unique within its conversation.
    pub id: String,
    /// Message body.
    #[serde(default)]
    pub content: String,
    /// Sender, absent for system messages.
    #[serde(default)]
    pub sender: Option<User>,
    /// Server creation time (RFC 3339, kept opaque).
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
    /// Owning conversation ID.
    #[serde(default, alias = "conversationId")]
    pub conversation_id: String,
    /// Reactions in arrival order.
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Content kind.
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    /// Client correlation ID echoed by the server for messages this client sent.
    #[serde(
        default,
        alias = "clientTxnId",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_txn_id: Option<String>,
}

/// Conversation as held by the store.
///
/// Deserialization goes through [`ConversationPayload`] so every conversation
/// entering the engine is normalized (see [`normalize_conversation`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "ConversationPayload")]
pub struct Conversation {
    /// Conversation ID, unique in the store.
    pub id: String,
    /// Display name (may be empty for direct conversations).
    pub name: String,
    /// Members; `None` marks an entry the server could not resolve.
    pub members: Vec<Option<User>>,
    /// Messages in arrival order.
    pub messages: Vec<Message>,
    /// Tail of `messages`, or the server summary when no messages are loaded.
    pub last_message: Option<Message>,
    /// Group conversation flag.
    pub is_group: bool,
}

impl Conversation {
    /// Whether `user_id` is a resolved member of this conversation.
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members
            .iter()
            .flatten()
            .any(|member| member.id == user_id)
    }

    /// Look up a message by ID.
    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }
}

/// Wire form of a conversation (REST bodies and `conversation_update` payloads).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationPayload {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub members: Vec<Option<User>>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, alias = "lastMessage")]
    pub last_message: Option<Message>,
    #[serde(default, alias = "isGroup")]
    pub is_group: Option<bool>,
}

impl From<ConversationPayload> for Conversation {
    fn from(payload: ConversationPayload) -> Self {
        normalize_conversation(payload)
    }
}

/// Payload of `typing_start` / `typing_end`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingPayload {
    #[serde(rename = "conversationId", alias = "conversation_id")]
    pub conversation_id: String,
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
}

/// Presence value carried by `user_status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Payload of `user_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStatusPayload {
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
    /// Missing status means a name-only update.
    #[serde(default)]
    pub status: Option<PresenceStatus>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Payload of `reaction_add` / `reaction_remove`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionPayload {
    #[serde(rename = "messageId", alias = "message_id")]
    pub message_id: String,
    #[serde(rename = "conversationId", alias = "conversation_id")]
    pub conversation_id: String,
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
    pub emoji: String,
}

/// Payload of `read_receipt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceiptPayload {
    #[serde(rename = "conversationId", alias = "conversation_id")]
    pub conversation_id: String,
    #[serde(rename = "userId", alias = "user_id")]
    pub user_id: String,
    #[serde(rename = "lastReadMessageId", alias = "last_read_message_id")]
    pub last_read_message_id: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Event kinds shared by the inbound and outbound envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connect,
    Disconnect,
    Message,
    TypingStart,
    TypingEnd,
    ReactionAdd,
    ReactionRemove,
    ReadReceipt,
    UserStatus,
    ConversationUpdate,
    /// Client-to-server authentication handshake.
    Auth,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Message => "message",
            Self::TypingStart => "typing_start",
            Self::TypingEnd => "typing_end",
            Self::ReactionAdd => "reaction_add",
            Self::ReactionRemove => "reaction_remove",
            Self::ReadReceipt => "read_receipt",
            Self::UserStatus => "user_status",
            Self::ConversationUpdate => "conversation_update",
            Self::Auth => "auth",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let kind = match value {
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "message" => Self::Message,
            "typing_start" => Self::TypingStart,
            "typing_end" => Self::TypingEnd,
            "reaction_add" => Self::ReactionAdd,
            "reaction_remove" => Self::ReactionRemove,
            "read_receipt" => Self::ReadReceipt,
            "user_status" => Self::UserStatus,
            "conversation_update" => Self::ConversationUpdate,
            "auth" => Self::Auth,
            other => return Err(SyncError::unknown_event_kind(other)),
        };
        Ok(kind)
    }
}

/// Raw inbound frame `{ event, payload, timestamp }` before classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Server timestamp in milliseconds since Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

/// Outbound frame emitted by the intent emitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundEnvelope {
    pub event: EventKind,
    pub payload: serde_json::Value,
    /// Client timestamp in milliseconds since Unix epoch.
    pub timestamp: u64,
}

/// Classified inbound event, one variant per routed kind.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connect,
    Disconnect,
    Message(Message),
    TypingStart(TypingPayload),
    TypingEnd(TypingPayload),
    ReactionAdd(ReactionPayload),
    ReactionRemove(ReactionPayload),
    ReadReceipt(ReadReceiptPayload),
    UserStatus(UserStatusPayload),
    ConversationUpdate(Conversation),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connect => EventKind::Connect,
            Self::Disconnect => EventKind::Disconnect,
            Self::Message(_) => EventKind::Message,
            Self::TypingStart(_) => EventKind::TypingStart,
            Self::TypingEnd(_) => EventKind::TypingEnd,
            Self::ReactionAdd(_) => EventKind::ReactionAdd,
            Self::ReactionRemove(_) => EventKind::ReactionRemove,
            Self::ReadReceipt(_) => EventKind::ReadReceipt,
            Self::UserStatus(_) => EventKind::UserStatus,
            Self::ConversationUpdate(_) => EventKind::ConversationUpdate,
        }
    }
}

/// Push-channel connection lifecycle reported to the rendering layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Transport has not been started.
    #[default]
    Idle,
    /// A socket dial is in progress.
    Connecting,
    /// Socket is open; waiting for the server to accept the handshake.
    Authenticating,
    /// Handshake completed; outbound intents are accepted.
    Connected,
    /// Connection dropped; waiting for the next reconnect attempt.
    Reconnecting,
    /// Reconnect attempts exhausted.
    Failed,
    /// Transport torn down (sign-out).
    Closed,
}

/// Non-fatal diagnostic surfaced to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
    /// Server-provided wait before retrying, when the failure was rate limited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl Diagnostic {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Carry the retry hint of the error that caused this diagnostic.
    pub fn caused_by(mut self, error: &SyncError) -> Self {
        self.retry_after_ms = error.retry_after_ms;
        self
    }
}

impl From<&SyncError> for Diagnostic {
    fn from(error: &SyncError) -> Self {
        Self::new(error.code.clone(), error.message.clone()).caused_by(error)
    }
}

/// Events fanned out to engine subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// One logical store update was committed.
    StateChanged {
        /// Slices replaced by this update.
        slices: Vec<StoreSlice>,
        /// Store revision after the update.
        revision: u64,
        /// Full snapshot after the update.
        snapshot: Arc<ChatSnapshot>,
    },
    /// Message sink should scroll its latest message into view.
    ScrollToLatest {
        /// Conversation the sink is showing.
        conversation_id: String,
    },
    /// Degraded-state warning (baseline partial failure, dropped event, ...).
    Warning(Diagnostic),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_message_with_wire_field_names() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "content": "hi",
            "sender": {"id": "u1", "name": "Ann", "avatar": "", "isOnline": true},
            "created_at": "2024-05-01T10:00:00Z",
            "conversation_id": "c1",
            "reactions": [],
            "type": "text"
        }))
        .expect("message should decode");

        assert_eq!(message.conversation_id, "c1");
        assert_eq!(message.kind, MessageKind::Text);
        assert!(message.sender.expect("sender").is_online);
        assert_eq!(message.client_txn_id, None);
    }

    #[test]
    fn unknown_message_type_decodes_as_text() {
        let message: Message = serde_json::from_value(serde_json::json!({
            "id": "m1",
            "conversation_id": "c1",
            "type": "sticker"
        }))
        .expect("message should decode");
        assert_eq!(message.kind, MessageKind::Text);

        let image: Message = serde_json::from_value(serde_json::json!({
            "id": "m2",
            "conversation_id": "c1",
            "type": "image"
        }))
        .expect("image message should decode");
        assert_eq!(image.kind, MessageKind::Image);
        assert_eq!(
            serde_json::to_value(MessageKind::Text).expect("kind should encode"),
            serde_json::json!("text")
        );
    }

    #[test]
    fn conversation_keeps_unresolved_members() {
        let conversation: Conversation = serde_json::from_value(serde_json::json!({
            "id": "c1",
            "name": "Team",
            "members": [{"id": "a", "name": "A"}, null, {"id": "b", "name": "B"}],
            "messages": []
        }))
        .expect("conversation should decode");

        assert_eq!(conversation.members.len(), 3);
        assert!(conversation.members[1].is_none());
        assert!(conversation.has_member("b"));
        assert!(conversation.is_group);
    }

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in [
            EventKind::Message,
            EventKind::TypingStart,
            EventKind::ReadReceipt,
            EventKind::ConversationUpdate,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>().expect("parse"), kind);
        }

        let err = "presence_ping"
            .parse::<EventKind>()
            .expect_err("unknown kind must fail");
        assert_eq!(err.code, "unknown_event_kind");
    }

    #[test]
    fn outbound_envelope_uses_snake_case_kind() {
        let envelope = OutboundEnvelope {
            event: EventKind::TypingStart,
            payload: serde_json::json!({"conversationId": "c1"}),
            timestamp: 1,
        };
        let encoded = serde_json::to_value(&envelope).expect("encode");
        assert_eq!(encoded["event"], "typing_start");
    }
}
