//! Transport-free core of the chat sync engine.
//!
//! This crate defines the push-channel protocol, the State Store with its
//! subscribe/notify mechanism, the Event Router and the reconcilers that turn
//! one inbound event into one store update, plus lifecycle, reconnect and
//! optimistic-outbox helpers shared with the runtime.

/// Subscriber fan-out and outbound intent queue primitives.
pub mod channel;
/// Stable engine error types and HTTP classification helpers.
pub mod error;
/// Outbound user actions and their wire envelopes.
pub mod intent;
/// Conversation normalization applied to every wire conversation.
pub mod normalization;
/// Optimistic send tracking keyed by client correlation ID.
pub mod outbox;
/// Pure per-event reconcilers.
pub mod reconcile;
/// Fixed-interval reconnect policy.
pub mod retry;
/// Inbound frame decoding and strict-order dispatch.
pub mod router;
/// Push-channel lifecycle state machine.
pub mod state_machine;
/// Canonical snapshot, slice updates and subscribe/notify.
pub mod store;
/// Message-list edit helpers (dedupe, reactions).
pub mod timeline;
/// Wire and engine-facing protocol types.
pub mod types;

pub use channel::{ChannelError, EventBus, EventStream, IntentQueue};
pub use error::{SyncError, SyncErrorCategory, classify_http_status};
pub use intent::{Attachment, Intent, OutboundMessage};
pub use outbox::PendingMessage;
pub use retry::ReconnectPolicy;
pub use router::{EventRouter, RouteOutcome};
pub use state_machine::{ConnectionSignal, ConnectionStateMachine};
pub use store::{ChatSnapshot, ReadReceipts, StateStore, StoreSlice, StoreUpdate};
pub use timeline::{Placement, TimelineError};
pub use types::{
    Conversation, ConversationPayload, ConnectionState, Diagnostic, EngineEvent, EventKind,
    InboundEnvelope, InboundEvent, Message, MessageKind, OutboundEnvelope, PresenceStatus,
    Reaction, ReactionPayload, ReadReceiptPayload, TypingPayload, User, UserStatusPayload,
};
