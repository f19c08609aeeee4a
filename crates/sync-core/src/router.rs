use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use crate::{
    error::{SyncError, SyncErrorCategory},
    reconcile::{
        conversation::apply_conversation_update,
        message::{MessageOutcome, reconcile_message},
        presence::apply_user_status,
        reaction::{add_reaction, remove_reaction},
        receipt::apply_read_receipt,
        typing::{typing_end, typing_start},
    },
    store::{StateStore, StoreUpdate},
    types::{
        ConnectionState, Diagnostic, EngineEvent, EventKind, InboundEnvelope, InboundEvent, Message,
    },
};

/// What happened to one routed event.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The store changed; `revision` is the new store revision.
    Applied { revision: u64 },
    /// The typing set grew; a scroll request was emitted for the active conversation.
    AppliedWithScroll { revision: u64, conversation_id: String },
    /// Valid event that did not change anything.
    Unchanged,
    /// Message for a conversation the store does not know yet.
    NeedsConversation(Message),
    /// Frame could not be decoded or classified.
    Dropped(SyncError),
}

/// Parse one text frame into an envelope.
pub fn decode_frame(text: &str) -> Result<InboundEnvelope, SyncError> {
    serde_json::from_str(text).map_err(|err| {
        SyncError::new(
            SyncErrorCategory::Protocol,
            "invalid_frame",
            format!("push frame is not a valid envelope: {err}"),
        )
    })
}

/// Classify an envelope by kind and decode the kind's payload.
pub fn classify(envelope: InboundEnvelope) -> Result<InboundEvent, SyncError> {
    let kind: EventKind = envelope.event.parse()?;
    let payload = envelope.payload;
    let event = match kind {
        EventKind::Connect => InboundEvent::Connect,
        EventKind::Disconnect => InboundEvent::Disconnect,
        EventKind::Message => InboundEvent::Message(payload_as(kind, payload)?),
        EventKind::TypingStart => InboundEvent::TypingStart(payload_as(kind, payload)?),
        EventKind::TypingEnd => InboundEvent::TypingEnd(payload_as(kind, payload)?),
        EventKind::ReactionAdd => InboundEvent::ReactionAdd(payload_as(kind, payload)?),
        EventKind::ReactionRemove => InboundEvent::ReactionRemove(payload_as(kind, payload)?),
        EventKind::ReadReceipt => InboundEvent::ReadReceipt(payload_as(kind, payload)?),
        EventKind::UserStatus => InboundEvent::UserStatus(payload_as(kind, payload)?),
        EventKind::ConversationUpdate => {
            InboundEvent::ConversationUpdate(payload_as(kind, payload)?)
        }
        // Handshake frames only travel client -> server.
        EventKind::Auth => return Err(SyncError::unknown_event_kind(kind.as_str())),
    };
    Ok(event)
}

fn payload_as<T: DeserializeOwned>(kind: EventKind, payload: serde_json::Value) -> Result<T, SyncError> {
    serde_json::from_value(payload).map_err(|err| SyncError::malformed_event(kind.as_str(), err.to_string()))
}

/// Strict-order dispatcher from inbound events to reconcilers.
///
/// The router owns no state besides counters; every decision is made against
/// the store's current snapshot and committed as one update.
#[derive(Debug, Default)]
pub struct EventRouter {
    routed: u64,
    dropped: u64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routed(&self) -> u64 {
        self.routed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decode, classify and dispatch one raw text frame.
    pub fn route_frame(&mut self, store: &mut StateStore, text: &str) -> RouteOutcome {
        match decode_frame(text).and_then(classify) {
            Ok(event) => self.route(store, event),
            Err(err) => self.reject(store, err),
        }
    }

    /// Dispatch one classified event to exactly one reconciler.
    pub fn route(&mut self, store: &mut StateStore, event: InboundEvent) -> RouteOutcome {
        self.routed += 1;
        let kind = event.kind();
        let snapshot = store.state();
        trace!(%kind, revision = store.revision(), "routing inbound event");

        let update = match event {
            InboundEvent::Connect => {
                (snapshot.connection != ConnectionState::Connected)
                    .then(|| StoreUpdate::default().with_connection(ConnectionState::Connected))
            }
            InboundEvent::Disconnect => (snapshot.connection == ConnectionState::Connected)
                .then(|| StoreUpdate::default().with_connection(ConnectionState::Reconnecting)),
            InboundEvent::Message(message) => match reconcile_message(snapshot, message) {
                MessageOutcome::Applied(update) => Some(update),
                MessageOutcome::Unresolved(message) => {
                    debug!(
                        message_id = %message.id,
                        conversation_id = %message.conversation_id,
                        "message references unknown conversation"
                    );
                    return RouteOutcome::NeedsConversation(message);
                }
            },
            InboundEvent::TypingStart(payload) => {
                let Some(update) = typing_start(snapshot, &payload) else {
                    return RouteOutcome::Unchanged;
                };
                let revision = store.commit(update);
                store.bus().emit(EngineEvent::ScrollToLatest {
                    conversation_id: payload.conversation_id.clone(),
                });
                return RouteOutcome::AppliedWithScroll {
                    revision,
                    conversation_id: payload.conversation_id,
                };
            }
            InboundEvent::TypingEnd(payload) => typing_end(snapshot, &payload),
            InboundEvent::ReactionAdd(payload) => add_reaction(snapshot, &payload),
            InboundEvent::ReactionRemove(payload) => remove_reaction(snapshot, &payload),
            InboundEvent::ReadReceipt(payload) => apply_read_receipt(snapshot, &payload),
            InboundEvent::UserStatus(payload) => apply_user_status(snapshot, &payload),
            InboundEvent::ConversationUpdate(conversation) => {
                Some(apply_conversation_update(snapshot, conversation))
            }
        };

        match update {
            Some(update) => RouteOutcome::Applied {
                revision: store.commit(update),
            },
            None => {
                trace!(%kind, "event left state unchanged");
                RouteOutcome::Unchanged
            }
        }
    }

    /// Count, log and surface a frame that could not be classified.
    pub fn reject(&mut self, store: &StateStore, err: SyncError) -> RouteOutcome {
        self.dropped += 1;
        warn!(
            code = %err.code,
            error = %err.message,
            dropped = self.dropped,
            "dropping inbound frame"
        );
        store.bus().emit(EngineEvent::Warning(Diagnostic::from(&err)));
        RouteOutcome::Dropped(err)
    }
}
