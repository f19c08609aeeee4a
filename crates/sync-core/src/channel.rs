use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{EngineEvent, OutboundEnvelope};

/// Broadcast event stream type used by rendering-layer subscribers.
pub type EventStream = broadcast::Receiver<EngineEvent>;

/// Errors returned by engine channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The transport side of the intent queue is gone.
    #[error("intent queue is closed")]
    IntentQueueClosed,
    /// The intent queue is at capacity.
    #[error("intent queue is full")]
    IntentQueueFull,
}

/// Fan-out bus for [`EngineEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    event_tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer.
    pub fn new(buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted engine events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Ordered queue of outbound envelopes, drained by the transport writer.
#[derive(Clone, Debug)]
pub struct IntentQueue {
    intent_tx: mpsc::Sender<OutboundEnvelope>,
}

impl IntentQueue {
    /// Create a queue and return it with the transport-side receiver.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<OutboundEnvelope>) {
        let (intent_tx, intent_rx) = mpsc::channel(buffer.max(1));
        (Self { intent_tx }, intent_rx)
    }

    /// Enqueue without waiting; a full queue is reported instead of blocking the caller.
    pub fn enqueue(&self, envelope: OutboundEnvelope) -> Result<(), ChannelError> {
        self.intent_tx.try_send(envelope).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => ChannelError::IntentQueueFull,
            mpsc::error::TrySendError::Closed(_) => ChannelError::IntentQueueClosed,
        })
    }
}
