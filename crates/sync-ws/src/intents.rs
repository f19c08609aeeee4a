use std::time::{SystemTime, UNIX_EPOCH};

use sync_core::{
    ChannelError, ConnectionState, Intent, IntentQueue, OutboundEnvelope, SyncError,
    SyncErrorCategory, state_machine::accepts_intents,
};
use tokio::sync::watch;
use tracing::debug;

/// Turns user actions into outbound envelopes on the transport queue.
///
/// Never touches the store. Rejects everything unless the transport reports
/// `Connected`, i.e. the auth handshake of the current connection completed.
#[derive(Clone, Debug)]
pub(crate) struct IntentEmitter {
    user_id: String,
    queue: IntentQueue,
    connection: watch::Receiver<ConnectionState>,
}

impl IntentEmitter {
    pub(crate) fn new(
        user_id: impl Into<String>,
        queue: IntentQueue,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            queue,
            connection,
        }
    }

    pub(crate) fn emit(&self, intent: Intent) -> Result<OutboundEnvelope, SyncError> {
        let state = *self.connection.borrow();
        if !accepts_intents(state) {
            return Err(SyncError::not_connected(state));
        }

        let envelope = intent.into_envelope(&self.user_id, now_ms())?;
        self.queue
            .enqueue(envelope.clone())
            .map_err(|err| map_channel_error(err, state))?;
        debug!(event = %envelope.event, "intent queued");
        Ok(envelope)
    }
}

fn map_channel_error(err: ChannelError, state: ConnectionState) -> SyncError {
    match err {
        ChannelError::IntentQueueClosed => SyncError::not_connected(state),
        ChannelError::IntentQueueFull => SyncError::new(
            SyncErrorCategory::RateLimited,
            "intent_queue_full",
            "outbound intent queue is full",
        ),
    }
}

/// Unix time in milliseconds; clamps to 0 if the clock is before the epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
