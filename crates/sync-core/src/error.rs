use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Referenced conversation, user or message is not known.
    NotFound,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the server.
    RateLimited,
    /// Malformed or unrecognized push event.
    Protocol,
    /// Serialization/deserialization failure.
    Serialization,
    /// Internal engine bug or invariant break.
    Internal,
}

/// Stable error payload used across the engine boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SyncError {
    /// High-level error category.
    pub category: SyncErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SyncError {
    /// Construct a new error.
    pub fn new(
        category: SyncErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SyncErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is in state {current:?}"),
        )
    }

    /// Intent submitted while the push channel is not authenticated.
    pub fn not_connected(current: ConnectionState) -> Self {
        Self::new(
            SyncErrorCategory::Network,
            "not_connected",
            format!("outbound intents are not accepted while connection is {current:?}"),
        )
    }

    pub fn unknown_event_kind(kind: &str) -> Self {
        Self::new(
            SyncErrorCategory::Protocol,
            "unknown_event_kind",
            format!("unrecognized event kind '{kind}'"),
        )
    }

    pub fn malformed_event(kind: &str, detail: impl Into<String>) -> Self {
        Self::new(
            SyncErrorCategory::Protocol,
            "malformed_event",
            format!("malformed '{kind}' payload: {}", detail.into()),
        )
    }

    pub fn conversation_not_found(conversation_id: &str) -> Self {
        Self::new(
            SyncErrorCategory::NotFound,
            "conversation_not_found",
            format!("conversation not found: {conversation_id}"),
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> SyncErrorCategory {
    match status {
        401 | 403 => SyncErrorCategory::Auth,
        404 | 410 => SyncErrorCategory::NotFound,
        408 | 429 => SyncErrorCategory::RateLimited,
        400..=499 => SyncErrorCategory::Config,
        500..=599 => SyncErrorCategory::Network,
        _ => SyncErrorCategory::Internal,
    }
}
