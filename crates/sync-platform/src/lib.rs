//! Request/response collaborators consumed by the sync engine.
//!
//! The engine only depends on [`ChatApi`] and [`TokenSource`]; the HTTP
//! implementation lives behind the `http` feature and [`InMemoryChatApi`]
//! backs tests and offline runs.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sync_core::{Conversation, SyncError, SyncErrorCategory, User, classify_http_status};
use thiserror::Error;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::HttpChatApi;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("resource not found")]
    NotFound,
    #[error("request layer unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected with status {status}: {message}")]
    Status { status: u16, message: String },
    /// HTTP 429; `retry_after_ms` comes from the `Retry-After` header.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after_ms: Option<u64>,
        message: String,
    },
    #[error("response could not be decoded: {0}")]
    Decode(String),
    #[error("request layer backend failure: {0}")]
    Backend(String),
}

impl ApiError {
    /// Map to the engine taxonomy, tagging the failed operation.
    pub fn into_sync_error(self, operation: ApiOperation) -> SyncError {
        let (category, code) = match &self {
            Self::NotFound => (SyncErrorCategory::NotFound, "not_found"),
            Self::Unavailable(_) => (SyncErrorCategory::Network, "request_unavailable"),
            Self::Status { status, .. } => (classify_http_status(*status), "request_rejected"),
            Self::RateLimited { .. } => (SyncErrorCategory::RateLimited, "rate_limited"),
            Self::Decode(_) => (SyncErrorCategory::Serialization, "response_decode_failed"),
            Self::Backend(_) => (SyncErrorCategory::Internal, "request_failed"),
        };
        let err = SyncError::new(category, code, format!("{}: {self}", operation.as_str()));
        match self {
            Self::RateLimited {
                retry_after_ms: Some(wait),
                ..
            } => err.with_retry_after(Duration::from_millis(wait)),
            _ => err,
        }
    }
}

/// Collaborator calls, used for diagnostics and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiOperation {
    FetchConversations,
    FetchUsers,
    FetchCurrentUser,
    FetchConversationById,
    CreateConversation,
    JoinConversation,
    UpdateProfile,
}

impl ApiOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchConversations => "fetch_conversations",
            Self::FetchUsers => "fetch_users",
            Self::FetchCurrentUser => "fetch_current_user",
            Self::FetchConversationById => "fetch_conversation_by_id",
            Self::CreateConversation => "create_conversation",
            Self::JoinConversation => "join_conversation",
            Self::UpdateProfile => "update_profile",
        }
    }
}

/// Body of a create-conversation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewConversation {
    /// Every member including the creator.
    pub members: Vec<String>,
    pub name: String,
}

/// Body of a profile update request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: String,
}

/// Request layer the engine talks to. Retries, if any, are the implementor's business.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    async fn fetch_users(&self) -> Result<Vec<User>, ApiError>;

    async fn fetch_current_user(&self) -> Result<User, ApiError>;

    /// `ApiError::NotFound` when the conversation does not exist or is not
    /// visible to this user yet.
    async fn fetch_conversation_by_id(&self, conversation_id: &str) -> Result<Conversation, ApiError>;

    async fn create_conversation(&self, request: NewConversation) -> Result<Conversation, ApiError>;

    async fn join_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError>;

    async fn update_profile(&self, update: ProfileUpdate) -> Result<User, ApiError>;
}

/// Bearer token provider; issuance and refresh happen elsewhere.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<String, ApiError>;
}

#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Result<String, ApiError> {
        if self.0.is_empty() {
            return Err(ApiError::Unavailable("no access token configured".to_owned()));
        }
        Ok(self.0.clone())
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    conversations: Vec<Conversation>,
    users: Vec<User>,
    current_user: Option<User>,
    failures: HashMap<ApiOperation, ApiError>,
    calls: HashMap<ApiOperation, usize>,
}

/// In-process [`ChatApi`] with failure injection and call counting.
#[derive(Clone, Default)]
pub struct InMemoryChatApi {
    data: Arc<RwLock<MemoryState>>,
    latency: Option<Duration>,
}

impl InMemoryChatApi {
    pub fn new(current_user: User) -> Self {
        let api = Self::default();
        if let Ok(mut data) = api.data.write() {
            data.users.push(current_user.clone());
            data.current_user = Some(current_user);
        }
        api
    }

    /// Delay every call by `latency` (lets tests interleave push events).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert_user(&self, user: User) -> Result<(), ApiError> {
        let mut data = self.write()?;
        data.users.retain(|existing| existing.id != user.id);
        data.users.push(user);
        Ok(())
    }

    pub fn insert_conversation(&self, conversation: Conversation) -> Result<(), ApiError> {
        let mut data = self.write()?;
        data.conversations
            .retain(|existing| existing.id != conversation.id);
        data.conversations.push(conversation);
        Ok(())
    }

    /// Make every later call to `operation` fail with `error`.
    pub fn fail(&self, operation: ApiOperation, error: ApiError) -> Result<(), ApiError> {
        self.write()?.failures.insert(operation, error);
        Ok(())
    }

    pub fn recover(&self, operation: ApiOperation) -> Result<(), ApiError> {
        self.write()?.failures.remove(&operation);
        Ok(())
    }

    /// Number of calls made to `operation` so far.
    pub fn calls(&self, operation: ApiOperation) -> usize {
        self.data
            .read()
            .map(|data| data.calls.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, ApiError> {
        self.data
            .write()
            .map_err(|_| ApiError::Backend("poisoned lock".to_owned()))
    }

    async fn enter(&self, operation: ApiOperation) -> Result<(), ApiError> {
        *self.write()?.calls.entry(operation).or_default() += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let data = self.write()?;
        match data.failures.get(&operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn current_user_id(&self) -> Result<String, ApiError> {
        self.data
            .read()
            .map_err(|_| ApiError::Backend("poisoned lock".to_owned()))?
            .current_user
            .as_ref()
            .map(|user| user.id.clone())
            .ok_or_else(|| ApiError::Status {
                status: 401,
                message: "no signed-in user".to_owned(),
            })
    }
}

#[async_trait]
impl ChatApi for InMemoryChatApi {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.enter(ApiOperation::FetchConversations).await?;
        let user_id = self.current_user_id()?;
        let data = self.write()?;
        Ok(data
            .conversations
            .iter()
            .filter(|conversation| conversation.has_member(&user_id))
            .cloned()
            .collect())
    }

    async fn fetch_users(&self) -> Result<Vec<User>, ApiError> {
        self.enter(ApiOperation::FetchUsers).await?;
        Ok(self.write()?.users.clone())
    }

    async fn fetch_current_user(&self) -> Result<User, ApiError> {
        self.enter(ApiOperation::FetchCurrentUser).await?;
        let user_id = self.current_user_id()?;
        let data = self.write()?;
        data.users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn fetch_conversation_by_id(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        self.enter(ApiOperation::FetchConversationById).await?;
        let data = self.write()?;
        data.conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn create_conversation(&self, request: NewConversation) -> Result<Conversation, ApiError> {
        self.enter(ApiOperation::CreateConversation).await?;
        let mut data = self.write()?;
        let members: Vec<Option<User>> = request
            .members
            .iter()
            .map(|id| data.users.iter().find(|user| &user.id == id).cloned())
            .collect();
        let conversation = Conversation {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            is_group: members.len() > 2,
            members,
            messages: Vec::new(),
            last_message: None,
        };
        data.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn join_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        self.enter(ApiOperation::JoinConversation).await?;
        let user_id = self.current_user_id()?;
        let mut data = self.write()?;
        let user = data.users.iter().find(|user| user.id == user_id).cloned();
        let conversation = data
            .conversations
            .iter_mut()
            .find(|conversation| conversation.id == conversation_id)
            .ok_or(ApiError::NotFound)?;
        if !conversation.has_member(&user_id) {
            conversation.members.push(user);
        }
        Ok(conversation.clone())
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<User, ApiError> {
        self.enter(ApiOperation::UpdateProfile).await?;
        let user_id = self.current_user_id()?;
        let mut data = self.write()?;
        let user = data
            .users
            .iter_mut()
            .find(|user| user.id == user_id)
            .ok_or(ApiError::NotFound)?;
        user.name = update.name;
        let updated = user.clone();
        data.current_user = Some(updated.clone());
        Ok(updated)
    }
}
