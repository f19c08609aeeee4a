use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{HeaderMap, RETRY_AFTER},
};
use serde::{Deserialize, de::DeserializeOwned};
use sync_core::{Conversation, User};
use tracing::debug;
use url::Url;

use crate::{ApiError, ChatApi, NewConversation, ProfileUpdate, TokenSource};

/// Success body: `{ "data": ... }`.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Failure body: `{ "error": "..." }`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

/// REST implementation of [`ChatApi`].
#[derive(Clone)]
pub struct HttpChatApi {
    base_url: Url,
    user_id: String,
    client: Client,
    tokens: Arc<dyn TokenSource>,
}

impl HttpChatApi {
    pub fn new(
        base_url: &str,
        user_id: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, ApiError> {
        // A trailing slash keeps `Url::join` from dropping the last path segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|err| ApiError::Backend(format!("invalid api url '{base_url}': {err}")))?;
        Ok(Self {
            base_url,
            user_id: user_id.into(),
            client: Client::new(),
            tokens,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiError::Backend(format!("invalid request path '{path}': {err}")))
    }

    /// `segments` are pushed percent-encoded, so IDs cannot escape their slot.
    fn url_with(&self, path: &str, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.url(path)?;
        url.path_segments_mut()
            .map_err(|()| ApiError::Backend("api url cannot carry a path".to_owned()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ApiError> {
        Ok(request.bearer_auth(self.tokens.token()?))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self
            .authorized(request)?
            .send()
            .await
            .map_err(|err| ApiError::Unavailable(err.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    let url = response.url().path().to_owned();
    let retry_after_ms = retry_after_ms(response.headers());
    let body = response
        .bytes()
        .await
        .map_err(|err| ApiError::Unavailable(err.to_string()))?;

    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        debug!(status = status.as_u16(), path = %url, %message, "request rejected");
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited {
                retry_after_ms,
                message,
            });
        }
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice::<DataEnvelope<T>>(&body)
        .map(|envelope| envelope.data)
        .map_err(|err| ApiError::Decode(err.to_string()))
}

/// Delta-seconds form of `Retry-After`; HTTP dates are ignored.
fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|seconds| seconds.saturating_mul(1_000))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.send(self.client.get(self.url("conversations")?)).await
    }

    async fn fetch_users(&self) -> Result<Vec<User>, ApiError> {
        self.send(self.client.get(self.url("users")?)).await
    }

    async fn fetch_current_user(&self) -> Result<User, ApiError> {
        self.send(self.client.get(self.url("users/me")?)).await
    }

    async fn fetch_conversation_by_id(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let url = self.url_with("conversations", &[conversation_id])?;
        self.send(self.client.get(url)).await
    }

    async fn create_conversation(&self, request: NewConversation) -> Result<Conversation, ApiError> {
        let url = self.url("conversations")?;
        self.send(self.client.post(url).json(&request)).await
    }

    async fn join_conversation(&self, conversation_id: &str) -> Result<Conversation, ApiError> {
        let url = self.url_with("conversations", &[conversation_id, "join"])?;
        self.send(self.client.post(url)).await
    }

    async fn update_profile(&self, update: ProfileUpdate) -> Result<User, ApiError> {
        let url = self.url_with("users", &[self.user_id.as_str()])?;
        self.send(self.client.patch(url).json(&update)).await
    }
}
