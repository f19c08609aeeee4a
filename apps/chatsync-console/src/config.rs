//! Environment-backed runtime configuration for `chatsync-console`.

use std::{env, error::Error, fmt, time::Duration};

use sync_core::ReconnectPolicy;
use sync_ws::EngineConfig;

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_INPUT_BUFFER: usize = 256;
const DEFAULT_EVENT_BUFFER: usize = 512;

/// Runtime configuration used by the console app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// REST base URL of the request layer.
    pub api_url: String,
    /// Push-channel URL (`ws://` or `wss://`).
    pub ws_url: String,
    pub user_id: String,
    /// Bearer token for REST calls and the socket handshake.
    pub token: String,
    pub reconnect_attempts: u32,
    pub reconnect_interval_ms: u64,
    pub handshake_timeout_ms: u64,
    pub input_buffer: usize,
    pub event_buffer: usize,
}

impl ConsoleConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_url = required_trimmed_env("CHATSYNC_API_URL", &mut lookup)?;
        let ws_url = required_trimmed_env("CHATSYNC_WS_URL", &mut lookup)?;
        let user_id = required_trimmed_env("CHATSYNC_USER_ID", &mut lookup)?;
        let token = required_trimmed_env("CHATSYNC_TOKEN", &mut lookup)?;

        let reconnect_attempts = parse_positive(
            "CHATSYNC_RECONNECT_ATTEMPTS",
            DEFAULT_RECONNECT_ATTEMPTS,
            &mut lookup,
        )?;
        let reconnect_interval_ms = parse_positive(
            "CHATSYNC_RECONNECT_INTERVAL_MS",
            DEFAULT_RECONNECT_INTERVAL_MS,
            &mut lookup,
        )?;
        let handshake_timeout_ms = parse_positive(
            "CHATSYNC_HANDSHAKE_TIMEOUT_MS",
            DEFAULT_HANDSHAKE_TIMEOUT_MS,
            &mut lookup,
        )?;
        let input_buffer =
            parse_positive("CHATSYNC_INPUT_BUFFER", DEFAULT_INPUT_BUFFER, &mut lookup)?;
        let event_buffer =
            parse_positive("CHATSYNC_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        Ok(Self {
            api_url,
            ws_url,
            user_id,
            token,
            reconnect_attempts,
            reconnect_interval_ms,
            handshake_timeout_ms,
            input_buffer,
            event_buffer,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            reconnect: ReconnectPolicy::new(self.reconnect_interval_ms, self.reconnect_attempts),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            input_buffer: self.input_buffer,
            event_buffer: self.event_buffer,
            ..EngineConfig::new(self.ws_url.clone(), self.user_id.clone())
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or blank.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "missing required {key}"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn required_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::Missing { key })
}

fn parse_positive<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    let parsed = value
        .trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: err.to_string(),
        })?;
    if parsed == T::default() {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}
