mod config;
mod logging;

use std::{process::ExitCode, sync::Arc};

use config::ConsoleConfig;
use sync_core::{ChatSnapshot, EngineEvent};
use sync_platform::{HttpChatApi, StaticToken, TokenSource};
use sync_ws::spawn_engine;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    info!("starting chatsync-console");

    let config = match ConsoleConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let tokens: Arc<dyn TokenSource> = Arc::new(StaticToken::new(config.token.clone()));
    let api = match HttpChatApi::new(&config.api_url, config.user_id.clone(), Arc::clone(&tokens)) {
        Ok(api) => Arc::new(api),
        Err(err) => {
            error!(error = %err, "failed to build request layer");
            return ExitCode::FAILURE;
        }
    };

    let engine = match spawn_engine(config.engine_config(), api, tokens) {
        Ok(engine) => engine,
        Err(err) => {
            error!(code = %err.code, error = %err.message, "failed to start sync engine");
            return ExitCode::FAILURE;
        }
    };

    let mut events = engine.subscribe();
    if let Err(err) = engine.load_baseline().await {
        error!(code = %err.code, "baseline load could not be issued");
        return ExitCode::FAILURE;
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; signing out");
                break;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::StateChanged { slices, revision, snapshot }) => {
                    info!(revision, ?slices, "{}", summarize(&snapshot));
                }
                Ok(EngineEvent::ScrollToLatest { conversation_id }) => {
                    debug!(%conversation_id, "scroll to latest");
                }
                Ok(EngineEvent::Warning(diagnostic)) => {
                    warn!(
                        code = %diagnostic.code,
                        retry_after_ms = ?diagnostic.retry_after_ms,
                        "{}",
                        diagnostic.message
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.teardown().await;
    info!("chatsync-console stopped");
    ExitCode::SUCCESS
}

fn summarize(snapshot: &ChatSnapshot) -> String {
    let active = snapshot.active_id().unwrap_or("-");
    let messages: usize = snapshot
        .conversations
        .iter()
        .map(|conversation| conversation.messages.len())
        .sum();
    format!(
        "{:?}: {} conversations, {} messages, {} users, {} typing, {} pending, active={active}",
        snapshot.connection,
        snapshot.conversations.len(),
        messages,
        snapshot.users.len(),
        snapshot.typing_users.len(),
        snapshot.pending_messages.len(),
    )
}
