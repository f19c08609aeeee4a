use std::sync::Arc;

use sync_core::{Conversation, User};
use sync_platform::{ApiError, ApiOperation, ChatApi};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::EngineInput;

/// Result of one of the three independent baseline calls.
#[derive(Debug)]
pub(crate) enum BaselinePart {
    Conversations(Result<Vec<Conversation>, ApiError>),
    Users(Result<Vec<User>, ApiError>),
    CurrentUser(Result<User, ApiError>),
}

impl BaselinePart {
    pub(crate) fn operation(&self) -> ApiOperation {
        match self {
            Self::Conversations(_) => ApiOperation::FetchConversations,
            Self::Users(_) => ApiOperation::FetchUsers,
            Self::CurrentUser(_) => ApiOperation::FetchCurrentUser,
        }
    }
}

/// Issue the three baseline calls concurrently.
///
/// Each result re-enters the engine loop on its own, tagged with the session
/// `generation` it was issued for. A failure in one call never holds back the
/// others; nothing is retried here.
pub(crate) fn spawn_baseline(
    api: Arc<dyn ChatApi>,
    input_tx: mpsc::Sender<EngineInput>,
    generation: u64,
    cancel: CancellationToken,
) {
    debug!(generation, "baseline load started");

    spawn_part(&api, &input_tx, generation, &cancel, |api| async move {
        BaselinePart::Conversations(api.fetch_conversations().await)
    });
    spawn_part(&api, &input_tx, generation, &cancel, |api| async move {
        BaselinePart::Users(api.fetch_users().await)
    });
    spawn_part(&api, &input_tx, generation, &cancel, |api| async move {
        BaselinePart::CurrentUser(api.fetch_current_user().await)
    });
}

fn spawn_part<F, Fut>(
    api: &Arc<dyn ChatApi>,
    input_tx: &mpsc::Sender<EngineInput>,
    generation: u64,
    cancel: &CancellationToken,
    call: F,
) where
    F: FnOnce(Arc<dyn ChatApi>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = BaselinePart> + Send + 'static,
{
    let api = Arc::clone(api);
    let input_tx = input_tx.clone();
    let cancel = cancel.child_token();
    tokio::spawn(async move {
        let part = tokio::select! {
            _ = cancel.cancelled() => return,
            part = call(api) => part,
        };
        let _ = input_tx
            .send(EngineInput::Baseline { generation, part })
            .await;
    });
}
