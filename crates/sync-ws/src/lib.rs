//! Runtime for the chat sync engine.
//!
//! [`spawn_engine`] starts two tasks: the push-channel transport and the
//! strict-order engine loop that owns the [`StateStore`]. Everything the
//! rendering layer needs goes through the returned [`EngineHandle`].

use std::{sync::Arc, time::Duration};

use sync_core::{
    Attachment, ChatSnapshot, Conversation, ConnectionState, EventBus, EventStream, Intent,
    IntentQueue, OutboundEnvelope, ReconnectPolicy, StateStore, SyncError, SyncErrorCategory,
    User,
};
use sync_platform::{ChatApi, TokenSource};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

mod baseline;
mod engine;
mod intents;
mod transport;

use engine::{Command, Engine, EngineInput};
use intents::IntentEmitter;
use transport::{Transport, TransportConfig, socket_url};

const INTENT_QUEUE_CAPACITY: usize = 128;

/// Runtime settings for one signed-in session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Push-channel URL (`ws://` or `wss://`); `userId` is appended.
    pub ws_url: String,
    pub user_id: String,
    pub reconnect: ReconnectPolicy,
    /// How long to wait for the server's `connect` after sending auth.
    pub handshake_timeout: Duration,
    /// Capacity of the engine input queue.
    pub input_buffer: usize,
    /// Per-subscriber buffer of the event bus.
    pub event_buffer: usize,
}

impl EngineConfig {
    pub fn new(ws_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            user_id: user_id.into(),
            reconnect: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(5),
            input_buffer: 256,
            event_buffer: 512,
        }
    }
}

/// Start the transport and the engine loop for `config.user_id`.
pub fn spawn_engine(
    config: EngineConfig,
    api: Arc<dyn ChatApi>,
    tokens: Arc<dyn TokenSource>,
) -> Result<EngineHandle, SyncError> {
    let url = socket_url(&config.ws_url, &config.user_id)?;
    let (handle, intent_rx, state_tx, input_tx) = spawn_loop(&config, api);

    let transport = Transport::new(
        TransportConfig {
            url,
            user_id: config.user_id.clone(),
            tokens,
            reconnect: config.reconnect,
            handshake_timeout: config.handshake_timeout,
        },
        input_tx,
        intent_rx,
        state_tx,
        handle.cancel.child_token(),
    );
    tokio::spawn(transport.run());
    info!(user_id = %config.user_id, "sync engine started");
    Ok(handle)
}

fn spawn_loop(
    config: &EngineConfig,
    api: Arc<dyn ChatApi>,
) -> (
    EngineHandle,
    mpsc::Receiver<OutboundEnvelope>,
    watch::Sender<ConnectionState>,
    mpsc::Sender<EngineInput>,
) {
    let bus = EventBus::new(config.event_buffer);
    let store = StateStore::new(bus.clone());
    let (input_tx, input_rx) = mpsc::channel(config.input_buffer.max(1));
    let (queue, intent_rx) = IntentQueue::new(INTENT_QUEUE_CAPACITY);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let (snapshot_tx, snapshot_rx) = watch::channel(store.snapshot());
    let cancel = CancellationToken::new();
    let emitter = IntentEmitter::new(config.user_id.clone(), queue, state_rx.clone());

    let engine = Engine::new(
        config.user_id.clone(),
        store,
        api,
        emitter.clone(),
        (input_tx.clone(), input_rx),
        snapshot_tx,
        cancel.clone(),
    );
    tokio::spawn(engine.run());

    let handle = EngineHandle {
        input_tx: input_tx.clone(),
        emitter,
        bus,
        snapshots: snapshot_rx,
        connection: state_rx,
        cancel,
    };
    (handle, intent_rx, state_tx, input_tx)
}

/// Cloneable front door to a running engine.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    input_tx: mpsc::Sender<EngineInput>,
    emitter: IntentEmitter,
    bus: EventBus,
    snapshots: watch::Receiver<Arc<ChatSnapshot>>,
    connection: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl EngineHandle {
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Latest committed snapshot.
    pub fn snapshot(&self) -> Arc<ChatSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Watch of committed snapshots; only the latest value is retained.
    pub fn snapshots(&self) -> watch::Receiver<Arc<ChatSnapshot>> {
        self.snapshots.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    pub fn connection_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Issue the three baseline calls. Results land as ordinary store updates.
    pub async fn load_baseline(&self) -> Result<(), SyncError> {
        self.command(Command::LoadBaseline).await
    }

    /// Re-run the baseline load, e.g. after a partial failure.
    pub async fn reload_baseline(&self) -> Result<(), SyncError> {
        self.load_baseline().await
    }

    pub async fn select_conversation(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<Arc<Conversation>, SyncError> {
        let conversation_id = conversation_id.into();
        self.request(|reply| Command::SelectConversation {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn clear_active_conversation(&self) -> Result<(), SyncError> {
        self.command(Command::ClearActiveConversation).await
    }

    /// Open a conversation with `member_ids`; an existing direct conversation
    /// with a single other member is reused.
    pub async fn create_conversation(
        &self,
        member_ids: Vec<String>,
        name: Option<String>,
    ) -> Result<Arc<Conversation>, SyncError> {
        self.request(|reply| Command::CreateConversation {
            member_ids,
            name,
            reply,
        })
        .await
    }

    pub async fn join_conversation(
        &self,
        conversation_id: impl Into<String>,
    ) -> Result<Arc<Conversation>, SyncError> {
        let conversation_id = conversation_id.into();
        self.request(|reply| Command::JoinConversation {
            conversation_id,
            reply,
        })
        .await
    }

    pub async fn update_profile(&self, name: impl Into<String>) -> Result<User, SyncError> {
        let name = name.into();
        self.request(|reply| Command::UpdateProfile { name, reply })
            .await
    }

    /// Send a message and record it as pending. Returns the client correlation
    /// ID the confirming `message` event will carry.
    pub async fn send_message(
        &self,
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<String, SyncError> {
        let conversation_id = conversation_id.into();
        let content = content.into();
        self.request(|reply| Command::SendMessage {
            conversation_id,
            content,
            attachments,
            reply,
        })
        .await
    }

    pub fn start_typing(&self, conversation_id: impl Into<String>) -> Result<(), SyncError> {
        self.emit(Intent::TypingStart {
            conversation_id: conversation_id.into(),
        })
    }

    pub fn stop_typing(&self, conversation_id: impl Into<String>) -> Result<(), SyncError> {
        self.emit(Intent::TypingEnd {
            conversation_id: conversation_id.into(),
        })
    }

    pub fn add_reaction(
        &self,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> Result<(), SyncError> {
        self.emit(Intent::AddReaction {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
    }

    pub fn remove_reaction(
        &self,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> Result<(), SyncError> {
        self.emit(Intent::RemoveReaction {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
    }

    pub fn send_read_receipt(
        &self,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Result<(), SyncError> {
        self.emit(Intent::ReadReceipt {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
        })
    }

    /// Drop every slice and discard in-flight baseline, fetch and request results.
    pub async fn reset_session(&self) -> Result<(), SyncError> {
        self.request(|reply| Command::ResetSession { reply }).await
    }

    /// Sign-out: stop the transport and the engine loop.
    ///
    /// Resolves once the loop has exited; nothing is applied afterwards.
    pub async fn teardown(&self) {
        self.cancel.cancel();
        self.input_tx.closed().await;
    }

    fn emit(&self, intent: Intent) -> Result<(), SyncError> {
        self.emitter.emit(intent).map(drop)
    }

    async fn command(&self, command: Command) -> Result<(), SyncError> {
        self.input_tx
            .send(EngineInput::Command(command))
            .await
            .map_err(|_| engine_stopped())
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, SyncError>>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, response) = oneshot::channel();
        self.command(command(reply)).await?;
        response.await.map_err(|_| engine_stopped())?
    }
}

fn engine_stopped() -> SyncError {
    SyncError::new(
        SyncErrorCategory::Internal,
        "engine_stopped",
        "sync engine is not running",
    )
}
