use std::{collections::HashMap, future::Future, sync::Arc};

use sync_core::{
    Attachment, ChatSnapshot, Conversation, ConnectionState, Diagnostic, EngineEvent,
    EventRouter, InboundEvent, Intent, Message, PendingMessage, RouteOutcome, StateStore,
    StoreUpdate, SyncError, SyncErrorCategory, User,
    normalization::default_conversation_name,
    outbox,
    reconcile::{
        conversation::{activate_joined, find_direct_conversation, insert_created},
        message::apply_fetched,
    },
    router::{classify, decode_frame},
};
use sync_platform::{ApiError, ApiOperation, ChatApi, NewConversation, ProfileUpdate};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    baseline::{BaselinePart, spawn_baseline},
    intents::{IntentEmitter, now_ms},
};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// User actions that need the engine loop (store reads or writes).
#[derive(Debug)]
pub(crate) enum Command {
    LoadBaseline,
    SelectConversation {
        conversation_id: String,
        reply: Reply<Arc<Conversation>>,
    },
    ClearActiveConversation,
    CreateConversation {
        member_ids: Vec<String>,
        name: Option<String>,
        reply: Reply<Arc<Conversation>>,
    },
    JoinConversation {
        conversation_id: String,
        reply: Reply<Arc<Conversation>>,
    },
    UpdateProfile {
        name: String,
        reply: Reply<User>,
    },
    SendMessage {
        conversation_id: String,
        content: String,
        attachments: Vec<Attachment>,
        reply: Reply<String>,
    },
    ResetSession {
        reply: Reply<()>,
    },
}

/// Everything the single consumer loop processes, in arrival order.
#[derive(Debug)]
pub(crate) enum EngineInput {
    /// Raw text frame from the push channel.
    Frame(String),
    /// Transport lifecycle change.
    Connection(ConnectionState),
    /// Outbound message intents lost with a dropped connection.
    SendsDropped { client_txn_ids: Vec<String> },
    Baseline {
        generation: u64,
        part: BaselinePart,
    },
    ConversationFetched {
        generation: u64,
        conversation_id: String,
        result: Result<Conversation, ApiError>,
    },
    Created {
        generation: u64,
        result: Result<Conversation, ApiError>,
        reply: Reply<Arc<Conversation>>,
    },
    Joined {
        generation: u64,
        result: Result<Conversation, ApiError>,
        reply: Reply<Arc<Conversation>>,
    },
    ProfileUpdated {
        generation: u64,
        result: Result<User, ApiError>,
        reply: Reply<User>,
    },
    Command(Command),
}

/// Strict-order engine loop: the only writer of the [`StateStore`].
pub(crate) struct Engine {
    user_id: String,
    store: StateStore,
    router: EventRouter,
    api: Arc<dyn ChatApi>,
    emitter: IntentEmitter,
    input_tx: mpsc::Sender<EngineInput>,
    input_rx: mpsc::Receiver<EngineInput>,
    snapshot_tx: watch::Sender<Arc<ChatSnapshot>>,
    /// Messages waiting on a fallback fetch, keyed by conversation ID.
    pending_fetches: HashMap<String, Vec<Message>>,
    /// Bumped on session reset; completions tagged with an older value are discarded.
    generation: u64,
    published_revision: u64,
    cancel: CancellationToken,
}

impl Engine {
    pub(crate) fn new(
        user_id: String,
        store: StateStore,
        api: Arc<dyn ChatApi>,
        emitter: IntentEmitter,
        (input_tx, input_rx): (mpsc::Sender<EngineInput>, mpsc::Receiver<EngineInput>),
        snapshot_tx: watch::Sender<Arc<ChatSnapshot>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            user_id,
            store,
            router: EventRouter::new(),
            api,
            emitter,
            input_tx,
            input_rx,
            snapshot_tx,
            pending_fetches: HashMap::new(),
            generation: 0,
            published_revision: 0,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let input = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                input = self.input_rx.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
            };
            self.handle(input);
            self.publish();
        }

        self.commit(StoreUpdate::default().with_connection(ConnectionState::Closed));
        info!(
            routed = self.router.routed(),
            dropped = self.router.dropped(),
            "engine stopped"
        );
    }

    /// Commit and publish at once so replies sent afterwards see the update.
    fn commit(&mut self, update: StoreUpdate) -> u64 {
        let revision = self.store.commit(update);
        self.publish();
        revision
    }

    fn publish(&mut self) {
        if self.store.revision() != self.published_revision {
            self.published_revision = self.store.revision();
            self.snapshot_tx.send_replace(self.store.snapshot());
        }
    }

    fn handle(&mut self, input: EngineInput) {
        match input {
            EngineInput::Frame(text) => self.handle_frame(&text),
            EngineInput::Connection(state) => {
                if self.store.state().connection != state {
                    self.commit(StoreUpdate::default().with_connection(state));
                }
            }
            EngineInput::SendsDropped { client_txn_ids } => self.handle_sends_dropped(client_txn_ids),
            EngineInput::Baseline { generation, part } => {
                if self.is_stale(generation, "baseline result") {
                    return;
                }
                self.handle_baseline(part);
            }
            EngineInput::ConversationFetched {
                generation,
                conversation_id,
                result,
            } => self.handle_fetched(generation, conversation_id, result),
            EngineInput::Created {
                generation,
                result,
                reply,
            } => {
                let outcome = self
                    .settle(generation, result, ApiOperation::CreateConversation)
                    .map(|conversation| {
                        let update = insert_created(self.store.state(), conversation);
                        self.commit_and_take_active(update)
                    });
                let _ = reply.send(outcome.and_then(|active| active.ok_or_else(missing_active)));
            }
            EngineInput::Joined {
                generation,
                result,
                reply,
            } => {
                let outcome = self
                    .settle(generation, result, ApiOperation::JoinConversation)
                    .map(|conversation| {
                        let update = activate_joined(self.store.state(), conversation);
                        self.commit_and_take_active(update)
                    });
                let _ = reply.send(outcome.and_then(|active| active.ok_or_else(missing_active)));
            }
            EngineInput::ProfileUpdated {
                generation,
                result,
                reply,
            } => {
                let outcome = self
                    .settle(generation, result, ApiOperation::UpdateProfile)
                    .map(|user| {
                        self.apply_profile(user.clone());
                        user
                    });
                let _ = reply.send(outcome);
            }
            EngineInput::Command(command) => self.handle_command(command),
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let event = match decode_frame(text).and_then(classify) {
            Ok(event) => event,
            Err(err) => {
                self.router.reject(&self.store, err);
                return;
            }
        };

        match event {
            InboundEvent::Message(message)
                if self.pending_fetches.contains_key(&message.conversation_id) =>
            {
                trace!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.id,
                    "buffering message behind in-flight fetch"
                );
                if let Some(buffered) = self.pending_fetches.get_mut(&message.conversation_id) {
                    buffered.push(message);
                }
            }
            event => match self.router.route(&mut self.store, event) {
                RouteOutcome::NeedsConversation(message) => self.start_fallback_fetch(message),
                outcome => trace!(?outcome, "frame routed"),
            },
        }
    }

    fn start_fallback_fetch(&mut self, message: Message) {
        let conversation_id = message.conversation_id.clone();
        debug!(%conversation_id, message_id = %message.id, "fetching unknown conversation");
        self.pending_fetches
            .insert(conversation_id.clone(), vec![message]);

        let api = Arc::clone(&self.api);
        let generation = self.generation;
        let id = conversation_id.clone();
        self.spawn_call(
            async move { api.fetch_conversation_by_id(&id).await },
            move |result| EngineInput::ConversationFetched {
                generation,
                conversation_id,
                result,
            },
        );
    }

    fn handle_fetched(
        &mut self,
        generation: u64,
        conversation_id: String,
        result: Result<Conversation, ApiError>,
    ) {
        if self.is_stale(generation, "fallback fetch") {
            return;
        }
        let Some(buffered) = self.pending_fetches.remove(&conversation_id) else {
            return;
        };

        match result {
            Ok(conversation) => {
                debug!(%conversation_id, messages = buffered.len(), "fallback fetch resolved");
                let update = apply_fetched(self.store.state(), conversation, buffered);
                self.commit(update);
            }
            Err(err) => {
                let err = err.into_sync_error(ApiOperation::FetchConversationById);
                warn!(
                    %conversation_id,
                    discarded = buffered.len(),
                    error = %err.message,
                    "fallback fetch failed; discarding messages"
                );
                self.warn(
                    Diagnostic::new(
                        "fallback_fetch_failed",
                        format!(
                            "discarded {} message(s) for conversation {conversation_id}: {}",
                            buffered.len(),
                            err.message
                        ),
                    )
                    .caused_by(&err),
                );
            }
        }
    }

    fn handle_baseline(&mut self, part: BaselinePart) {
        let operation = part.operation();
        let update = match part {
            BaselinePart::Conversations(Ok(conversations)) => {
                let conversations: Vec<Arc<Conversation>> =
                    conversations.into_iter().map(Arc::new).collect();
                let mut update = StoreUpdate::default();
                if let Some(active_id) = self.store.state().active_id()
                    && let Some(fresh) = conversations.iter().find(|c| c.id == active_id)
                {
                    update = update.with_active_conversation(Some(Arc::clone(fresh)));
                }
                debug!(count = conversations.len(), "baseline conversations loaded");
                update.with_conversations(conversations)
            }
            BaselinePart::Users(Ok(users)) => {
                debug!(count = users.len(), "baseline users loaded");
                StoreUpdate::default().with_users(users)
            }
            BaselinePart::CurrentUser(Ok(user)) => {
                debug!(user_id = %user.id, "baseline current user loaded");
                StoreUpdate::default().with_current_user(Some(user))
            }
            BaselinePart::Conversations(Err(err))
            | BaselinePart::Users(Err(err))
            | BaselinePart::CurrentUser(Err(err)) => {
                let err = err.into_sync_error(operation);
                warn!(
                    operation = operation.as_str(),
                    error = %err.message,
                    "baseline call failed; slice left unchanged"
                );
                self.warn(
                    Diagnostic::new("baseline_partial_failure", err.message.clone())
                        .caused_by(&err),
                );
                return;
            }
        };
        self.commit(update);
    }

    fn handle_sends_dropped(&mut self, client_txn_ids: Vec<String>) {
        let state = self.store.state();
        let remaining: Vec<PendingMessage> = state
            .pending_messages
            .iter()
            .filter(|pending| !client_txn_ids.contains(&pending.client_txn_id))
            .cloned()
            .collect();
        let discarded = state.pending_messages.len() - remaining.len();
        if discarded == 0 {
            return;
        }
        self.commit(StoreUpdate::default().with_pending_messages(remaining));
        self.warn(Diagnostic::new(
            "sends_dropped",
            format!("{discarded} unsent message(s) dropped with the connection"),
        ));
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::LoadBaseline => spawn_baseline(
                Arc::clone(&self.api),
                self.input_tx.clone(),
                self.generation,
                self.cancel.clone(),
            ),
            Command::SelectConversation {
                conversation_id,
                reply,
            } => {
                let result = match self.store.state().conversation(&conversation_id) {
                    Some(conversation) => {
                        let conversation = Arc::clone(conversation);
                        self.commit(
                            StoreUpdate::default()
                                .with_active_conversation(Some(Arc::clone(&conversation)))
                                .with_typing_users(Vec::new()),
                        );
                        Ok(conversation)
                    }
                    None => Err(SyncError::conversation_not_found(&conversation_id)),
                };
                let _ = reply.send(result);
            }
            Command::ClearActiveConversation => {
                let state = self.store.state();
                if state.active_conversation.is_some() || !state.typing_users.is_empty() {
                    self.commit(
                        StoreUpdate::default()
                            .with_active_conversation(None)
                            .with_typing_users(Vec::new()),
                    );
                }
            }
            Command::CreateConversation {
                member_ids,
                name,
                reply,
            } => self.create_conversation(member_ids, name, reply),
            Command::JoinConversation {
                conversation_id,
                reply,
            } => {
                let api = Arc::clone(&self.api);
                let generation = self.generation;
                self.spawn_call(
                    async move { api.join_conversation(&conversation_id).await },
                    move |result| EngineInput::Joined {
                        generation,
                        result,
                        reply,
                    },
                );
            }
            Command::UpdateProfile { name, reply } => {
                let api = Arc::clone(&self.api);
                let generation = self.generation;
                self.spawn_call(
                    async move { api.update_profile(ProfileUpdate { name }).await },
                    move |result| EngineInput::ProfileUpdated {
                        generation,
                        result,
                        reply,
                    },
                );
            }
            Command::SendMessage {
                conversation_id,
                content,
                attachments,
                reply,
            } => {
                let _ = reply.send(self.send_message(conversation_id, content, attachments));
            }
            Command::ResetSession { reply } => {
                self.generation += 1;
                self.pending_fetches.clear();
                self.store.reset();
                self.publish();
                info!(generation = self.generation, "session reset");
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Emit the intent first; record the optimistic entry only once it is queued.
    fn send_message(
        &mut self,
        conversation_id: String,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<String, SyncError> {
        let client_txn_id = uuid::Uuid::new_v4().to_string();
        self.emitter.emit(Intent::SendMessage {
            conversation_id: conversation_id.clone(),
            content: content.clone(),
            attachments,
            client_txn_id: client_txn_id.clone(),
        })?;

        let pending = outbox::record(
            &self.store.state().pending_messages,
            PendingMessage {
                client_txn_id: client_txn_id.clone(),
                conversation_id,
                content,
                created_at_ms: now_ms(),
            },
        );
        self.commit(StoreUpdate::default().with_pending_messages(pending));
        debug!(%client_txn_id, "optimistic send recorded");
        Ok(client_txn_id)
    }

    fn create_conversation(
        &mut self,
        member_ids: Vec<String>,
        name: Option<String>,
        reply: Reply<Arc<Conversation>>,
    ) {
        let mut others: Vec<String> = Vec::with_capacity(member_ids.len());
        for id in member_ids {
            if id != self.user_id && !others.contains(&id) {
                others.push(id);
            }
        }
        if others.is_empty() {
            let _ = reply.send(Err(SyncError::new(
                SyncErrorCategory::Config,
                "no_members",
                "a conversation needs at least one other member",
            )));
            return;
        }

        if let [other] = others.as_slice()
            && let Some(existing) = find_direct_conversation(self.store.state(), other)
        {
            let existing = Arc::clone(existing);
            debug!(conversation_id = %existing.id, "reusing direct conversation");
            self.commit(
                StoreUpdate::default()
                    .with_active_conversation(Some(Arc::clone(&existing)))
                    .with_typing_users(Vec::new()),
            );
            let _ = reply.send(Ok(existing));
            return;
        }

        let name = name
            .map(|name| name.trim().to_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                let state = self.store.state();
                let names: Vec<&str> = others
                    .iter()
                    .map(|id| state.user(id).map_or(id.as_str(), |user| user.name.as_str()))
                    .collect();
                default_conversation_name(&names)
            });
        let mut members = Vec::with_capacity(others.len() + 1);
        members.push(self.user_id.clone());
        members.extend(others);

        let api = Arc::clone(&self.api);
        let generation = self.generation;
        self.spawn_call(
            async move {
                api.create_conversation(NewConversation { members, name })
                    .await
            },
            move |result| EngineInput::Created {
                generation,
                result,
                reply,
            },
        );
    }

    fn apply_profile(&mut self, user: User) {
        let state = self.store.state();
        let mut update = StoreUpdate::default().with_current_user(Some(user.clone()));
        if let Some(index) = state.users.iter().position(|entry| entry.id == user.id) {
            let mut users = state.users.clone();
            users[index] = user;
            update = update.with_users(users);
        }
        self.commit(update);
    }

    fn commit_and_take_active(&mut self, update: StoreUpdate) -> Option<Arc<Conversation>> {
        let active = update.active_conversation.clone().flatten();
        self.commit(update);
        active
    }

    /// Discard stale completions and map collaborator failures.
    fn settle<T>(
        &self,
        generation: u64,
        result: Result<T, ApiError>,
        operation: ApiOperation,
    ) -> Result<T, SyncError> {
        if self.is_stale(generation, operation.as_str()) {
            return Err(SyncError::new(
                SyncErrorCategory::Internal,
                "session_reset",
                format!("{} completed after a session reset", operation.as_str()),
            ));
        }
        result.map_err(|err| {
            let err = err.into_sync_error(operation);
            warn!(operation = operation.as_str(), error = %err.message, "request failed");
            err
        })
    }

    fn is_stale(&self, generation: u64, what: &str) -> bool {
        let stale = generation != self.generation;
        if stale {
            debug!(what, generation, current = self.generation, "discarding stale completion");
        }
        stale
    }

    fn warn(&self, diagnostic: Diagnostic) {
        self.store.bus().emit(EngineEvent::Warning(diagnostic));
    }

    /// Run `call` off the loop; its result re-enters as an ordinary input.
    fn spawn_call<T, Fut>(
        &self,
        call: Fut,
        into_input: impl FnOnce(Result<T, ApiError>) -> EngineInput + Send + 'static,
    ) where
        T: Send + 'static,
        Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let input_tx = self.input_tx.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = call => result,
            };
            let _ = input_tx.send(into_input(result)).await;
        });
    }
}

fn missing_active() -> SyncError {
    SyncError::new(
        SyncErrorCategory::Internal,
        "missing_active_conversation",
        "activated conversation missing from update",
    )
}
