use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    channel::{EventBus, EventStream},
    outbox::PendingMessage,
    types::{Conversation, ConnectionState, EngineEvent, User},
};

/// `conversation id -> user id -> last read message id`.
pub type ReadReceipts = BTreeMap<String, BTreeMap<String, String>>;

/// Independently replaceable parts of the snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StoreSlice {
    Conversations,
    ActiveConversation,
    Users,
    TypingUsers,
    CurrentUser,
    Connection,
    PendingMessages,
    ReadReceipts,
}

/// Canonical in-memory view consumed by the rendering layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSnapshot {
    pub conversations: Vec<Arc<Conversation>>,
    pub active_conversation: Option<Arc<Conversation>>,
    pub users: Vec<User>,
    /// Users composing in the active conversation, in arrival order, no duplicates.
    pub typing_users: Vec<User>,
    pub current_user: Option<User>,
    pub connection: ConnectionState,
    pub pending_messages: Vec<PendingMessage>,
    pub read_receipts: ReadReceipts,
}

impl ChatSnapshot {
    pub fn conversation(&self, conversation_id: &str) -> Option<&Arc<Conversation>> {
        self.conversations
            .iter()
            .find(|conversation| conversation.id == conversation_id)
    }

    pub fn conversation_index(&self, conversation_id: &str) -> Option<usize> {
        self.conversations
            .iter()
            .position(|conversation| conversation.id == conversation_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&User> {
        self.users.iter().find(|user| user.id == user_id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_conversation
            .as_deref()
            .map(|conversation| conversation.id.as_str())
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active_id() == Some(conversation_id)
    }
}

/// One logical update: every `Some` slice is replaced wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreUpdate {
    pub conversations: Option<Vec<Arc<Conversation>>>,
    pub active_conversation: Option<Option<Arc<Conversation>>>,
    pub users: Option<Vec<User>>,
    pub typing_users: Option<Vec<User>>,
    pub current_user: Option<Option<User>>,
    pub connection: Option<ConnectionState>,
    pub pending_messages: Option<Vec<PendingMessage>>,
    pub read_receipts: Option<ReadReceipts>,
}

impl StoreUpdate {
    pub fn with_conversations(mut self, conversations: Vec<Arc<Conversation>>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    pub fn with_active_conversation(mut self, active: Option<Arc<Conversation>>) -> Self {
        self.active_conversation = Some(active);
        self
    }

    pub fn with_users(mut self, users: Vec<User>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_typing_users(mut self, typing_users: Vec<User>) -> Self {
        self.typing_users = Some(typing_users);
        self
    }

    pub fn with_current_user(mut self, current_user: Option<User>) -> Self {
        self.current_user = Some(current_user);
        self
    }

    pub fn with_connection(mut self, connection: ConnectionState) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn with_pending_messages(mut self, pending: Vec<PendingMessage>) -> Self {
        self.pending_messages = Some(pending);
        self
    }

    pub fn with_read_receipts(mut self, receipts: ReadReceipts) -> Self {
        self.read_receipts = Some(receipts);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.slices().is_empty()
    }

    /// Slices this update replaces, in declaration order.
    pub fn slices(&self) -> Vec<StoreSlice> {
        let mut slices = Vec::new();
        if self.conversations.is_some() {
            slices.push(StoreSlice::Conversations);
        }
        if self.active_conversation.is_some() {
            slices.push(StoreSlice::ActiveConversation);
        }
        if self.users.is_some() {
            slices.push(StoreSlice::Users);
        }
        if self.typing_users.is_some() {
            slices.push(StoreSlice::TypingUsers);
        }
        if self.current_user.is_some() {
            slices.push(StoreSlice::CurrentUser);
        }
        if self.connection.is_some() {
            slices.push(StoreSlice::Connection);
        }
        if self.pending_messages.is_some() {
            slices.push(StoreSlice::PendingMessages);
        }
        if self.read_receipts.is_some() {
            slices.push(StoreSlice::ReadReceipts);
        }
        slices
    }
}

/// Explicit store object with subscribe/notify.
///
/// Reconcilers never touch the store directly; they compute a [`StoreUpdate`]
/// from the current snapshot and the engine loop commits it. Each commit
/// bumps the revision and broadcasts exactly one
/// [`EngineEvent::StateChanged`].
#[derive(Debug)]
pub struct StateStore {
    snapshot: Arc<ChatSnapshot>,
    revision: u64,
    bus: EventBus,
}

impl StateStore {
    pub fn new(bus: EventBus) -> Self {
        Self {
            snapshot: Arc::new(ChatSnapshot::default()),
            revision: 0,
            bus,
        }
    }

    pub fn snapshot(&self) -> Arc<ChatSnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Borrow the current snapshot without bumping its refcount.
    pub fn state(&self) -> &ChatSnapshot {
        &self.snapshot
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn conversations(&self) -> &[Arc<Conversation>] {
        &self.snapshot.conversations
    }

    pub fn active_conversation(&self) -> Option<&Arc<Conversation>> {
        self.snapshot.active_conversation.as_ref()
    }

    pub fn users(&self) -> &[User] {
        &self.snapshot.users
    }

    pub fn typing_users(&self) -> &[User] {
        &self.snapshot.typing_users
    }

    pub fn set_conversations(&mut self, conversations: Vec<Arc<Conversation>>) -> u64 {
        self.commit(StoreUpdate::default().with_conversations(conversations))
    }

    pub fn set_active_conversation(&mut self, active: Option<Arc<Conversation>>) -> u64 {
        self.commit(StoreUpdate::default().with_active_conversation(active))
    }

    pub fn set_users(&mut self, users: Vec<User>) -> u64 {
        self.commit(StoreUpdate::default().with_users(users))
    }

    pub fn set_typing_users(&mut self, typing_users: Vec<User>) -> u64 {
        self.commit(StoreUpdate::default().with_typing_users(typing_users))
    }

    /// Apply `update` atomically and notify subscribers once.
    ///
    /// Empty updates are ignored and do not bump the revision.
    pub fn commit(&mut self, update: StoreUpdate) -> u64 {
        let slices = update.slices();
        if slices.is_empty() {
            return self.revision;
        }

        let snapshot = Arc::make_mut(&mut self.snapshot);
        if let Some(conversations) = update.conversations {
            snapshot.conversations = conversations;
        }
        if let Some(active) = update.active_conversation {
            snapshot.active_conversation = active;
        }
        if let Some(users) = update.users {
            snapshot.users = users;
        }
        if let Some(typing_users) = update.typing_users {
            snapshot.typing_users = typing_users;
        }
        if let Some(current_user) = update.current_user {
            snapshot.current_user = current_user;
        }
        if let Some(connection) = update.connection {
            snapshot.connection = connection;
        }
        if let Some(pending) = update.pending_messages {
            snapshot.pending_messages = pending;
        }
        if let Some(receipts) = update.read_receipts {
            snapshot.read_receipts = receipts;
        }

        self.revision += 1;
        trace!(revision = self.revision, ?slices, "store update committed");
        self.bus.emit(EngineEvent::StateChanged {
            slices,
            revision: self.revision,
            snapshot: Arc::clone(&self.snapshot),
        });
        self.revision
    }

    /// Session reset: drop every slice back to its empty value.
    pub fn reset(&mut self) -> u64 {
        let connection = self.snapshot.connection;
        let cleared = ChatSnapshot {
            connection,
            ..ChatSnapshot::default()
        };
        self.commit(
            StoreUpdate::default()
                .with_conversations(cleared.conversations)
                .with_active_conversation(cleared.active_conversation)
                .with_users(cleared.users)
                .with_typing_users(cleared.typing_users)
                .with_current_user(cleared.current_user)
                .with_pending_messages(cleared.pending_messages)
                .with_read_receipts(cleared.read_receipts),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(id: &str) -> Arc<Conversation> {
        Arc::new(Conversation {
            id: id.to_owned(),
            name: id.to_uppercase(),
            members: Vec::new(),
            messages: Vec::new(),
            last_message: None,
            is_group: false,
        })
    }

    #[tokio::test]
    async fn every_set_notifies_subscribers() {
        let mut store = StateStore::new(EventBus::new(8));
        let mut events = store.subscribe();

        let revision = store.set_users(vec![User::unresolved("a")]);
        assert_eq!(revision, 1);

        match events.recv().await.expect("state change should be broadcast") {
            EngineEvent::StateChanged {
                slices,
                revision,
                snapshot,
            } => {
                assert_eq!(slices, vec![StoreSlice::Users]);
                assert_eq!(revision, 1);
                assert_eq!(snapshot.users.len(), 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn commit_notifies_once_for_many_slices() {
        let mut store = StateStore::new(EventBus::new(8));
        let mut events = store.subscribe();
        let c1 = conversation("c1");

        store.commit(
            StoreUpdate::default()
                .with_conversations(vec![Arc::clone(&c1)])
                .with_active_conversation(Some(Arc::clone(&c1))),
        );

        match events.recv().await.expect("state change should be broadcast") {
            EngineEvent::StateChanged { slices, .. } => assert_eq!(
                slices,
                vec![StoreSlice::Conversations, StoreSlice::ActiveConversation]
            ),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err());
        assert!(store.state().is_active("c1"));
    }

    #[test]
    fn empty_update_is_not_a_revision() {
        let mut store = StateStore::new(EventBus::new(8));
        assert_eq!(store.commit(StoreUpdate::default()), 0);
        assert!(StoreUpdate::default().is_empty());
    }

    #[test]
    fn previous_snapshot_is_not_mutated_by_commit() {
        let mut store = StateStore::new(EventBus::new(8));
        store.set_conversations(vec![conversation("c1")]);
        let before = store.snapshot();

        store.set_conversations(vec![conversation("c1"), conversation("c2")]);
        assert_eq!(before.conversations.len(), 1);
        assert_eq!(store.conversations().len(), 2);
    }

    #[test]
    fn reset_clears_everything_but_connection() {
        let mut store = StateStore::new(EventBus::new(8));
        let c1 = conversation("c1");
        store.commit(
            StoreUpdate::default()
                .with_conversations(vec![Arc::clone(&c1)])
                .with_active_conversation(Some(c1))
                .with_current_user(Some(User::unresolved("me")))
                .with_connection(ConnectionState::Connected),
        );

        store.reset();
        let snapshot = store.snapshot();
        assert!(snapshot.conversations.is_empty());
        assert!(snapshot.active_conversation.is_none());
        assert!(snapshot.current_user.is_none());
        assert_eq!(snapshot.connection, ConnectionState::Connected);
    }
}
