//! Shared engine state: conversation and message stores, the stream registry and the
//! error slot, behind one lock.
//!
//! Every mutation goes through an [`EngineState`] method so that persistence and
//! change events can never be skipped. The [`EngineHandle`] is the only way in from
//! async tasks; closures passed to it must not await or re-enter the handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::core::conversation::{BotRef, Conversation, ConversationStore};
use crate::core::events::{EventBus, StoreEvent};
use crate::core::ids::{ConversationId, MessageId};
use crate::core::message::{Message, MessagePatch};
use crate::core::message_store::MessageStore;
use crate::core::persistence::{Persistence, PersistenceError, Snapshot};
use crate::core::stream_registry::{StreamHandle, StreamRegistry};
use crate::providers::ExchangeError;

/// What a conversation view should show, derived on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Normal,
    Editing,
    Loading,
    Streaming,
    Error,
}

/// Streamed content reaches the durable store at most this often per conversation.
const STREAM_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

pub struct EngineState {
    conversations: ConversationStore,
    messages: MessageStore,
    streams: StreamRegistry,
    error: Option<ExchangeError>,
    events: EventBus,
    persistence: Box<dyn Persistence>,
    last_stream_flush: HashMap<ConversationId, Instant>,
    unflushed: HashSet<ConversationId>,
}

impl EngineState {
    /// Loads everything the persistence layer holds. Messages that were mid-stream when
    /// the previous process stopped are settled, since no exchange survives a restart.
    pub fn hydrate(
        persistence: Box<dyn Persistence>,
        events: EventBus,
    ) -> Result<Self, PersistenceError> {
        let Snapshot {
            conversations,
            current,
            messages,
        } = persistence.load()?;

        let mut state = Self {
            conversations: ConversationStore::new(),
            messages: MessageStore::new(),
            streams: StreamRegistry::new(),
            error: None,
            events,
            persistence,
            last_stream_flush: HashMap::new(),
            unflushed: HashSet::new(),
        };

        for conversation in conversations {
            state.conversations.insert(conversation);
        }
        if let Some(current) = current {
            state.conversations.set_current(&current);
        }

        for (conversation_id, mut list) in messages {
            if !state.conversations.contains(&conversation_id) {
                debug!(conversation = %conversation_id, "dropping orphaned transcript");
                continue;
            }
            let mut reset = false;
            for message in list.iter_mut().filter(|msg| msg.stream) {
                message.stream = false;
                reset = true;
            }
            state.messages.replace_all(&conversation_id, list);
            if reset {
                state.persist_messages(&conversation_id);
            }
        }

        Ok(state)
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.messages.messages(conversation_id)
    }

    pub fn message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Option<&Message> {
        self.messages.get(conversation_id, message_id)
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    pub fn error(&self) -> Option<&ExchangeError> {
        self.error.as_ref()
    }

    /// Precedence: error, streaming, loading, editing, normal. Only the current
    /// conversation shows the error slot.
    pub fn exchange_state(&self, conversation_id: &ConversationId, composing: bool) -> ExchangeState {
        let is_current = self.conversations.current_id() == Some(conversation_id);
        if self.error.is_some() && is_current {
            ExchangeState::Error
        } else if self.streams.is_streaming(conversation_id) {
            ExchangeState::Streaming
        } else if self.streams.is_loading(conversation_id) {
            ExchangeState::Loading
        } else if composing {
            ExchangeState::Editing
        } else {
            ExchangeState::Normal
        }
    }

    // Conversations

    pub fn add_conversation(&mut self, bot: BotRef) -> Conversation {
        let conversation = self.conversations.add(bot);
        self.persist_conversations();
        self.events.publish(StoreEvent::ConversationsChanged);
        self.events
            .publish(StoreEvent::CurrentChanged(Some(conversation.id.clone())));
        conversation
    }

    /// Cancels any exchange, then drops the conversation and its transcript.
    pub fn delete_conversation(&mut self, conversation_id: &ConversationId) -> bool {
        if self.streams.cancel(conversation_id) {
            self.events
                .publish(StoreEvent::StreamChanged(conversation_id.clone()));
        }
        let was_current = self.conversations.current_id() == Some(conversation_id);
        if self.conversations.delete_by_id(conversation_id).is_none() {
            return false;
        }
        self.messages.remove_conversation(conversation_id);
        self.last_stream_flush.remove(conversation_id);
        self.unflushed.remove(conversation_id);
        if let Err(err) = self.persistence.remove_messages(conversation_id) {
            warn!(conversation = %conversation_id, error = %err, "failed to remove transcript");
        }
        self.persist_conversations();
        self.events.publish(StoreEvent::ConversationsChanged);
        if was_current {
            self.events.publish(StoreEvent::CurrentChanged(None));
        }
        true
    }

    pub fn set_current(&mut self, conversation_id: &ConversationId) -> bool {
        if self.conversations.current_id() == Some(conversation_id) {
            return true;
        }
        if !self.conversations.set_current(conversation_id) {
            return false;
        }
        self.persist_conversations();
        self.events
            .publish(StoreEvent::CurrentChanged(Some(conversation_id.clone())));
        true
    }

    pub fn rename_conversation(&mut self, conversation_id: &ConversationId, name: impl Into<String>) -> bool {
        let changed = self.conversations.rename(conversation_id, name);
        if changed {
            self.conversations_changed();
        }
        changed
    }

    pub fn set_icon(&mut self, conversation_id: &ConversationId, icon: Option<String>) -> bool {
        let changed = self.conversations.set_icon(conversation_id, icon);
        if changed {
            self.conversations_changed();
        }
        changed
    }

    pub fn set_system_info(&mut self, conversation_id: &ConversationId, system_info: Option<String>) -> bool {
        let changed = self.conversations.set_system_info(conversation_id, system_info);
        if changed {
            self.conversations_changed();
        }
        changed
    }

    pub fn touch(&mut self, conversation_id: &ConversationId) {
        self.conversations.touch(conversation_id);
        self.conversations_changed();
    }

    // Messages

    pub fn append_message(&mut self, conversation_id: &ConversationId, message: Message) {
        self.messages.append(conversation_id, message);
        self.messages_changed(conversation_id);
    }

    pub fn update_message(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        patch: &MessagePatch,
    ) -> bool {
        let changed = self.messages.update_by_id(conversation_id, message_id, patch);
        if changed {
            self.messages_changed(conversation_id);
        }
        changed
    }

    /// Content update from a running exchange. Memory and subscribers see every call;
    /// the durable store sees at most one write per [`STREAM_FLUSH_INTERVAL`], and the
    /// rest is flushed by the next structural mutation or when the exchange ends.
    pub fn stream_content(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        content: &str,
    ) -> bool {
        let patch = MessagePatch::content(content);
        if !self.messages.update_by_id(conversation_id, message_id, &patch) {
            return false;
        }
        let due = self
            .last_stream_flush
            .get(conversation_id)
            .is_none_or(|at| at.elapsed() >= STREAM_FLUSH_INTERVAL);
        if due {
            self.persist_messages(conversation_id);
            self.last_stream_flush
                .insert(conversation_id.clone(), Instant::now());
        } else {
            self.unflushed.insert(conversation_id.clone());
        }
        self.events
            .publish(StoreEvent::MessagesChanged(conversation_id.clone()));
        true
    }

    pub fn splice_from(&mut self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        let changed = self.messages.splice_from(conversation_id, message_id);
        if changed {
            self.messages_changed(conversation_id);
        }
        changed
    }

    pub fn splice_update(&mut self, conversation_id: &ConversationId, message: Message) -> bool {
        let changed = self.messages.splice_update(conversation_id, message);
        if changed {
            self.messages_changed(conversation_id);
        }
        changed
    }

    pub fn delete_message(&mut self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        let changed = self.messages.delete_one(conversation_id, message_id);
        if changed {
            self.messages_changed(conversation_id);
        }
        changed
    }

    pub fn clear_messages(&mut self, conversation_id: &ConversationId) -> bool {
        let changed = self.messages.clear(conversation_id);
        if changed {
            self.messages_changed(conversation_id);
        }
        changed
    }

    // Exchanges

    /// Supersedes any in-flight exchange for the conversation.
    pub fn begin_exchange(&mut self, conversation_id: &ConversationId) -> StreamHandle {
        let handle = self.streams.begin(conversation_id);
        self.events
            .publish(StoreEvent::StreamChanged(conversation_id.clone()));
        handle
    }

    pub fn mark_streaming(&mut self, handle: &StreamHandle) {
        if self.streams.mark_streaming(handle) {
            self.events
                .publish(StoreEvent::StreamChanged(handle.conversation_id.clone()));
        }
    }

    pub fn end_exchange(&mut self, handle: &StreamHandle) -> bool {
        let conversation_id = &handle.conversation_id;
        if self.unflushed.contains(conversation_id) {
            self.persist_messages(conversation_id);
        }
        self.last_stream_flush.remove(conversation_id);
        let ended = self.streams.end_exchange(handle);
        if ended {
            self.events
                .publish(StoreEvent::StreamChanged(handle.conversation_id.clone()));
        }
        ended
    }

    pub fn cancel_exchange(&mut self, conversation_id: &ConversationId) -> bool {
        let cancelled = self.streams.cancel(conversation_id);
        if cancelled {
            self.events
                .publish(StoreEvent::StreamChanged(conversation_id.clone()));
        }
        cancelled
    }

    pub fn cancel_all_exchanges(&mut self) {
        self.streams.cancel_all();
    }

    pub fn set_error(&mut self, error: Option<ExchangeError>) {
        if self.error == error {
            return;
        }
        self.error = error;
        self.events.publish(StoreEvent::ErrorChanged);
    }

    fn conversations_changed(&mut self) {
        self.persist_conversations();
        self.events.publish(StoreEvent::ConversationsChanged);
    }

    fn messages_changed(&mut self, conversation_id: &ConversationId) {
        self.persist_messages(conversation_id);
        self.events
            .publish(StoreEvent::MessagesChanged(conversation_id.clone()));
    }

    fn persist_conversations(&mut self) {
        let list = self.conversations.list();
        let current = self.conversations.current_id();
        if let Err(err) = self.persistence.save_conversations(&list, current) {
            warn!(error = %err, "failed to persist conversations");
        }
    }

    fn persist_messages(&mut self, conversation_id: &ConversationId) {
        self.unflushed.remove(conversation_id);
        let messages = self.messages.messages(conversation_id);
        if let Err(err) = self.persistence.save_messages(conversation_id, messages) {
            warn!(conversation = %conversation_id, error = %err, "failed to persist messages");
        }
    }
}

/// Cloneable access to the engine from any task.
#[derive(Clone)]
pub struct EngineHandle {
    inner: Arc<Mutex<EngineState>>,
    events: EventBus,
}

impl EngineHandle {
    pub fn open(persistence: Box<dyn Persistence>) -> Result<Self, PersistenceError> {
        let events = EventBus::new();
        let state = EngineState::hydrate(persistence, events.clone())?;
        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
            events,
        })
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn read<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::persistence::MemoryPersistence;

    fn bot() -> BotRef {
        BotRef::new("scripted", "chat_continuous")
    }

    fn open(store: &MemoryPersistence) -> EngineHandle {
        EngineHandle::open(Box::new(store.clone())).unwrap()
    }

    #[test]
    fn mutations_write_through_to_persistence() {
        let store = MemoryPersistence::new();
        let engine = open(&store);

        let cid = engine.update(|state| {
            let conversation = state.add_conversation(bot());
            state.append_message(&conversation.id, Message::user("hi"));
            conversation.id
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.conversations.len(), 1);
        assert_eq!(snapshot.current, Some(cid.clone()));
        assert_eq!(snapshot.messages[&cid][0].content, "hi");
    }

    #[test]
    fn hydrate_settles_interrupted_streams() {
        let conversation = Conversation::new(bot());
        let mut placeholder = Message::assistant_placeholder();
        placeholder.content = "half an ans".into();
        let snapshot = Snapshot {
            conversations: vec![conversation.clone()],
            current: Some(conversation.id.clone()),
            messages: [(
                conversation.id.clone(),
                vec![Message::user("q"), placeholder],
            )]
            .into_iter()
            .collect(),
        };
        let store = MemoryPersistence::with_snapshot(snapshot);
        let engine = open(&store);

        engine.read(|state| {
            let messages = state.messages(&conversation.id);
            assert!(messages.iter().all(|m| !m.stream));
            assert_eq!(messages[1].content, "half an ans");
            assert_eq!(state.conversations().current_id(), Some(&conversation.id));
            assert_eq!(state.streams().active_count(), 0);
        });
        assert!(store.snapshot().messages[&conversation.id]
            .iter()
            .all(|m| !m.stream));
    }

    #[test]
    fn delete_conversation_cancels_and_removes_transcript() {
        let store = MemoryPersistence::new();
        let engine = open(&store);
        let (cid, handle) = engine.update(|state| {
            let conversation = state.add_conversation(bot());
            state.append_message(&conversation.id, Message::user("hi"));
            let handle = state.begin_exchange(&conversation.id);
            (conversation.id, handle)
        });

        assert!(engine.update(|state| state.delete_conversation(&cid)));
        assert!(handle.token.is_cancelled());
        engine.read(|state| {
            assert!(state.conversations().is_empty());
            assert!(state.conversations().current_id().is_none());
            assert!(state.messages(&cid).is_empty());
        });
        assert!(!store.snapshot().messages.contains_key(&cid));
    }

    #[test]
    fn exchange_state_follows_precedence() {
        let engine = open(&MemoryPersistence::new());
        engine.update(|state| {
            let cid = state.add_conversation(bot()).id;
            assert_eq!(state.exchange_state(&cid, false), ExchangeState::Normal);
            assert_eq!(state.exchange_state(&cid, true), ExchangeState::Editing);

            let handle = state.begin_exchange(&cid);
            assert_eq!(state.exchange_state(&cid, true), ExchangeState::Loading);

            state.mark_streaming(&handle);
            assert_eq!(state.exchange_state(&cid, false), ExchangeState::Streaming);

            state.set_error(Some(ExchangeError::new("x", "boom")));
            assert_eq!(state.exchange_state(&cid, false), ExchangeState::Error);

            state.set_error(None);
            state.end_exchange(&handle);
            assert_eq!(state.exchange_state(&cid, false), ExchangeState::Normal);
        });
    }

    #[test]
    fn events_are_published_for_changes() {
        let engine = open(&MemoryPersistence::new());
        let mut rx = engine.subscribe();
        let cid = engine.update(|state| state.add_conversation(bot()).id);
        engine.update(|state| state.append_message(&cid, Message::user("hi")));

        assert_eq!(rx.try_recv().unwrap(), StoreEvent::ConversationsChanged);
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::CurrentChanged(Some(cid.clone()))
        );
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::MessagesChanged(cid));
    }

    #[test]
    fn unchanged_error_slot_does_not_republish() {
        let engine = open(&MemoryPersistence::new());
        let mut rx = engine.subscribe();
        engine.update(|state| state.set_error(None));
        assert!(rx.try_recv().is_err());
    }
}
