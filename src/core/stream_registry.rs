use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::ids::ConversationId;

/// Ticket for one exchange. The token is what the provider adapter observes;
/// `exchange_id` tells a settling exchange whether it is still the active one.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    pub conversation_id: ConversationId,
    pub exchange_id: u64,
    pub token: CancellationToken,
}

#[derive(Debug)]
struct StreamEntry {
    exchange_id: u64,
    token: CancellationToken,
    streaming: bool,
}

/// At most one in-flight exchange per conversation.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    entries: HashMap<ConversationId, StreamEntry>,
    next_exchange_id: u64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels whatever was running for the conversation, then installs a fresh token.
    pub fn begin(&mut self, conversation_id: &ConversationId) -> StreamHandle {
        if let Some(previous) = self.entries.remove(conversation_id) {
            previous.token.cancel();
            debug!(
                conversation = %conversation_id,
                exchange = previous.exchange_id,
                "superseded in-flight exchange"
            );
        }

        self.next_exchange_id += 1;
        let token = CancellationToken::new();
        self.entries.insert(
            conversation_id.clone(),
            StreamEntry {
                exchange_id: self.next_exchange_id,
                token: token.clone(),
                streaming: false,
            },
        );

        StreamHandle {
            conversation_id: conversation_id.clone(),
            exchange_id: self.next_exchange_id,
            token,
        }
    }

    pub fn end(&mut self, conversation_id: &ConversationId) {
        self.entries.remove(conversation_id);
    }

    /// Ends the entry only if `handle` is still the active exchange.
    pub fn end_exchange(&mut self, handle: &StreamHandle) -> bool {
        if self.is_current(handle) {
            self.entries.remove(&handle.conversation_id);
            true
        } else {
            false
        }
    }

    pub fn cancel(&mut self, conversation_id: &ConversationId) -> bool {
        match self.entries.get(conversation_id) {
            Some(entry) => {
                entry.token.cancel();
                self.end(conversation_id);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.token.cancel();
        }
    }

    pub fn is_current(&self, handle: &StreamHandle) -> bool {
        self.entries
            .get(&handle.conversation_id)
            .is_some_and(|entry| entry.exchange_id == handle.exchange_id)
    }

    /// Flags the active exchange as having received content.
    pub fn mark_streaming(&mut self, handle: &StreamHandle) -> bool {
        match self.entries.get_mut(&handle.conversation_id) {
            Some(entry) if entry.exchange_id == handle.exchange_id => {
                let changed = !entry.streaming;
                entry.streaming = true;
                changed
            }
            _ => false,
        }
    }

    pub fn is_loading(&self, conversation_id: &ConversationId) -> bool {
        self.entries.contains_key(conversation_id)
    }

    pub fn is_streaming(&self, conversation_id: &ConversationId) -> bool {
        self.entries
            .get(conversation_id)
            .is_some_and(|entry| entry.streaming)
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}
