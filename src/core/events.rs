//! Change notifications for observers of engine state.
//!
//! Events carry no payload beyond what changed; subscribers re-read the state
//! through [`crate::core::engine::EngineHandle::read`]. A lagging subscriber loses
//! intermediate events but never a final state, since a re-read always sees the
//! latest values.

use tokio::sync::broadcast;

use crate::core::ids::ConversationId;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConversationsChanged,
    CurrentChanged(Option<ConversationId>),
    MessagesChanged(ConversationId),
    StreamChanged(ConversationId),
    ErrorChanged,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StoreEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}
