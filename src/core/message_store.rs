use std::collections::HashMap;

use crate::core::ids::{ConversationId, MessageId};
use crate::core::message::{Message, MessagePatch};

/// Ordered transcripts keyed by conversation. Insertion order is the transcript order.
///
/// Operations naming an unknown conversation or message are no-ops; the boolean
/// results only tell callers whether anything changed.
#[derive(Debug, Default)]
pub struct MessageStore {
    lists: HashMap<ConversationId, Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.lists
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Option<&Message> {
        self.messages(conversation_id)
            .iter()
            .find(|msg| &msg.id == message_id)
    }

    pub fn position(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Option<usize> {
        self.messages(conversation_id)
            .iter()
            .position(|msg| &msg.id == message_id)
    }

    pub fn append(&mut self, conversation_id: &ConversationId, message: Message) {
        self.lists
            .entry(conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Replaces a whole transcript, used when rehydrating.
    pub fn replace_all(&mut self, conversation_id: &ConversationId, messages: Vec<Message>) {
        self.lists.insert(conversation_id.clone(), messages);
    }

    pub fn update_by_id(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        patch: &MessagePatch,
    ) -> bool {
        match self
            .lists
            .get_mut(conversation_id)
            .and_then(|list| list.iter_mut().find(|msg| &msg.id == message_id))
        {
            Some(message) => {
                message.apply(patch);
                true
            }
            None => false,
        }
    }

    /// Removes `message_id` and everything after it.
    pub fn splice_from(&mut self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        let Some(list) = self.lists.get_mut(conversation_id) else {
            return false;
        };
        match list.iter().position(|msg| &msg.id == message_id) {
            Some(index) => {
                list.truncate(index);
                true
            }
            None => false,
        }
    }

    /// Replaces the stored message with the same id by `message` (keeping its id and
    /// role) and drops everything after it.
    pub fn splice_update(&mut self, conversation_id: &ConversationId, message: Message) -> bool {
        let Some(list) = self.lists.get_mut(conversation_id) else {
            return false;
        };
        match list.iter().position(|msg| msg.id == message.id) {
            Some(index) => {
                list.truncate(index + 1);
                let slot = &mut list[index];
                let role = slot.role;
                *slot = Message { role, ..message };
                true
            }
            None => false,
        }
    }

    pub fn delete_one(&mut self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        let Some(list) = self.lists.get_mut(conversation_id) else {
            return false;
        };
        let before = list.len();
        list.retain(|msg| &msg.id != message_id);
        list.len() != before
    }

    pub fn clear(&mut self, conversation_id: &ConversationId) -> bool {
        match self.lists.get_mut(conversation_id) {
            Some(list) if !list.is_empty() => {
                list.clear();
                true
            }
            _ => false,
        }
    }

    /// Drops the transcript entirely, used when its conversation is deleted.
    pub fn remove_conversation(&mut self, conversation_id: &ConversationId) -> bool {
        self.lists.remove(conversation_id).is_some()
    }
}
