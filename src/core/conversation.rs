use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids::ConversationId;

/// Provider + bot binding for a conversation, written as `provider:bot`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BotRef {
    pub provider_id: String,
    pub bot_id: String,
}

impl BotRef {
    pub fn new(provider_id: impl Into<String>, bot_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            bot_id: bot_id.into(),
        }
    }
}

impl fmt::Display for BotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider_id, self.bot_id)
    }
}

impl TryFrom<&str> for BotRef {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.split_once(':') {
            Some((provider, bot)) if !provider.is_empty() && !bot.is_empty() => {
                Ok(BotRef::new(provider, bot))
            }
            _ => Err(format!("invalid bot reference: {value} (expected provider:bot)")),
        }
    }
}

impl TryFrom<String> for BotRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<BotRef> for String {
    fn from(value: BotRef) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub bot: BotRef,
    /// System prompt prepended to chat requests.
    #[serde(default)]
    pub system_info: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_use_time: DateTime<Utc>,
}

impl Conversation {
    pub fn new(bot: BotRef) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::generate(),
            name: String::new(),
            icon: None,
            bot,
            system_info: None,
            created_at: now,
            last_use_time: now,
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Untitled"
        } else {
            &self.name
        }
    }
}

/// Conversation metadata keyed by id, plus the current selection.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, Conversation>,
    current: Option<ConversationId>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a conversation bound to `bot` and makes it current.
    pub fn add(&mut self, bot: BotRef) -> Conversation {
        let mut conversation = Conversation::new(bot);
        while self.conversations.contains_key(&conversation.id) {
            conversation.id = ConversationId::generate();
        }
        self.current = Some(conversation.id.clone());
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        conversation
    }

    /// Inserts a rehydrated conversation without touching the current selection.
    pub fn insert(&mut self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn delete_by_id(&mut self, id: &ConversationId) -> Option<Conversation> {
        let removed = self.conversations.remove(id);
        if self.current.as_ref() == Some(id) {
            self.current = None;
        }
        removed
    }

    pub fn set_current(&mut self, id: &ConversationId) -> bool {
        if self.conversations.contains_key(id) {
            self.current = Some(id.clone());
            true
        } else {
            false
        }
    }

    pub fn current_id(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current
            .as_ref()
            .and_then(|id| self.conversations.get(id))
    }

    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn rename(&mut self, id: &ConversationId, name: impl Into<String>) -> bool {
        match self.conversations.get_mut(id) {
            Some(conversation) => {
                conversation.name = name.into();
                true
            }
            None => false,
        }
    }

    pub fn set_icon(&mut self, id: &ConversationId, icon: Option<String>) -> bool {
        match self.conversations.get_mut(id) {
            Some(conversation) => {
                conversation.icon = icon;
                true
            }
            None => false,
        }
    }

    pub fn set_system_info(&mut self, id: &ConversationId, system_info: Option<String>) -> bool {
        match self.conversations.get_mut(id) {
            Some(conversation) => {
                conversation.system_info = system_info;
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, id: &ConversationId) {
        if let Some(conversation) = self.conversations.get_mut(id) {
            conversation.last_use_time = Utc::now();
        }
    }

    /// Most recently used first.
    pub fn list(&self) -> Vec<&Conversation> {
        let mut items: Vec<&Conversation> = self.conversations.values().collect();
        items.sort_by(|a, b| {
            b.last_use_time
                .cmp(&a.last_use_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
