//! Provider adapters: the pluggable backends that turn a prompt into content.
//!
//! An adapter never touches engine state directly. Streaming output goes through the
//! [`ContentSink`] handed in by the orchestrator, and every call settles with an
//! outcome value instead of an error escaping the adapter.

pub mod openai;
pub mod settings;

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::conversation::{BotRef, Conversation};
use crate::core::message::Message;
use settings::{ResolvedSettings, SettingItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotKind {
    /// Multi-turn chat that replays the whole transcript.
    ChatContinuous,
    /// Each request carries only the latest user turn.
    ChatSingle,
    ImageGeneration,
}

impl BotKind {
    pub fn content_mode(self) -> ContentMode {
        match self {
            BotKind::ChatContinuous | BotKind::ChatSingle => ContentMode::Incremental,
            BotKind::ImageGeneration => ContentMode::Replace,
        }
    }

    pub fn is_chat(self) -> bool {
        !matches!(self, BotKind::ImageGeneration)
    }
}

/// How successive sink writes relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    /// Each write extends the previous one.
    Incremental,
    /// Each write is a whole new value (JSON payloads).
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotMeta {
    pub id: String,
    pub name: String,
    pub kind: BotKind,
}

impl BotMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: BotKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Normalized adapter failure, the value shown in the error slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeError {
    pub code: String,
    pub message: String,
}

impl ExchangeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl StdError for ExchangeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    Completed,
    Cancelled,
    Error(ExchangeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RapidOutcome {
    Completed(String),
    Cancelled,
    Error(ExchangeError),
}

#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub conversation: Conversation,
    pub bot: BotMeta,
    /// Newly typed text; empty when resending existing history.
    pub prompt: String,
    /// Transcript up to, not including, the assistant turn being produced.
    pub history: Vec<Message>,
    pub settings: ResolvedSettings,
}

impl PromptRequest {
    /// Text of the newest user turn, falling back to the typed prompt.
    pub fn latest_user_text(&self) -> Option<&str> {
        if !self.prompt.trim().is_empty() {
            return Some(self.prompt.as_str());
        }
        self.history
            .iter()
            .rev()
            .find(|msg| msg.is_user())
            .map(|msg| msg.content.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RapidRequest {
    pub prompt: String,
    pub settings: ResolvedSettings,
}

/// Receiver for streamed content of one exchange.
pub trait ContentSink: Send {
    /// Sets the target message content to `content` (the accumulated value, not a
    /// delta). Returns false once the exchange must stop producing output.
    fn replace(&mut self, content: &str) -> bool;
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn bots(&self) -> &[BotMeta];

    fn settings_schema(&self) -> &[SettingItem];

    /// Raw setting values taken from the environment, applied over the config file.
    fn env_overrides(&self) -> BTreeMap<String, serde_json::Value> {
        BTreeMap::new()
    }

    fn bot(&self, bot_id: &str) -> Option<&BotMeta> {
        self.bots().iter().find(|bot| bot.id == bot_id)
    }

    async fn handle_prompt(
        &self,
        request: PromptRequest,
        sink: &mut dyn ContentSink,
        cancel: CancellationToken,
    ) -> PromptOutcome;

    /// One-shot exchange with no intermediate writes.
    async fn handle_rapid_prompt(
        &self,
        request: RapidRequest,
        cancel: CancellationToken,
    ) -> RapidOutcome;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) {
        self.providers
            .retain(|existing| !existing.id().eq_ignore_ascii_case(provider.id()));
        self.providers.push(provider);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers
            .iter()
            .find(|provider| provider.id().eq_ignore_ascii_case(id))
            .cloned()
    }

    pub fn list(&self) -> &[Arc<dyn ProviderAdapter>] {
        &self.providers
    }

    pub fn resolve(&self, bot: &BotRef) -> Result<(Arc<dyn ProviderAdapter>, BotMeta), ExchangeError> {
        let provider = self.get(&bot.provider_id).ok_or_else(|| {
            ExchangeError::new(
                "provider_not_found",
                format!("No provider named '{}' is available", bot.provider_id),
            )
        })?;
        let meta = provider.bot(&bot.bot_id).cloned().ok_or_else(|| {
            ExchangeError::new(
                "bot_not_found",
                format!(
                    "Provider '{}' has no bot named '{}'",
                    bot.provider_id, bot.bot_id
                ),
            )
        })?;
        Ok((provider, meta))
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.providers.iter().map(|provider| provider.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::ScriptedProvider;

    #[test]
    fn registry_resolves_bots_case_insensitively() {
        let (provider, _calls) = ScriptedProvider::new();
        let mut registry = ProviderRegistry::new();
        registry.register(provider);

        let (found, meta) = registry
            .resolve(&BotRef::new("Scripted", "image_generation"))
            .unwrap();
        assert_eq!(found.id(), "scripted");
        assert_eq!(meta.kind, BotKind::ImageGeneration);
    }

    #[test]
    fn registry_reports_unknown_provider_and_bot() {
        let (provider, _calls) = ScriptedProvider::new();
        let mut registry = ProviderRegistry::new();
        registry.register(provider);

        let err = registry
            .resolve(&BotRef::new("missing", "chat_continuous"))
            .err()
            .unwrap();
        assert_eq!(err.code, "provider_not_found");

        let err = registry
            .resolve(&BotRef::new("scripted", "nope"))
            .err()
            .unwrap();
        assert_eq!(err.code, "bot_not_found");
    }

    #[test]
    fn latest_user_text_prefers_prompt_then_history() {
        let request = PromptRequest {
            conversation: Conversation::new(BotRef::new("scripted", "chat_continuous")),
            bot: BotMeta::new("chat_continuous", "Chat", BotKind::ChatContinuous),
            prompt: String::new(),
            history: vec![
                Message::user("first"),
                Message::new(crate::core::message::Role::Assistant, "reply"),
                Message::user("second"),
            ],
            settings: ResolvedSettings::default(),
        };
        assert_eq!(request.latest_user_text(), Some("second"));

        let typed = PromptRequest {
            prompt: "typed".into(),
            ..request
        };
        assert_eq!(typed.latest_user_text(), Some("typed"));
    }

    #[test]
    fn image_bots_use_replace_semantics() {
        assert_eq!(
            BotKind::ImageGeneration.content_mode(),
            ContentMode::Replace
        );
        assert_eq!(BotKind::ChatSingle.content_mode(), ContentMode::Incremental);
    }
}
