//! Prompt orchestration: turning user intents into exchanges.
//!
//! Every operation mutates engine state synchronously under the engine lock and, when
//! an exchange starts, spawns one task that drives the provider adapter. Starting an
//! exchange supersedes the previous one for the same conversation before any message
//! is touched, so a late write from the old task can never land in the new transcript.
//!
//! Operations return the spawned task's `JoinHandle` so callers may await settlement;
//! dropping it does not cancel anything.

mod exchange;
mod title;


use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::conversation::BotRef;
use crate::core::engine::EngineHandle;
use crate::core::ids::{ConversationId, MessageId};
use crate::core::message::{Message, MessagePatch};
use crate::providers::settings::ResolvedSettings;
use crate::providers::{PromptRequest, ProviderRegistry};
use exchange::Exchange;
use title::TitleJob;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Bot for conversations created implicitly by `send`.
    pub default_bot: BotRef,
    pub auto_title: bool,
}

/// What a new exchange does to the transcript before the placeholder is appended.
enum Turn {
    Fresh(String),
    RetryFrom(MessageId),
    EditAndResend(MessageId, String),
}

#[derive(Clone)]
pub struct Orchestrator {
    engine: EngineHandle,
    providers: Arc<ProviderRegistry>,
    settings: Arc<HashMap<String, ResolvedSettings>>,
    options: Arc<OrchestratorOptions>,
}

impl Orchestrator {
    pub fn new(
        engine: EngineHandle,
        providers: ProviderRegistry,
        settings: HashMap<String, ResolvedSettings>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            engine,
            providers: Arc::new(providers),
            settings: Arc::new(settings),
            options: Arc::new(options),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn settings_for(&self, provider_id: &str) -> ResolvedSettings {
        self.settings.get(provider_id).cloned().unwrap_or_default()
    }

    pub fn default_bot(&self) -> &BotRef {
        &self.options.default_bot
    }

    // Conversation management

    pub fn new_conversation(&self, bot: Option<BotRef>) -> ConversationId {
        let bot = bot.unwrap_or_else(|| self.options.default_bot.clone());
        self.engine.update(|state| state.add_conversation(bot).id)
    }

    pub fn set_current(&self, conversation_id: &ConversationId) -> bool {
        self.engine.update(|state| state.set_current(conversation_id))
    }

    pub fn delete_conversation(&self, conversation_id: &ConversationId) -> bool {
        let deleted = self
            .engine
            .update(|state| state.delete_conversation(conversation_id));
        if deleted {
            info!(conversation = %conversation_id, "conversation deleted");
        }
        deleted
    }

    pub fn rename(&self, conversation_id: &ConversationId, name: &str) -> bool {
        let name = name.trim().to_string();
        self.engine
            .update(|state| state.rename_conversation(conversation_id, name))
    }

    pub fn set_icon(&self, conversation_id: &ConversationId, icon: Option<String>) -> bool {
        self.engine
            .update(|state| state.set_icon(conversation_id, icon))
    }

    pub fn set_system_info(&self, conversation_id: &ConversationId, system_info: Option<String>) -> bool {
        let system_info = system_info.filter(|text| !text.trim().is_empty());
        self.engine
            .update(|state| state.set_system_info(conversation_id, system_info))
    }

    /// Stops any exchange first so no write lands in the emptied transcript.
    pub fn clear_messages(&self, conversation_id: &ConversationId) -> bool {
        self.engine.update(|state| {
            state.cancel_exchange(conversation_id);
            state.clear_messages(conversation_id)
        })
    }

    pub fn delete_message(&self, conversation_id: &ConversationId, message_id: &MessageId) -> bool {
        self.engine
            .update(|state| state.delete_message(conversation_id, message_id))
    }

    pub fn set_selected(&self, conversation_id: &ConversationId, message_id: &MessageId, selected: bool) -> bool {
        self.engine.update(|state| {
            state.update_message(conversation_id, message_id, &MessagePatch::selected(selected))
        })
    }

    // Exchanges

    /// Sends `text` in the current conversation, creating one when none is current.
    pub fn send(&self, text: &str) -> Option<JoinHandle<()>> {
        if text.trim().is_empty() {
            return None;
        }
        let conversation_id = self.engine.update(|state| {
            match state.conversations().current_id() {
                Some(id) => id.clone(),
                None => state.add_conversation(self.options.default_bot.clone()).id,
            }
        });
        self.send_in(&conversation_id, text)
    }

    pub fn send_in(&self, conversation_id: &ConversationId, text: &str) -> Option<JoinHandle<()>> {
        if text.trim().is_empty() {
            return None;
        }
        self.start(conversation_id, Turn::Fresh(text.to_string()))
    }

    /// Drops `message_id` and everything after it, then asks for a new reply to what
    /// remains.
    pub fn retry_from(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Option<JoinHandle<()>> {
        self.start(conversation_id, Turn::RetryFrom(message_id.clone()))
    }

    /// Replaces a user message's text, drops everything after it and resends.
    pub fn edit_and_resend(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        text: &str,
    ) -> Option<JoinHandle<()>> {
        if text.trim().is_empty() {
            return None;
        }
        self.start(
            conversation_id,
            Turn::EditAndResend(message_id.clone(), text.to_string()),
        )
    }

    /// Cancels the in-flight exchange. Content received so far is kept.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        let cancelled = self
            .engine
            .update(|state| state.cancel_exchange(conversation_id));
        if cancelled {
            info!(conversation = %conversation_id, "exchange cancelled");
        }
        cancelled
    }

    pub fn dismiss_error(&self) {
        self.engine.update(|state| state.set_error(None));
    }

    /// Cancels every in-flight exchange, used on shutdown.
    pub fn cancel_all(&self) {
        self.engine.update(|state| state.cancel_all_exchanges());
    }

    fn start(&self, conversation_id: &ConversationId, turn: Turn) -> Option<JoinHandle<()>> {
        let prepared = self.engine.update(|state| {
            let conversation = state.conversations().get(conversation_id)?.clone();

            let (provider, bot) = match self.providers.resolve(&conversation.bot) {
                Ok(found) => found,
                Err(err) => {
                    warn!(conversation = %conversation_id, error = %err, "cannot start exchange");
                    state.set_error(Some(err));
                    return None;
                }
            };

            // Validate before superseding anything, so a rejected intent leaves the
            // running exchange alone.
            let edited = match &turn {
                Turn::Fresh(_) => None,
                Turn::RetryFrom(message_id) => {
                    let messages = state.messages(conversation_id);
                    let index = messages.iter().position(|msg| &msg.id == message_id)?;
                    if !messages[..index].iter().any(Message::is_user) {
                        debug!(conversation = %conversation_id, "nothing to retry");
                        return None;
                    }
                    None
                }
                Turn::EditAndResend(message_id, text) => {
                    let original = state.message(conversation_id, message_id)?;
                    if !original.is_user() {
                        return None;
                    }
                    let mut edited = original.clone();
                    edited.content.clone_from(text);
                    Some(edited)
                }
            };

            let handle = state.begin_exchange(conversation_id);

            let prompt = match turn {
                Turn::Fresh(text) => {
                    state.append_message(conversation_id, Message::user(text.clone()));
                    text
                }
                Turn::RetryFrom(message_id) => {
                    state.splice_from(conversation_id, &message_id);
                    String::new()
                }
                Turn::EditAndResend(..) => {
                    if let Some(edited) = edited {
                        state.splice_update(conversation_id, edited);
                    }
                    String::new()
                }
            };

            let history = state.messages(conversation_id).to_vec();
            let placeholder = Message::assistant_placeholder();
            let message_id = placeholder.id.clone();
            state.append_message(conversation_id, placeholder);
            state.set_error(None);
            state.touch(conversation_id);

            let title = (self.options.auto_title
                && bot.kind.is_chat()
                && conversation.name.is_empty())
            .then(|| TitleJob {
                conversation_id: conversation_id.clone(),
                message_id: message_id.clone(),
                prompt: history
                    .iter()
                    .find(|msg| msg.is_user())
                    .map(|msg| msg.content.clone())
                    .unwrap_or_default(),
                settings: self.settings_for(provider.id()),
            });

            debug!(
                conversation = %conversation_id,
                exchange = handle.exchange_id,
                bot = %conversation.bot,
                "exchange started"
            );

            let request = PromptRequest {
                settings: self.settings_for(provider.id()),
                conversation,
                bot,
                prompt,
                history,
            };
            Some(Exchange {
                engine: self.engine.clone(),
                provider,
                request,
                handle,
                message_id,
                title,
            })
        })?;

        Some(tokio::spawn(exchange::run(prepared)))
    }
}
