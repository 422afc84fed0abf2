use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::conversation::BotRef;
use crate::core::engine::EngineHandle;
use crate::core::ids::ConversationId;
use crate::core::message::Message;
use crate::core::orchestrator::{Orchestrator, OrchestratorOptions};
use crate::core::persistence::MemoryPersistence;
use crate::providers::settings::{ResolvedSettings, SettingItem};
use crate::providers::{
    BotKind, BotMeta, ContentSink, ExchangeError, PromptOutcome, PromptRequest, ProviderAdapter,
    ProviderRegistry, RapidOutcome, RapidRequest,
};

pub const SCRIPTED_PROVIDER: &str = "scripted";

pub fn chat_bot() -> BotRef {
    BotRef::new(SCRIPTED_PROVIDER, "chat_continuous")
}

pub fn image_bot() -> BotRef {
    BotRef::new(SCRIPTED_PROVIDER, "image_generation")
}

#[derive(Debug)]
pub enum ScriptStep {
    Content(String),
    Complete,
    Fail(ExchangeError),
}

/// One `handle_prompt` invocation, steered by the test.
#[derive(Debug)]
pub struct ScriptedCall {
    pub conversation_id: ConversationId,
    pub prompt: String,
    pub history: Vec<Message>,
    pub bot_kind: BotKind,
    steps: mpsc::UnboundedSender<ScriptStep>,
}

impl ScriptedCall {
    /// Delivers the accumulated content so far.
    pub fn content(&self, accumulated: &str) {
        let _ = self.steps.send(ScriptStep::Content(accumulated.to_string()));
    }

    pub fn complete(&self) {
        let _ = self.steps.send(ScriptStep::Complete);
    }

    pub fn fail(&self, code: &str, message: &str) {
        let _ = self
            .steps
            .send(ScriptStep::Fail(ExchangeError::new(code, message)));
    }
}

/// Provider whose output is fed through channels. Every `handle_prompt` call is
/// reported on the receiver returned by [`ScriptedProvider::new`].
pub struct ScriptedProvider {
    bots: Vec<BotMeta>,
    calls: mpsc::UnboundedSender<ScriptedCall>,
    rapid_reply: Mutex<Option<RapidOutcome>>,
    rapid_prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ScriptedCall>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Self {
            bots: vec![
                BotMeta::new("chat_continuous", "Chat", BotKind::ChatContinuous),
                BotMeta::new("chat_single", "Single", BotKind::ChatSingle),
                BotMeta::new("image_generation", "Image", BotKind::ImageGeneration),
            ],
            calls: tx,
            rapid_reply: Mutex::new(None),
            rapid_prompts: Mutex::new(Vec::new()),
        };
        (Arc::new(provider), rx)
    }

    pub fn set_rapid_reply(&self, outcome: RapidOutcome) {
        *self.rapid_reply.lock().unwrap() = Some(outcome);
    }

    pub fn rapid_prompts(&self) -> Vec<String> {
        self.rapid_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn id(&self) -> &str {
        SCRIPTED_PROVIDER
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn bots(&self) -> &[BotMeta] {
        &self.bots
    }

    fn settings_schema(&self) -> &[SettingItem] {
        &[]
    }

    async fn handle_prompt(
        &self,
        request: PromptRequest,
        sink: &mut dyn ContentSink,
        cancel: CancellationToken,
    ) -> PromptOutcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _ = self.calls.send(ScriptedCall {
            conversation_id: request.conversation.id.clone(),
            prompt: request.prompt.clone(),
            history: request.history.clone(),
            bot_kind: request.bot.kind,
            steps: tx,
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return PromptOutcome::Cancelled,
                step = rx.recv() => match step {
                    Some(ScriptStep::Content(content)) => {
                        if !sink.replace(&content) {
                            return PromptOutcome::Cancelled;
                        }
                    }
                    Some(ScriptStep::Complete) => return PromptOutcome::Completed,
                    Some(ScriptStep::Fail(err)) => return PromptOutcome::Error(err),
                    None => {
                        return PromptOutcome::Error(ExchangeError::new(
                            "script_dropped",
                            "test dropped the scripted call",
                        ))
                    }
                },
            }
        }
    }

    async fn handle_rapid_prompt(
        &self,
        request: RapidRequest,
        _cancel: CancellationToken,
    ) -> RapidOutcome {
        self.rapid_prompts.lock().unwrap().push(request.prompt);
        self.rapid_reply
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| RapidOutcome::Error(ExchangeError::new("unscripted", "no reply set")))
    }
}

pub struct TestHarness {
    pub orchestrator: Orchestrator,
    pub provider: Arc<ScriptedProvider>,
    pub calls: mpsc::UnboundedReceiver<ScriptedCall>,
    pub store: MemoryPersistence,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(false, MemoryPersistence::new())
    }

    pub fn with_auto_title() -> Self {
        Self::with_options(true, MemoryPersistence::new())
    }

    pub fn with_options(auto_title: bool, store: MemoryPersistence) -> Self {
        let (provider, calls) = ScriptedProvider::new();
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone());
        let engine = EngineHandle::open(Box::new(store.clone())).unwrap();
        let settings: HashMap<String, ResolvedSettings> = HashMap::new();
        let orchestrator = Orchestrator::new(
            engine,
            registry,
            settings,
            OrchestratorOptions {
                default_bot: chat_bot(),
                auto_title,
            },
        );
        Self {
            orchestrator,
            provider,
            calls,
            store,
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        self.orchestrator.engine()
    }

    /// Waits for the next adapter invocation.
    pub async fn next_call(&mut self) -> ScriptedCall {
        tokio::time::timeout(Duration::from_secs(5), self.calls.recv())
            .await
            .expect("timed out waiting for provider call")
            .expect("provider dropped")
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.engine()
            .read(|state| state.messages(conversation_id).to_vec())
    }

    pub fn contents(&self, conversation_id: &ConversationId) -> Vec<String> {
        self.messages(conversation_id)
            .into_iter()
            .map(|msg| msg.content)
            .collect()
    }

    pub fn current_id(&self) -> ConversationId {
        self.engine()
            .read(|state| state.conversations().current_id().cloned())
            .expect("no current conversation")
    }
}

/// Lets spawned exchange tasks run until they block again.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
