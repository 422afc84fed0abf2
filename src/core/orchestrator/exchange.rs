use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::engine::{EngineHandle, EngineState};
use crate::core::ids::MessageId;
use crate::core::message::MessagePatch;
use crate::core::stream_registry::StreamHandle;
use crate::providers::{ContentMode, ContentSink, PromptOutcome, PromptRequest, ProviderAdapter};

use super::title::{self, TitleJob};

/// Everything one exchange task needs, assembled under the engine lock.
pub(super) struct Exchange {
    pub engine: EngineHandle,
    pub provider: Arc<dyn ProviderAdapter>,
    pub request: PromptRequest,
    pub handle: StreamHandle,
    pub message_id: MessageId,
    pub title: Option<TitleJob>,
}

pub(super) async fn run(exchange: Exchange) {
    let Exchange {
        engine,
        provider,
        request,
        handle,
        message_id,
        title,
    } = exchange;

    let token = handle.token.clone();
    let mut sink = ExchangeSink {
        engine: engine.clone(),
        handle: handle.clone(),
        message_id: message_id.clone(),
        mode: request.bot.kind.content_mode(),
    };

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => PromptOutcome::Cancelled,
        outcome = provider.handle_prompt(request, &mut sink, token.clone()) => outcome,
    };
    // Whatever the adapter reported, a cancelled exchange settles as cancelled.
    let outcome = if token.is_cancelled() {
        PromptOutcome::Cancelled
    } else {
        outcome
    };

    let completed = engine.update(|state| settle(state, &handle, &message_id, outcome));

    if completed {
        if let Some(job) = title {
            title::generate(engine, provider, job).await;
        }
    }
}

/// Final bookkeeping for one exchange. Returns true if it completed while current.
fn settle(
    state: &mut EngineState,
    handle: &StreamHandle,
    message_id: &MessageId,
    outcome: PromptOutcome,
) -> bool {
    let conversation_id = &handle.conversation_id;
    state.update_message(conversation_id, message_id, &MessagePatch::stream(false));
    let current = state.streams().is_current(handle);

    let completed = match outcome {
        PromptOutcome::Completed => {
            info!(
                conversation = %conversation_id,
                exchange = handle.exchange_id,
                "exchange completed"
            );
            current
        }
        PromptOutcome::Cancelled => {
            debug!(
                conversation = %conversation_id,
                exchange = handle.exchange_id,
                "exchange cancelled"
            );
            false
        }
        PromptOutcome::Error(err) => {
            if current {
                warn!(
                    conversation = %conversation_id,
                    exchange = handle.exchange_id,
                    code = %err.code,
                    "exchange failed"
                );
                state.set_error(Some(err));
            } else {
                debug!(
                    conversation = %conversation_id,
                    exchange = handle.exchange_id,
                    "dropping error from stale exchange"
                );
            }
            false
        }
    };

    state.end_exchange(handle);
    completed
}

/// Applies adapter output to the exchange's assistant message, for as long as the
/// exchange is the active one.
struct ExchangeSink {
    engine: EngineHandle,
    handle: StreamHandle,
    message_id: MessageId,
    mode: ContentMode,
}

impl ContentSink for ExchangeSink {
    fn replace(&mut self, content: &str) -> bool {
        if self.handle.token.is_cancelled() {
            return false;
        }
        let handle = &self.handle;
        let message_id = &self.message_id;
        let mode = self.mode;

        self.engine.update(|state| {
            if !state.streams().is_current(handle) {
                return false;
            }
            let Some(existing) = state.message(&handle.conversation_id, message_id) else {
                debug!(conversation = %handle.conversation_id, "exchange target is gone");
                return false;
            };
            if existing.content == content {
                return true;
            }
            if mode == ContentMode::Incremental && !content.starts_with(existing.content.as_str()) {
                warn!(
                    conversation = %handle.conversation_id,
                    have = existing.content.len(),
                    got = content.len(),
                    "rejected non-monotonic content update"
                );
                return true;
            }

            state.stream_content(&handle.conversation_id, message_id, content);
            state.mark_streaming(handle);
            true
        })
    }
}
