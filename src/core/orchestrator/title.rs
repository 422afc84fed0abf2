use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::engine::EngineHandle;
use crate::core::ids::{ConversationId, MessageId};
use crate::providers::settings::ResolvedSettings;
use crate::providers::{ProviderAdapter, RapidOutcome, RapidRequest};

const TITLE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TITLE_CHARS: usize = 60;
const MAX_SOURCE_CHARS: usize = 2000;

pub(super) struct TitleJob {
    pub conversation_id: ConversationId,
    /// Assistant reply the title is derived from, together with `prompt`.
    pub message_id: MessageId,
    pub prompt: String,
    pub settings: ResolvedSettings,
}

pub(super) fn title_prompt(text: &str) -> String {
    format!(
        "Summarize a short and relevant title of the following text with no more than 5 words. Reply with the title only.\n\n{text}"
    )
}

/// Strips quoting and trailing punctuation models like to add.
pub(super) fn clean_title(raw: &str) -> String {
    let line = raw.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let line = line.trim();
    let line = line.strip_prefix("Title:").unwrap_or(line).trim();
    let trimmed = line
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '*' | '#'))
        .trim_end_matches(['.', '!'])
        .trim();
    trimmed.chars().take(MAX_TITLE_CHARS).collect()
}

/// Names an unnamed conversation after its first exchange. Failures are only logged.
pub(super) async fn generate(engine: EngineHandle, provider: Arc<dyn ProviderAdapter>, job: TitleJob) {
    let TitleJob {
        conversation_id,
        message_id,
        prompt,
        settings,
    } = job;

    let reply = engine.read(|state| {
        state
            .message(&conversation_id, &message_id)
            .map(|msg| msg.content.clone())
            .unwrap_or_default()
    });
    let source: String = format!("{prompt}\n\n{reply}")
        .trim()
        .chars()
        .take(MAX_SOURCE_CHARS)
        .collect();
    if source.is_empty() {
        return;
    }

    let cancel = CancellationToken::new();
    let request = RapidRequest {
        prompt: title_prompt(&source),
        settings,
    };
    let outcome = match tokio::time::timeout(
        TITLE_TIMEOUT,
        provider.handle_rapid_prompt(request, cancel.clone()),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            cancel.cancel();
            warn!(conversation = %conversation_id, "title generation timed out");
            return;
        }
    };

    match outcome {
        RapidOutcome::Completed(raw) => {
            let title = clean_title(&raw);
            if title.is_empty() {
                debug!(conversation = %conversation_id, "provider returned an empty title");
                return;
            }
            let renamed = engine.update(|state| {
                let unnamed = state
                    .conversations()
                    .get(&conversation_id)
                    .is_some_and(|conversation| conversation.name.is_empty());
                unnamed && state.rename_conversation(&conversation_id, title.clone())
            });
            if renamed {
                info!(conversation = %conversation_id, title = %title, "conversation titled");
            }
        }
        RapidOutcome::Cancelled => {
            debug!(conversation = %conversation_id, "title generation cancelled");
        }
        RapidOutcome::Error(err) => {
            warn!(conversation = %conversation_id, error = %err, "title generation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_text_after_instruction() {
        let prompt = title_prompt("hello there");
        assert!(prompt.starts_with("Summarize a short and relevant title"));
        assert!(prompt.ends_with("\n\nhello there"));
    }

    #[test]
    fn clean_title_strips_decoration() {
        assert_eq!(clean_title("\"Rust Borrow Checker Tips.\""), "Rust Borrow Checker Tips");
        assert_eq!(clean_title("\n  Title: Weekend Hiking Plan\nextra"), "Weekend Hiking Plan");
        assert_eq!(clean_title("**Bold Title**"), "Bold Title");
        assert_eq!(clean_title("   "), "");
    }

    #[test]
    fn clean_title_caps_length() {
        let long = "word ".repeat(40);
        assert_eq!(clean_title(&long).chars().count(), MAX_TITLE_CHARS);
    }
}
