//! Terminal output for exchanges: incremental printing of streamed replies and
//! saving generated images.

use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::core::engine::EngineHandle;
use crate::core::ids::{ConversationId, MessageId};
use crate::core::message::Message;
use crate::providers::{BotKind, ProviderRegistry};

struct Tracked {
    conversation_id: ConversationId,
    message_id: MessageId,
    kind: BotKind,
    printed: usize,
}

/// Follows one assistant message and prints whatever content it gained since the
/// last refresh.
#[derive(Default)]
pub struct StreamPrinter {
    active: Option<Tracked>,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracking(&self) -> bool {
        self.active.is_some()
    }

    /// Starts following the newest message of `conversation_id`, the placeholder an
    /// exchange just appended.
    pub fn track(
        &mut self,
        engine: &EngineHandle,
        providers: &ProviderRegistry,
        conversation_id: &ConversationId,
    ) {
        let found = engine.read(|state| {
            let conversation = state.conversations().get(conversation_id)?;
            let message = state.messages(conversation_id).last()?;
            message
                .is_assistant()
                .then(|| (message.id.clone(), conversation.bot.clone()))
        });
        self.active = found.map(|(message_id, bot)| Tracked {
            conversation_id: conversation_id.clone(),
            message_id,
            kind: providers
                .resolve(&bot)
                .map(|(_, meta)| meta.kind)
                .unwrap_or(BotKind::ChatContinuous),
            printed: 0,
        });
    }

    pub fn forget(&mut self) {
        self.active = None;
    }

    /// Prints new chat content. Returns the message once its exchange has settled,
    /// after which nothing is tracked.
    pub fn refresh(&mut self, engine: &EngineHandle, out: &mut impl Write) -> io::Result<Option<Message>> {
        let Some(tracked) = self.active.as_mut() else {
            return Ok(None);
        };
        let message = engine.read(|state| {
            state
                .message(&tracked.conversation_id, &tracked.message_id)
                .cloned()
        });
        let Some(message) = message else {
            // Cleared or deleted underneath us.
            if tracked.printed > 0 {
                writeln!(out)?;
            }
            self.active = None;
            return Ok(None);
        };

        if tracked.kind.is_chat() {
            if let Some(fresh) = message.content.get(tracked.printed..) {
                if !fresh.is_empty() {
                    write!(out, "{fresh}")?;
                    out.flush()?;
                }
                tracked.printed = message.content.len();
            }
        }

        if message.stream {
            return Ok(None);
        }
        if tracked.kind.is_chat() && tracked.printed > 0 {
            writeln!(out)?;
        }
        self.active = None;
        Ok(Some(message))
    }
}

/// Where an image reply ended up, for display.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutput {
    Url(String),
    Saved(PathBuf),
}

/// Interprets an image-generation reply: a remote url is passed through, inline
/// base64 data is written to `images/<message id>.png` under `data_dir`.
pub fn render_image(
    content: &str,
    data_dir: &Path,
    message_id: &MessageId,
) -> Result<ImageOutput, Box<dyn Error>> {
    let value: Value = serde_json::from_str(content)?;
    if let Some(url) = value.get("url").and_then(Value::as_str) {
        return Ok(ImageOutput::Url(url.to_string()));
    }
    let Some(encoded) = value.get("b64_json").and_then(Value::as_str) else {
        return Err("image reply has neither url nor b64_json".into());
    };
    let bytes = STANDARD.decode(encoded.trim())?;
    let dir = data_dir.join("images");
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.png", message_id.as_str()));
    fs::write(&path, bytes)?;
    Ok(ImageOutput::Saved(path))
}

/// Prompt revision some image models report alongside the image.
pub fn revised_prompt(content: &str) -> Option<String> {
    let value: Value = serde_json::from_str(content).ok()?;
    value
        .get("revised_prompt")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::MessagePatch;
    use crate::utils::test_utils::{image_bot, settle, TestHarness};
    use tempfile::TempDir;

    #[tokio::test]
    async fn prints_only_new_content_and_reports_settlement() {
        let mut harness = TestHarness::new();
        harness.orchestrator.send("hi");
        let cid = harness.current_id();
        let call = harness.next_call().await;

        let mut printer = StreamPrinter::new();
        printer.track(harness.engine(), harness.orchestrator.providers(), &cid);
        assert!(printer.is_tracking());

        let mut out = Vec::new();
        call.content("Hel");
        settle().await;
        assert!(printer.refresh(harness.engine(), &mut out).unwrap().is_none());
        call.content("Hello!");
        settle().await;
        assert!(printer.refresh(harness.engine(), &mut out).unwrap().is_none());
        call.complete();
        settle().await;

        let settled = printer.refresh(harness.engine(), &mut out).unwrap().unwrap();
        assert_eq!(settled.content, "Hello!");
        assert_eq!(String::from_utf8(out).unwrap(), "Hello!\n");
        assert!(!printer.is_tracking());
    }

    #[tokio::test]
    async fn cleared_message_stops_tracking() {
        let mut harness = TestHarness::new();
        harness.orchestrator.send("hi");
        let cid = harness.current_id();
        let _call = harness.next_call().await;

        let mut printer = StreamPrinter::new();
        printer.track(harness.engine(), harness.orchestrator.providers(), &cid);
        harness.orchestrator.clear_messages(&cid);

        let mut out = Vec::new();
        assert!(printer.refresh(harness.engine(), &mut out).unwrap().is_none());
        assert!(!printer.is_tracking());
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn image_content_is_not_echoed() {
        let mut harness = TestHarness::new();
        let cid = harness.orchestrator.new_conversation(Some(image_bot()));
        harness.orchestrator.send_in(&cid, "a cat");
        let call = harness.next_call().await;

        let mut printer = StreamPrinter::new();
        printer.track(harness.engine(), harness.orchestrator.providers(), &cid);
        call.content(r#"{"url":"https://img.example/cat.png"}"#);
        call.complete();
        settle().await;

        let mut out = Vec::new();
        let settled = printer.refresh(harness.engine(), &mut out).unwrap().unwrap();
        assert!(out.is_empty());
        assert_eq!(
            render_image(&settled.content, Path::new("."), &settled.id).unwrap(),
            ImageOutput::Url("https://img.example/cat.png".into())
        );
    }

    #[test]
    fn track_ignores_user_tail() {
        let harness = TestHarness::new();
        let cid = harness.orchestrator.new_conversation(None);
        harness.engine().update(|state| {
            state.append_message(&cid, Message::user("pending"));
        });
        let mut printer = StreamPrinter::new();
        printer.track(harness.engine(), harness.orchestrator.providers(), &cid);
        assert!(!printer.is_tracking());

        // Content mutations on an untracked conversation print nothing.
        let mid = harness.messages(&cid)[0].id.clone();
        harness
            .engine()
            .update(|state| state.update_message(&cid, &mid, &MessagePatch::content("x")));
        let mut out = Vec::new();
        assert!(printer.refresh(harness.engine(), &mut out).unwrap().is_none());
    }

    #[test]
    fn inline_images_are_saved_under_data_dir() {
        let dir = TempDir::new().unwrap();
        let mid = MessageId::from("m1");
        let content = format!(r#"{{"b64_json":"{}","revised_prompt":"a tabby cat"}}"#, STANDARD.encode(b"png-bytes"));

        let output = render_image(&content, dir.path(), &mid).unwrap();
        let expected = dir.path().join("images").join("m1.png");
        assert_eq!(output, ImageOutput::Saved(expected.clone()));
        assert_eq!(fs::read(expected).unwrap(), b"png-bytes");
        assert_eq!(revised_prompt(&content).as_deref(), Some("a tabby cat"));
    }

    #[test]
    fn malformed_image_reply_is_an_error() {
        let mid = MessageId::from("m1");
        assert!(render_image("not json", Path::new("."), &mid).is_err());
        assert!(render_image(r#"{"other":1}"#, Path::new("."), &mid).is_err());
    }
}
