//! Request construction for the OpenAI HTTP API.

use crate::api::{ChatMessage, ChatRequest, ImageRequest};
use crate::core::message::Role;
use crate::providers::settings::ResolvedSettings;
use crate::providers::{BotKind, ExchangeError, PromptRequest};
use crate::utils::url::construct_versioned_api_url;

use super::{
    DEFAULT_BASE_URL, DEFAULT_IMAGE_SIZE, DEFAULT_MODEL, KEY_API_KEY, KEY_BASE_URL,
    KEY_IMAGE_SIZE, KEY_MAX_TOKENS, KEY_MODEL, KEY_TEMPERATURE, KEY_TOP_P,
};

/// Where and how to reach the API, taken from resolved settings.
#[derive(Debug, Clone)]
pub struct Endpoint {
    base_url: String,
    api_key: String,
}

impl Endpoint {
    pub fn from_settings(settings: &ResolvedSettings) -> Result<Self, ExchangeError> {
        let api_key = settings
            .str(KEY_API_KEY)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                ExchangeError::new(
                    "missing_api_key",
                    "No OpenAI API key configured. Set OPENAI_API_KEY or providers.openai.api_key.",
                )
            })?;
        let base_url = settings.str(KEY_BASE_URL).unwrap_or(DEFAULT_BASE_URL);
        Ok(Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        construct_versioned_api_url(&self.base_url, endpoint)
    }

    pub fn post(&self, client: &reqwest::Client, endpoint: &str) -> reqwest::RequestBuilder {
        client
            .post(self.url(endpoint))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

/// Chat messages for a request: the system prompt first, then the transcript as the
/// bot kind wants it. Empty turns (cancelled placeholders) are left out.
pub fn chat_messages(request: &PromptRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(system) = request
        .conversation
        .system_info
        .as_deref()
        .filter(|text| !text.trim().is_empty())
    {
        messages.push(ChatMessage::new(Role::System.as_str(), system));
    }

    match request.bot.kind {
        BotKind::ChatSingle => {
            if let Some(text) = request.latest_user_text() {
                messages.push(ChatMessage::new(Role::User.as_str(), text));
            }
        }
        BotKind::ChatContinuous | BotKind::ImageGeneration => {
            messages.extend(
                request
                    .history
                    .iter()
                    .filter(|msg| !msg.content.trim().is_empty())
                    .map(|msg| ChatMessage::new(msg.role.as_str(), msg.content.clone())),
            );
        }
    }
    messages
}

pub fn chat_request(settings: &ResolvedSettings, messages: Vec<ChatMessage>, stream: bool) -> ChatRequest {
    ChatRequest {
        model: settings.str(KEY_MODEL).unwrap_or(DEFAULT_MODEL).to_string(),
        messages,
        stream,
        max_tokens: settings.u32(KEY_MAX_TOKENS).filter(|tokens| *tokens > 0),
        temperature: settings.f64(KEY_TEMPERATURE),
        top_p: settings.f64(KEY_TOP_P),
    }
}

pub fn image_request(settings: &ResolvedSettings, prompt: &str) -> ImageRequest {
    ImageRequest {
        prompt: prompt.to_string(),
        n: 1,
        size: settings
            .str(KEY_IMAGE_SIZE)
            .unwrap_or(DEFAULT_IMAGE_SIZE)
            .to_string(),
        response_format: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::{BotRef, Conversation};
    use crate::core::message::Message;
    use crate::providers::BotMeta;
    use serde_json::json;

    fn request(kind: BotKind, system: Option<&str>) -> PromptRequest {
        let mut conversation = Conversation::new(BotRef::new("openai", "chat"));
        conversation.system_info = system.map(str::to_string);
        PromptRequest {
            conversation,
            bot: BotMeta::new("chat", "Chat", kind),
            prompt: String::new(),
            history: vec![
                Message::user("first question"),
                Message::new(Role::Assistant, "first answer"),
                Message::new(Role::Assistant, ""),
                Message::user("second question"),
            ],
            settings: ResolvedSettings::default(),
        }
    }

    fn settings(pairs: &[(&str, serde_json::Value)]) -> ResolvedSettings {
        let mut settings = ResolvedSettings::default();
        for (key, value) in pairs {
            settings.set(*key, value.clone());
        }
        settings
    }

    #[test]
    fn continuous_chat_replays_history_after_system_prompt() {
        let messages = chat_messages(&request(BotKind::ChatContinuous, Some("Be brief.")));
        let pairs: Vec<(&str, &str)> = messages
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("system", "Be brief."),
                ("user", "first question"),
                ("assistant", "first answer"),
                ("user", "second question"),
            ]
        );
    }

    #[test]
    fn single_chat_sends_only_latest_user_turn() {
        let messages = chat_messages(&request(BotKind::ChatSingle, None));
        assert_eq!(messages, vec![ChatMessage::new("user", "second question")]);
    }

    #[test]
    fn endpoint_requires_api_key() {
        let err = Endpoint::from_settings(&ResolvedSettings::default()).unwrap_err();
        assert_eq!(err.code, "missing_api_key");
    }

    #[test]
    fn endpoint_builds_versioned_urls() {
        let endpoint = Endpoint::from_settings(&settings(&[
            (KEY_API_KEY, json!("sk-test")),
            (KEY_BASE_URL, json!("localhost:8080/v1/")),
        ]))
        .unwrap();
        assert_eq!(
            endpoint.url("chat/completions"),
            "https://localhost:8080/v1/chat/completions"
        );

        let default = Endpoint::from_settings(&settings(&[(KEY_API_KEY, json!("sk"))])).unwrap();
        assert_eq!(
            default.url("images/generations"),
            "https://api.openai.com/v1/images/generations"
        );
    }

    #[test]
    fn chat_request_serializes_sampling_settings() {
        let request = chat_request(
            &settings(&[
                (KEY_MODEL, json!("gpt-4o-2024-08-06")),
                (KEY_MAX_TOKENS, json!(2048.0)),
                (KEY_TEMPERATURE, json!(0.7)),
                (KEY_TOP_P, json!(1.0)),
            ]),
            vec![ChatMessage::new("user", "hi")],
            true,
        );
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["model"], "gpt-4o-2024-08-06");
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn zero_max_tokens_is_omitted() {
        let request = chat_request(&settings(&[(KEY_MAX_TOKENS, json!(0))]), Vec::new(), false);
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["model"], DEFAULT_MODEL);
    }
}
