//! OpenAI chat and image adapter.

pub mod api;
pub mod stream;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ChatMessage, CompletionResponse, ImageResponse};
use crate::core::message::Role;
use crate::providers::settings::{SelectOption, SettingItem, SettingKind};
use crate::providers::{
    BotKind, BotMeta, ContentSink, ExchangeError, PromptOutcome, PromptRequest, ProviderAdapter,
    RapidOutcome, RapidRequest,
};
use api::Endpoint;
use stream::{api_error, SseDecoder, SseEvent};

pub const PROVIDER_ID: &str = "openai";

pub const KEY_API_KEY: &str = "api_key";
pub const KEY_BASE_URL: &str = "base_url";
pub const KEY_MODEL: &str = "model";
pub const KEY_MAX_TOKENS: &str = "max_tokens";
pub const KEY_TEMPERATURE: &str = "temperature";
pub const KEY_TOP_P: &str = "top_p";
pub const KEY_IMAGE_SIZE: &str = "image_size";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini-2024-07-18";
pub const DEFAULT_IMAGE_SIZE: &str = "512x512";

const MODELS: &[&str] = &[
    "gpt-3.5-turbo-0125",
    "gpt-4-turbo-2024-04-09",
    "gpt-4o-2024-08-06",
    "gpt-4o-mini-2024-07-18",
];

pub struct OpenAiProvider {
    client: reqwest::Client,
    bots: Vec<BotMeta>,
    schema: Vec<SettingItem>,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            bots: vec![
                BotMeta::new("chat_continuous", "Continuous Chat", BotKind::ChatContinuous),
                BotMeta::new("chat_single", "Single Chat", BotKind::ChatSingle),
                BotMeta::new("image_generation", "DALL·E", BotKind::ImageGeneration),
            ],
            schema: settings_schema(),
        }
    }

    async fn stream_chat(
        &self,
        endpoint: Endpoint,
        request: PromptRequest,
        sink: &mut dyn ContentSink,
        cancel: CancellationToken,
    ) -> PromptOutcome {
        let body = api::chat_request(&request.settings, api::chat_messages(&request), true);

        let response = match endpoint
            .post(&self.client, "chat/completions")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return PromptOutcome::Error(network_error(&err)),
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return PromptOutcome::Error(api_error(Some(status), &error_text));
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut accumulated = String::new();

        loop {
            // The server may hold the connection open between events.
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PromptOutcome::Cancelled,
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => return PromptOutcome::Error(network_error(&err)),
            };
            for event in decoder.push(&bytes) {
                if let Some(outcome) = apply_event(event, &mut accumulated, sink) {
                    return outcome;
                }
            }
        }

        for event in decoder.finish() {
            if let Some(outcome) = apply_event(event, &mut accumulated, sink) {
                return outcome;
            }
        }
        debug!(chars = accumulated.len(), "chat stream closed without [DONE]");
        PromptOutcome::Completed
    }

    async fn generate_image(
        &self,
        endpoint: Endpoint,
        request: PromptRequest,
        sink: &mut dyn ContentSink,
        cancel: CancellationToken,
    ) -> PromptOutcome {
        let Some(prompt) = request
            .latest_user_text()
            .map(str::trim)
            .filter(|text| !text.is_empty())
        else {
            return PromptOutcome::Error(ExchangeError::new(
                "invalid_request",
                "Nothing to generate an image from",
            ));
        };
        let body = api::image_request(&request.settings, prompt);

        let response = match endpoint
            .post(&self.client, "images/generations")
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return PromptOutcome::Error(network_error(&err)),
        };
        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(err) => return PromptOutcome::Error(network_error(&err)),
        };
        if !status.is_success() {
            return PromptOutcome::Error(api_error(Some(status.as_u16()), &text));
        }
        if cancel.is_cancelled() {
            return PromptOutcome::Cancelled;
        }

        let parsed: ImageResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => return PromptOutcome::Error(invalid_response(err.to_string())),
        };
        let Some(first) = parsed.data.into_iter().next() else {
            return PromptOutcome::Error(invalid_response("response contained no images"));
        };
        let content = first.to_string();
        if sink.replace(&content) {
            PromptOutcome::Completed
        } else {
            PromptOutcome::Cancelled
        }
    }

    async fn complete(
        &self,
        endpoint: Endpoint,
        request: RapidRequest,
    ) -> Result<String, ExchangeError> {
        let body = api::chat_request(
            &request.settings,
            vec![ChatMessage::new(Role::User.as_str(), request.prompt)],
            false,
        );
        let response = endpoint
            .post(&self.client, "chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|err| network_error(&err))?;
        let status = response.status();
        let text = response.text().await.map_err(|err| network_error(&err))?;
        if !status.is_success() {
            return Err(api_error(Some(status.as_u16()), &text));
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&text).map_err(|err| invalid_response(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| invalid_response("completion had no content"))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn bots(&self) -> &[BotMeta] {
        &self.bots
    }

    fn settings_schema(&self) -> &[SettingItem] {
        &self.schema
    }

    fn env_overrides(&self) -> BTreeMap<String, serde_json::Value> {
        [
            ("OPENAI_API_KEY", KEY_API_KEY),
            ("OPENAI_BASE_URL", KEY_BASE_URL),
        ]
        .into_iter()
        .filter_map(|(var, key)| {
            std::env::var(var)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(|value| (key.to_string(), serde_json::Value::String(value)))
        })
        .collect()
    }

    async fn handle_prompt(
        &self,
        request: PromptRequest,
        sink: &mut dyn ContentSink,
        cancel: CancellationToken,
    ) -> PromptOutcome {
        let endpoint = match Endpoint::from_settings(&request.settings) {
            Ok(endpoint) => endpoint,
            Err(err) => return PromptOutcome::Error(err),
        };
        debug!(
            bot = %request.bot.id,
            conversation = %request.conversation.id,
            turns = request.history.len(),
            "sending prompt"
        );

        let token = cancel.clone();
        let work = async move {
            match request.bot.kind {
                BotKind::ChatContinuous | BotKind::ChatSingle => {
                    self.stream_chat(endpoint, request, sink, cancel).await
                }
                BotKind::ImageGeneration => {
                    self.generate_image(endpoint, request, sink, cancel).await
                }
            }
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => PromptOutcome::Cancelled,
            outcome = work => outcome,
        }
    }

    async fn handle_rapid_prompt(
        &self,
        request: RapidRequest,
        cancel: CancellationToken,
    ) -> RapidOutcome {
        let endpoint = match Endpoint::from_settings(&request.settings) {
            Ok(endpoint) => endpoint,
            Err(err) => return RapidOutcome::Error(err),
        };

        tokio::select! {
            _ = cancel.cancelled() => RapidOutcome::Cancelled,
            result = self.complete(endpoint, request) => match result {
                Ok(text) => RapidOutcome::Completed(text),
                Err(err) => RapidOutcome::Error(err),
            },
        }
    }
}

/// Returns the outcome once the stream should stop.
fn apply_event(
    event: SseEvent,
    accumulated: &mut String,
    sink: &mut dyn ContentSink,
) -> Option<PromptOutcome> {
    match event {
        SseEvent::Delta(text) => {
            accumulated.push_str(&text);
            if sink.replace(accumulated) {
                None
            } else {
                Some(PromptOutcome::Cancelled)
            }
        }
        SseEvent::Done => Some(PromptOutcome::Completed),
        SseEvent::Error(err) => Some(PromptOutcome::Error(err)),
    }
}

fn network_error(err: &reqwest::Error) -> ExchangeError {
    ExchangeError::new("network_error", err.to_string())
}

fn invalid_response(detail: impl Into<String>) -> ExchangeError {
    ExchangeError::new("invalid_response", detail)
}

fn settings_schema() -> Vec<SettingItem> {
    vec![
        SettingItem::new(KEY_API_KEY, "API Key", SettingKind::ApiKey)
            .describe("Overridden by OPENAI_API_KEY"),
        SettingItem::new(
            KEY_BASE_URL,
            "Base URL",
            SettingKind::Input {
                default: Some(DEFAULT_BASE_URL.to_string()),
            },
        )
        .describe("Custom base url for OpenAI API. Overridden by OPENAI_BASE_URL"),
        SettingItem::new(
            KEY_MODEL,
            "OpenAI model",
            SettingKind::Select {
                options: MODELS
                    .iter()
                    .map(|model| SelectOption::new(*model, *model))
                    .collect(),
                default: DEFAULT_MODEL.to_string(),
            },
        ),
        SettingItem::new(
            KEY_MAX_TOKENS,
            "Max Tokens",
            SettingKind::Slider {
                min: 0.0,
                max: 32768.0,
                step: 1.0,
                default: 4096.0,
            },
        )
        .describe("Maximum number of tokens to generate. 0 leaves it to the model"),
        SettingItem::new(
            KEY_TEMPERATURE,
            "Temperature",
            SettingKind::Slider {
                min: 0.0,
                max: 2.0,
                step: 0.1,
                default: 1.0,
            },
        )
        .describe("Higher values make the output more random"),
        SettingItem::new(
            KEY_TOP_P,
            "Top P",
            SettingKind::Slider {
                min: 0.0,
                max: 1.0,
                step: 0.1,
                default: 1.0,
            },
        )
        .describe("Nucleus sampling; keep either this or temperature at its default"),
        SettingItem::new(
            KEY_IMAGE_SIZE,
            "Image size",
            SettingKind::Select {
                options: ["256x256", "512x512", "1024x1024"]
                    .into_iter()
                    .map(|size| SelectOption::new(size, size))
                    .collect(),
                default: DEFAULT_IMAGE_SIZE.to_string(),
            },
        ),
    ]
}
