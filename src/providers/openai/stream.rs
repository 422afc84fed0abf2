//! Server-sent event decoding for streamed chat completions, and API error shaping.

use memchr::memchr;
use tracing::{debug, warn};

use crate::api::ChatResponse;
use crate::providers::ExchangeError;

#[derive(Clone, Debug, PartialEq)]
pub enum SseEvent {
    Delta(String),
    Done,
    Error(ExchangeError),
}

impl SseEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, SseEvent::Done | SseEvent::Error(_))
    }
}

/// Splits a byte stream into `data:` lines. Chunks may end mid-line (or mid
/// code point); the remainder waits in the buffer for the next push.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let event = decode_line(&self.buffer[..newline_pos]);
            self.buffer.drain(..=newline_pos);
            if let Some(event) = event {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finish_now();
                    break;
                }
            }
        }
        events
    }

    /// Flushes a trailing line that never got its newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.finished || self.buffer.is_empty() {
            self.finish_now();
            return Vec::new();
        }
        let event = decode_line(&self.buffer);
        self.finish_now();
        event.into_iter().collect()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish_now(&mut self) {
        self.finished = true;
        self.buffer.clear();
    }
}

fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    match std::str::from_utf8(raw) {
        Ok(line) => process_sse_line(line.trim()),
        Err(err) => {
            warn!(error = %err, "invalid UTF-8 in event stream");
            None
        }
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(payload: &str) -> Option<SseEvent> {
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Delta),
        Err(_) => {
            if payload.trim().is_empty() {
                return None;
            }
            Some(SseEvent::Error(api_error(None, payload)))
        }
    }
}

fn process_sse_line(line: &str) -> Option<SseEvent> {
    extract_data_payload(line).and_then(handle_data_payload)
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

fn extract_error_code(value: &serde_json::Value) -> Option<String> {
    ["/error/code", "/error/type", "/code", "/type"]
        .iter()
        .filter_map(|pointer| value.pointer(pointer))
        .find_map(|v| match v {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// Readable rendering of an error body for diagnostics.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{}\n```", trimmed)
    } else {
        format!("API Error:\n```\n{}\n```", trimmed)
    }
}

/// Builds the normalized error for a failed response or an error payload.
///
/// The code comes from the body when it names one, otherwise from the HTTP status.
/// The message is the body's own summary, or the trimmed body when it has none.
pub fn api_error(status: Option<u16>, body: &str) -> ExchangeError {
    let trimmed = body.trim();
    let parsed = serde_json::from_str::<serde_json::Value>(trimmed).ok();
    let code = parsed
        .as_ref()
        .and_then(extract_error_code)
        .or_else(|| status.map(|status| format!("http_{status}")))
        .unwrap_or_else(|| "provider_error".to_string());
    let message = parsed
        .as_ref()
        .and_then(extract_error_summary)
        .filter(|summary| !summary.is_empty())
        .unwrap_or_else(|| match (trimmed.is_empty(), status) {
            (false, _) => trimmed.to_string(),
            (true, Some(status)) => format!("HTTP {status} with an empty body"),
            (true, None) => "empty error response".to_string(),
        });
    debug!(code = %code, details = %format_api_error(body), "provider returned an error");
    ExchangeError::new(code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_handle_spacing_variants() {
        let variants = [
            (
                r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#,
                "Hello",
                "data: [DONE]",
            ),
            (
                r#"data:{"choices":[{"delta":{"content":"World"}}]}"#,
                "World",
                "data:[DONE]",
            ),
        ];

        for (chunk_line, expected_chunk, done_line) in variants {
            assert_eq!(
                process_sse_line(chunk_line),
                Some(SseEvent::Delta(expected_chunk.to_string()))
            );
            assert_eq!(process_sse_line(done_line), Some(SseEvent::Done));
        }
    }

    #[test]
    fn comments_and_role_only_deltas_are_skipped() {
        assert_eq!(process_sse_line(": keep-alive"), None);
        assert_eq!(process_sse_line(""), None);
        assert_eq!(
            process_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(process_sse_line(r#"data: {"choices":[]}"#), None);
    }

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let first = decoder.push(b"data: {\"choices\":[{\"delta\":{\"con");
        assert!(first.is_empty());

        let second = decoder.push(b"tent\":\"Hi\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n");
        assert_eq!(
            second,
            vec![
                SseEvent::Delta("Hi".into()),
                SseEvent::Delta(" there".into())
            ]
        );

        let last = decoder.push(b"data: [DONE]\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n");
        assert_eq!(last, vec![SseEvent::Done]);
        assert!(decoder.is_finished());
        assert!(decoder.push(b"data: [DONE]\n").is_empty());
    }

    #[test]
    fn decoder_keeps_multibyte_characters_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"héllo\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(
            decoder.push(&line[split..]),
            vec![SseEvent::Delta("héllo".into())]
        );
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder
            .push(br#"data: {"choices":[{"delta":{"content":"tail"}}]}"#)
            .is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Delta("tail".into())]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn stream_error_payloads_become_terminal_errors() {
        let error_line = r#"data: {"error":{"message":"internal server error","code":"server_error"}}"#;
        let mut decoder = SseDecoder::new();
        let events = decoder.push(format!("{error_line}\n").as_bytes());

        assert_eq!(events.len(), 1);
        match &events[0] {
            SseEvent::Error(err) => {
                assert_eq!(err.code, "server_error");
                assert_eq!(err.message, "internal server error");
            }
            other => panic!("expected error event, got {:?}", other),
        }
        assert!(decoder.is_finished());
    }

    #[test]
    fn format_api_error_prettifies_json_with_summary() {
        let raw = r#"{"error":{"message":"model overloaded","type":"invalid_request_error"}}"#;
        let formatted = format_api_error(raw);

        let expected = r#"API Error: model overloaded
```json
{
  "error": {
    "message": "model overloaded",
    "type": "invalid_request_error"
  }
}
```"#;
        assert_eq!(formatted, expected);
    }

    #[test]
    fn format_api_error_handles_xml_plaintext_and_empty() {
        assert_eq!(
            format_api_error("<error>bad</error>"),
            "API Error:\n```xml\n<error>bad</error>\n```"
        );
        assert_eq!(
            format_api_error("api failure"),
            "API Error:\n```\napi failure\n```"
        );
        assert_eq!(format_api_error("  "), "API Error:\n```\n<empty>\n```");
    }

    #[test]
    fn api_error_prefers_body_code_then_status() {
        let body = r#"{"error":{"message":"Incorrect API key","type":"invalid_request_error","code":"invalid_api_key"}}"#;
        assert_eq!(api_error(Some(401), body).code, "invalid_api_key");

        let typed = r#"{"error":{"message":"slow down","type":"rate_limit"}}"#;
        assert_eq!(api_error(Some(429), typed).code, "rate_limit");

        assert_eq!(api_error(Some(502), "Bad Gateway").code, "http_502");
        assert_eq!(api_error(None, "garbage").code, "provider_error");
    }

    #[test]
    fn api_error_message_is_plain_text() {
        let body = r#"{"error":{"message":"Rate limit   reached\nfor requests","type":"requests","code":"rate_limit"}}"#;
        let err = api_error(Some(429), body);
        assert_eq!(err.message, "Rate limit reached for requests");
        assert!(!err.message.contains("```"));

        assert_eq!(api_error(Some(502), "  Bad Gateway\n").message, "Bad Gateway");
        assert_eq!(api_error(Some(500), r#"{"detail":1}"#).message, r#"{"detail":1}"#);
        assert_eq!(api_error(Some(503), "").message, "HTTP 503 with an empty body");
    }
}
