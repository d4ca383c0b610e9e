//! Helpers shared by the chat-completion providers.
//!
//! Reply-text extraction, the retrying request loop, SSE stream pumping and
//! model listing. Mistral and OpenAI speak the same chat-completions
//! dialect, so the transport lives here and the provider modules only build
//! their request bodies and headers.

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;

use crate::error::LlmError;
use crate::llms::streaming::{ChannelStreamReceiver, SseDecoder, SsePayload, StreamChunk, StreamUsage};

/// Longest slice of a response body quoted in errors and logs.
const BODY_EXCERPT_LEN: usize = 500;

// ---------------------------------------------------------------------------
// Reply text extraction
// ---------------------------------------------------------------------------

/// Flatten a `content` value into text.
///
/// Accepts a plain string or a list of parts, where parts are strings or
/// objects carrying `text`/`content`.
pub fn content_to_string(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let pieces: Vec<String> = parts
                .iter()
                .filter_map(|p| match p {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => p
                        .get("text")
                        .or_else(|| p.get("content"))
                        .and_then(|t| t.as_str())
                        .map(String::from),
                    _ => None,
                })
                .collect();
            Some(pieces.join(""))
        }
        _ => None,
    }
}

/// Extract the reply text from a non-streaming response.
///
/// Tries, in order: `choices[0].message.content`, `choices[0].text`,
/// `outputs[0].{content,text,message,output}`, then top-level
/// `message|content|text|result`. Falls back to the serialized body.
pub fn extract_reply_text(response: &Value) -> String {
    if let Some(choice) = response.get("choices").and_then(|c| c.get(0)) {
        let message = choice.get("message").or_else(|| choice.get("output"));
        if let Some(text) = message
            .and_then(|m| m.get("content").or_else(|| m.get("text")))
            .and_then(content_to_string)
        {
            return text;
        }
        if let Some(text) = choice.get("text").and_then(|t| t.as_str()) {
            return text.to_string();
        }
    }

    if let Some(first) = response.get("outputs").and_then(|o| o.get(0)) {
        for key in ["content", "text", "message", "output"] {
            if let Some(text) = first.get(key).and_then(content_to_string) {
                return text;
            }
        }
    }

    for key in ["message", "content", "text", "result"] {
        if let Some(text) = response.get(key).and_then(|v| v.as_str()) {
            return text.to_string();
        }
    }

    match response {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Whether a message text reports throttling.
pub fn is_rate_limit_message(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit")
}

/// First [`BODY_EXCERPT_LEN`] chars of a body, cut on a char boundary.
pub fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

// ---------------------------------------------------------------------------
// Request loop
// ---------------------------------------------------------------------------

/// Send a request built by `build`, retrying with exponential backoff.
///
/// Transport errors, 429 and 5xx are retried up to `max_retries` extra times
/// (first delay 1 s, doubling). Other non-success statuses fail immediately
/// with the body attached. Returns the successful response.
pub async fn send_with_retries<F>(
    provider: &str,
    max_retries: u32,
    initial_delay: Duration,
    build: F,
) -> Result<reqwest::Response, LlmError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_error: Option<LlmError> = None;
    let mut retry_delay = initial_delay;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            log::warn!(
                "{} API retry attempt {} after {:?}",
                provider,
                attempt,
                retry_delay
            );
            tokio::time::sleep(retry_delay).await;
            retry_delay *= 2;
        }

        let response = match build().send().await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                last_error = Some(LlmError::Timeout {
                    provider: provider.to_string(),
                });
                continue;
            }
            Err(e) => {
                last_error = Some(LlmError::Http(e));
                continue;
            }
        };

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            last_error = Some(LlmError::RateLimited {
                provider: provider.to_string(),
            });
            continue;
        }

        if status.is_server_error() {
            last_error = Some(LlmError::Server {
                provider: provider.to_string(),
                status: status.as_u16(),
            });
            continue;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                provider: provider.to_string(),
                status: status.as_u16(),
                body: excerpt(&body).to_string(),
            });
        }

        return Ok(response);
    }

    Err(last_error.unwrap_or_else(|| LlmError::Parse {
        provider: provider.to_string(),
        message: "call failed after all retries".to_string(),
    }))
}

/// Read a successful response body as JSON.
pub async fn read_json(provider: &str, response: reqwest::Response) -> Result<Value, LlmError> {
    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| LlmError::Parse {
        provider: provider.to_string(),
        message: format!("{} - Body: {}", e, excerpt(&text)),
    })
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Pump an SSE response into a channel-backed receiver.
///
/// A background task decodes the body, forwards text deltas, and finishes
/// with `Done` (assembled text plus usage) or `Error`. `on_usage` is called
/// once with the usage reported by the stream, if any.
pub fn spawn_sse_stream<U>(provider: &str, response: reqwest::Response, on_usage: U) -> ChannelStreamReceiver
where
    U: FnOnce(&StreamUsage) + Send + 'static,
{
    let (tx, rx) = ChannelStreamReceiver::pair(64);
    let provider = provider.to_string();

    tokio::spawn(async move {
        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        let mut content = String::new();
        let mut usage: Option<StreamUsage> = None;
        let mut finished = false;

        'read: while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(b) => b,
                Err(e) => {
                    log::warn!("{} stream read failed: {}", provider, e);
                    let _ = tx.send(StreamChunk::Error { message: e.to_string() }).await;
                    return;
                }
            };
            for payload in decoder.feed(&bytes) {
                match payload {
                    SsePayload::Text(text) => {
                        content.push_str(&text);
                        if tx.send(StreamChunk::TextDelta { text }).await.is_err() {
                            // Receiver dropped; stop reading.
                            return;
                        }
                    }
                    SsePayload::Usage(u) => usage = Some(u),
                    SsePayload::Done => {
                        finished = true;
                        break 'read;
                    }
                }
            }
        }

        if !finished {
            for payload in decoder.finish() {
                match payload {
                    SsePayload::Text(text) => {
                        content.push_str(&text);
                        let _ = tx.send(StreamChunk::TextDelta { text }).await;
                    }
                    SsePayload::Usage(u) => usage = Some(u),
                    SsePayload::Done => {}
                }
            }
        }

        if let Some(ref u) = usage {
            on_usage(u);
        }
        log::debug!("{} stream finished: {} chars", provider, content.chars().count());
        let _ = tx.send(StreamChunk::Done { content, usage }).await;
    });

    rx
}

// ---------------------------------------------------------------------------
// Model listing
// ---------------------------------------------------------------------------

/// Collect the `data[].id` fields of a `/models` response.
pub fn model_ids(response: &Value) -> Vec<String> {
    response
        .get("data")
        .and_then(|d| d.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|m| m.get("id").and_then(|id| id.as_str()).map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_openai_shape() {
        let resp = json!({"choices": [{"message": {"role": "assistant", "content": "Salom!"}}]});
        assert_eq!(extract_reply_text(&resp), "Salom!");
    }

    #[test]
    fn test_extract_content_parts() {
        let resp = json!({"choices": [{"message": {"content": [
            {"type": "text", "text": "Bir "},
            {"type": "text", "text": "ikki"}
        ]}}]});
        assert_eq!(extract_reply_text(&resp), "Bir ikki");
    }

    #[test]
    fn test_extract_conversations_shape() {
        let resp = json!({"outputs": [{"type": "message.output", "content": "natija"}]});
        assert_eq!(extract_reply_text(&resp), "natija");
    }

    #[test]
    fn test_extract_fallbacks() {
        assert_eq!(extract_reply_text(&json!({"result": "r"})), "r");
        assert_eq!(extract_reply_text(&json!({"choices": [{"text": "legacy"}]})), "legacy");
        assert_eq!(extract_reply_text(&Value::Null), "");
        assert_eq!(extract_reply_text(&json!({"x": 1})), r#"{"x":1}"#);
    }

    #[test]
    fn test_rate_limit_message() {
        assert!(is_rate_limit_message("Status 429"));
        assert!(is_rate_limit_message("Too Many Requests"));
        assert!(!is_rate_limit_message("unauthorized"));
    }

    #[test]
    fn test_excerpt_char_boundary() {
        let body = "ё".repeat(600);
        assert_eq!(excerpt(&body).chars().count(), 500);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn test_model_ids() {
        let resp = json!({"data": [{"id": "mistral-small-latest"}, {"id": "mistral-large-latest"}]});
        assert_eq!(model_ids(&resp), vec!["mistral-small-latest", "mistral-large-latest"]);
        assert!(model_ids(&json!({})).is_empty());
    }
}
