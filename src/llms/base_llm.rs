//! Base chat-completion abstraction.
//!
//! Provides the [`ChatLLM`] trait implemented by every hosted provider, the
//! [`ChatMessage`] wire type, and [`BaseLLMState`], the shared state that
//! concrete providers embed (model, sampling parameters, credentials and
//! token-usage counters).

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::streaming::{StreamReceiver, StreamUsage, VecStreamReceiver};
use crate::error::LlmError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Chunk size used when a complete reply is replayed as a stream.
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 200;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat-completion conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// Generate a unique id used to correlate log lines of one upstream call.
pub fn generate_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// Monotonically increasing call counter for debugging.
static CALL_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Get the next call sequence number.
pub fn next_call_sequence() -> usize {
    CALL_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// ChatLLM trait
// ---------------------------------------------------------------------------

/// A hosted chat-completion API.
///
/// Implementations must be cheap to share behind an `Arc`; all methods take
/// `&self` and keep their mutable bookkeeping behind locks.
#[async_trait]
pub trait ChatLLM: Send + Sync + fmt::Debug {
    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Provider name used in logs and errors.
    fn provider(&self) -> &str;

    /// Request a complete reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Whether [`ChatLLM::stream`] talks to a real streaming endpoint.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Request a reply as a stream of text deltas.
    ///
    /// The default implementation calls [`ChatLLM::complete`] and replays the
    /// result in fixed-size chunks.
    async fn stream(&self, messages: &[ChatMessage]) -> Result<Box<dyn StreamReceiver>, LlmError> {
        let full = self.complete(messages).await?;
        Ok(Box::new(VecStreamReceiver::from_text(
            &full,
            DEFAULT_STREAM_CHUNK_SIZE,
        )))
    }

    /// Cumulative token usage of this instance.
    fn usage_summary(&self) -> TokenUsage {
        TokenUsage::default()
    }

    /// Model ids available to the configured key.
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec![self.model().to_string()])
    }
}

// ---------------------------------------------------------------------------
// BaseLLMState - shared state for providers
// ---------------------------------------------------------------------------

/// Token usage counters, cumulative over the lifetime of a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub successful_requests: i64,
}

/// Shared state for provider implementations.
#[derive(Debug)]
pub struct BaseLLMState {
    /// The model identifier/name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,
    /// Maximum tokens in the response.
    pub max_tokens: Option<u32>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Provider name (e.g. "mistral", "openai").
    pub provider: String,
    token_usage: Arc<Mutex<TokenUsage>>,
}

impl BaseLLMState {
    /// Create a new state for the given model.
    pub fn new(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            top_p: None,
            max_tokens: None,
            api_key: None,
            base_url: None,
            provider: provider.into(),
            token_usage: Arc::new(Mutex::new(TokenUsage::default())),
        }
    }

    /// Return the API key or the error every provider reports without one.
    pub fn require_api_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::MissingApiKey {
                provider: self.provider.clone(),
            })
    }

    /// Track token usage from the `usage` object of a response.
    pub fn track_token_usage(&self, usage: &Value) {
        let prompt_tokens = usage
            .get("prompt_tokens")
            .or_else(|| usage.get("input_tokens"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let completion_tokens = usage
            .get("completion_tokens")
            .or_else(|| usage.get("output_tokens"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        log::debug!(
            "{} token usage: prompt={}, completion={}",
            self.provider,
            prompt_tokens,
            completion_tokens
        );

        let mut counters = self.token_usage.lock();
        counters.prompt_tokens += prompt_tokens;
        counters.completion_tokens += completion_tokens;
        counters.total_tokens += prompt_tokens + completion_tokens;
        counters.successful_requests += 1;
    }

    /// Snapshot of the usage counters.
    pub fn token_usage(&self) -> TokenUsage {
        self.token_usage.lock().clone()
    }

    /// Callback recording the usage reported at the end of a stream.
    ///
    /// Stream readers run on their own task, so the callback owns a handle
    /// to the counters instead of borrowing the state.
    pub fn stream_usage_sink(&self) -> impl FnOnce(&StreamUsage) + Send + 'static {
        let counters = Arc::clone(&self.token_usage);
        move |usage| {
            let mut counters = counters.lock();
            counters.prompt_tokens += usage.prompt_tokens;
            counters.completion_tokens += usage.completion_tokens;
            counters.total_tokens += usage.prompt_tokens + usage.completion_tokens;
            counters.successful_requests += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::streaming::StreamChunk;

    #[derive(Debug)]
    struct EchoLLM;

    #[async_trait]
    impl ChatLLM for EchoLLM {
        fn model(&self) -> &str {
            "echo-1"
        }

        fn provider(&self) -> &str {
            "echo"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    #[test]
    fn test_message_serde() {
        let msg = ChatMessage::assistant("salom");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "salom");
    }

    #[test]
    fn test_track_token_usage() {
        let state = BaseLLMState::new("m", "mistral");
        state.track_token_usage(&serde_json::json!({"prompt_tokens": 10, "completion_tokens": 5}));
        state.track_token_usage(&serde_json::json!({"input_tokens": 1, "output_tokens": 2}));
        let usage = state.token_usage();
        assert_eq!(usage.prompt_tokens, 11);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, 18);
        assert_eq!(usage.successful_requests, 2);
    }

    #[test]
    fn test_stream_usage_sink() {
        let state = BaseLLMState::new("m", "mistral");
        let sink = state.stream_usage_sink();
        sink(&StreamUsage { prompt_tokens: 4, completion_tokens: 6, total_tokens: 10 });
        assert_eq!(state.token_usage().total_tokens, 10);
        assert_eq!(state.token_usage().successful_requests, 1);
    }

    #[test]
    fn test_require_api_key() {
        let mut state = BaseLLMState::new("m", "openai");
        assert!(matches!(state.require_api_key(), Err(LlmError::MissingApiKey { .. })));
        state.api_key = Some(String::new());
        assert!(state.require_api_key().is_err());
        state.api_key = Some("k".into());
        assert_eq!(state.require_api_key().unwrap(), "k");
    }

    #[tokio::test]
    async fn test_default_stream_replays_complete() {
        let text = "a".repeat(450);
        let mut rx = EchoLLM.stream(&[ChatMessage::user(text.clone())]).await.unwrap();

        let mut deltas = Vec::new();
        while let Some(chunk) = rx.next().await {
            match chunk {
                StreamChunk::TextDelta { text } => deltas.push(text),
                StreamChunk::Done { content, .. } => assert_eq!(content, text),
                StreamChunk::Error { message } => panic!("unexpected error {}", message),
            }
        }
        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas.concat(), text);
    }
}
