//! Mistral chat-completion provider.
//!
//! Mistral's `/v1/chat/completions` endpoint accepts the OpenAI request shape
//! with two extras: `random_seed` and `safe_prompt`.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llms::base_llm::{generate_call_id, BaseLLMState, ChatLLM, ChatMessage, TokenUsage};
use crate::llms::providers::utils::{
    extract_reply_text, model_ids, read_json, send_with_retries, spawn_sse_stream,
};
use crate::llms::streaming::StreamReceiver;

/// Default API base.
pub const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";

/// Mistral completion implementation.
#[derive(Debug)]
pub struct MistralCompletion {
    pub state: BaseLLMState,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Seed for deterministic sampling.
    pub random_seed: Option<i64>,
    /// Prepend Mistral's own safety prompt.
    pub safe_prompt: bool,
    pub stream: bool,
    client: reqwest::Client,
}

impl MistralCompletion {
    pub fn new(model: impl Into<String>, api_key: Option<String>, base_url: Option<String>) -> Self {
        let mut state = BaseLLMState::new(model, "mistral");
        state.api_key = api_key;
        state.base_url = base_url;

        Self {
            state,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            random_seed: None,
            safe_prompt: false,
            stream: false,
            client: reqwest::Client::new(),
        }
    }

    /// Provider set up from the `LLM_*` settings.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut p = Self::new(
            config.model.clone(),
            Some(config.api_key.clone()),
            config.base_url.clone(),
        );
        p.state.temperature = Some(config.temperature);
        p.state.max_tokens = config.max_tokens;
        p.state.top_p = config.top_p;
        p.stream = config.streaming;
        p.timeout = config.timeout;
        p.max_retries = config.transport_retries;
        p
    }

    pub fn api_base_url(&self) -> String {
        self.state
            .base_url
            .as_deref()
            .unwrap_or(MISTRAL_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn build_request_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let mut body = serde_json::json!({
            "model": self.state.model,
            "messages": messages,
        });

        if let Some(temp) = self.state.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max_tokens) = self.state.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(top_p) = self.state.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(seed) = self.random_seed {
            body["random_seed"] = serde_json::json!(seed);
        }
        if self.safe_prompt {
            body["safe_prompt"] = serde_json::json!(true);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }

    async fn send(
        &self,
        method: reqwest::Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, LlmError> {
        let api_key = self.state.require_api_key()?;
        send_with_retries("mistral", self.max_retries, Duration::from_secs(1), || {
            let request = self
                .client
                .request(method.clone(), endpoint)
                .timeout(self.timeout)
                .bearer_auth(api_key)
                .header("Accept", "application/json, text/event-stream");
            match body {
                Some(b) => request.json(b),
                None => request,
            }
        })
        .await
    }

    async fn post_chat(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = self.build_request_body(messages, stream);
        let endpoint = format!("{}/chat/completions", self.api_base_url());
        log::debug!(
            "Mistral request {}: model={}, messages={}, stream={}",
            generate_call_id(),
            self.state.model,
            messages.len(),
            stream,
        );
        self.send(reqwest::Method::POST, &endpoint, Some(&body)).await
    }
}

#[async_trait]
impl ChatLLM for MistralCompletion {
    fn model(&self) -> &str {
        &self.state.model
    }

    fn provider(&self) -> &str {
        "mistral"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let response = self.post_chat(messages, false).await?;
        let json = read_json("mistral", response).await?;
        if let Some(usage) = json.get("usage") {
            self.state.track_token_usage(usage);
        }
        Ok(extract_reply_text(&json))
    }

    fn supports_streaming(&self) -> bool {
        self.stream
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<Box<dyn StreamReceiver>, LlmError> {
        let response = self.post_chat(messages, true).await?;
        Ok(Box::new(spawn_sse_stream(
            "mistral",
            response,
            self.state.stream_usage_sink(),
        )))
    }

    fn usage_summary(&self) -> TokenUsage {
        self.state.token_usage()
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let endpoint = format!("{}/models", self.api_base_url());
        let response = self.send(reqwest::Method::GET, &endpoint, None).await?;
        Ok(model_ids(&read_json("mistral", response).await?))
    }
}
