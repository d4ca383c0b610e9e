//! OpenAI chat-completion provider.
//!
//! Talks to the Chat Completions API (`/chat/completions`) over `reqwest`.
//!
//! # Features
//!
//! - Complete and SSE-streamed replies
//! - Organization/project headers
//! - Frequency and presence penalties, seed
//! - Model listing (`/models`)
//! - Token usage tracking

use std::collections::HashMap;
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
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI completion implementation.
///
/// # Example
///
/// ```ignore
/// let provider = OpenAICompletion::new("gpt-4o-mini", Some(key), None);
/// let reply = provider.complete(&[ChatMessage::user("Salom")]).await?;
/// ```
#[derive(Debug)]
pub struct OpenAICompletion {
    /// Shared base LLM state.
    pub state: BaseLLMState,

    /// Organization ID for multi-tenant access.
    pub organization: Option<String>,
    /// Project ID for project-scoped access.
    pub project: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Transport-level retries on 429/5xx.
    pub max_retries: u32,
    /// Extra headers sent with every request.
    pub default_headers: HashMap<String, String>,

    // --- Generation parameters ---
    /// Frequency penalty (-2 to 2).
    pub frequency_penalty: Option<f64>,
    /// Presence penalty (-2 to 2).
    pub presence_penalty: Option<f64>,
    /// Seed for deterministic generation.
    pub seed: Option<i64>,
    /// Whether [`ChatLLM::stream`] uses SSE.
    pub stream: bool,

    client: reqwest::Client,
}

impl OpenAICompletion {
    /// Create a new OpenAI completion provider.
    ///
    /// # Arguments
    ///
    /// * `model` - OpenAI model name (e.g., "gpt-4o-mini").
    /// * `api_key` - API key; calls fail with `MissingApiKey` without one.
    /// * `base_url` - Optional custom base URL.
    pub fn new(model: impl Into<String>, api_key: Option<String>, base_url: Option<String>) -> Self {
        let mut state = BaseLLMState::new(model, "openai");
        state.api_key = api_key;
        state.base_url = base_url;

        Self {
            state,
            organization: None,
            project: None,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            default_headers: HashMap::new(),
            frequency_penalty: None,
            presence_penalty: None,
            seed: None,
            stream: false,
            client: reqwest::Client::new(),
        }
    }

    /// Create a provider from the `LLM_*` settings.
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

    /// Get the API base URL.
    pub fn api_base_url(&self) -> String {
        self.state
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// Build the request body for the Chat Completions API.
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
        if let Some(freq_pen) = self.frequency_penalty {
            body["frequency_penalty"] = serde_json::json!(freq_pen);
        }
        if let Some(pres_pen) = self.presence_penalty {
            body["presence_penalty"] = serde_json::json!(pres_pen);
        }
        if let Some(seed) = self.seed {
            body["seed"] = serde_json::json!(seed);
        }
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }

        body
    }

    fn request(&self, method: reqwest::Method, url: &str, api_key: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, url)
            .timeout(self.timeout)
            .bearer_auth(api_key);

        if let Some(ref org) = self.organization {
            request = request.header("OpenAI-Organization", org);
        }
        if let Some(ref proj) = self.project {
            request = request.header("OpenAI-Project", proj);
        }
        for (k, v) in &self.default_headers {
            request = request.header(k, v);
        }
        request
    }

    async fn post_chat(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response, LlmError> {
        let api_key = self.state.require_api_key()?;
        let body = self.build_request_body(messages, stream);
        let endpoint = format!("{}/chat/completions", self.api_base_url());

        log::debug!(
            "OpenAI request {}: model={}, messages={}, stream={}",
            generate_call_id(),
            self.state.model,
            messages.len(),
            stream,
        );

        send_with_retries("openai", self.max_retries, Duration::from_secs(1), || {
            self.request(reqwest::Method::POST, &endpoint, api_key).json(&body)
        })
        .await
    }
}

#[async_trait]
impl ChatLLM for OpenAICompletion {
    fn model(&self) -> &str {
        &self.state.model
    }

    fn provider(&self) -> &str {
        "openai"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let response = self.post_chat(messages, false).await?;
        let json = read_json("openai", response).await?;

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
            "openai",
            response,
            self.state.stream_usage_sink(),
        )))
    }

    fn usage_summary(&self) -> TokenUsage {
        self.state.token_usage()
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let api_key = self.state.require_api_key()?;
        let endpoint = format!("{}/models", self.api_base_url());
        let response = send_with_retries("openai", self.max_retries, Duration::from_secs(1), || {
            self.request(reqwest::Method::GET, &endpoint, api_key)
        })
        .await?;
        Ok(model_ids(&read_json("openai", response).await?))
    }
}
