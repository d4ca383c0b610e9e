//! Chat-completion provider implementations.
//!
//! Each provider implements [`ChatLLM`](crate::llms::base_llm::ChatLLM) and
//! handles authentication, request formatting and streaming for its API.
//!
//! # Available Providers
//!
//! | Provider | Module | Default base URL |
//! |----------|--------|------------------|
//! | Mistral | [`mistral`] | `https://api.mistral.ai/v1` |
//! | OpenAI | [`openai`] | `https://api.openai.com/v1` |
//!
//! # Shared Utilities
//!
//! The [`utils`] module holds the retrying request loop, reply-text
//! extraction and SSE pumping shared by both providers.

pub mod mistral;
pub mod openai;
pub mod utils;

use std::sync::Arc;

use crate::config::{LlmConfig, LlmProvider};
use crate::llms::base_llm::ChatLLM;

pub use mistral::MistralCompletion;
pub use openai::OpenAICompletion;

/// Build the provider selected by the configuration.
pub fn build_provider(config: &LlmConfig) -> Arc<dyn ChatLLM> {
    match config.provider {
        LlmProvider::Mistral => Arc::new(MistralCompletion::from_config(config)),
        LlmProvider::OpenAI => Arc::new(OpenAICompletion::from_config(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;

    #[test]
    fn test_build_provider_follows_config() {
        let cfg = BotConfig::from_lookup(|name| match name {
            "BOT_TOKEN" => Some("t".into()),
            "LLM_PROVIDER" => Some("openai".into()),
            "OPENAI_API_KEY" => Some("k".into()),
            "LLM_STREAMING" => Some("false".into()),
            _ => None,
        })
        .unwrap();

        let llm = build_provider(&cfg.llm);
        assert_eq!(llm.provider(), "openai");
        assert_eq!(llm.model(), "gpt-4o-mini");
        assert!(!llm.supports_streaming());
    }

    #[test]
    fn test_providers_take_transport_settings() {
        let cfg = BotConfig::from_lookup(|name| match name {
            "BOT_TOKEN" => Some("t".into()),
            "MISTRAL_API_KEY" => Some("k".into()),
            "LLM_TRANSPORT_RETRIES" => Some("5".into()),
            "LLM_TIMEOUT_SECS" => Some("9".into()),
            "LLM_TOP_P" => Some("0.9".into()),
            _ => None,
        })
        .unwrap();

        let mistral = MistralCompletion::from_config(&cfg.llm);
        assert_eq!(mistral.max_retries, 5);
        assert_eq!(mistral.timeout, std::time::Duration::from_secs(9));
        assert_eq!(mistral.state.top_p, Some(0.9));
        assert!(mistral.stream);

        let openai = OpenAICompletion::from_config(&cfg.llm);
        assert_eq!(openai.max_retries, 5);
        assert_eq!(openai.state.max_tokens, Some(1500));
    }
}
