//! Runtime configuration.
//!
//! Everything is read from environment variables by [`BotConfig::from_env`].
//! [`BotConfig::from_lookup`] takes an arbitrary lookup function so tests can
//! build a configuration without mutating the process environment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::utilities::prompts::DEFAULT_SYSTEM_PROMPT;

/// Default Telegram Bot API base URL.
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Default OCR.space endpoint.
pub const DEFAULT_OCR_API_URL: &str = "https://api.ocr.space/parse/image";

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Which hosted chat-completion API answers user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Mistral,
    OpenAI,
}

impl LlmProvider {
    /// Environment variable holding the API key for this provider.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Self::Mistral => "MISTRAL_API_KEY",
            Self::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Model used when `LLM_MODEL` is not set.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Mistral => "mistral-large-latest",
            Self::OpenAI => "gpt-4o-mini",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mistral" => Ok(Self::Mistral),
            "openai" => Ok(Self::OpenAI),
            other => Err(format!("unknown provider '{}', expected mistral or openai", other)),
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mistral => write!(f, "mistral"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Chat-completion settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f64>,
    /// Ask the provider for SSE streaming.
    pub streaming: bool,
    /// Upper bound on concurrent upstream calls.
    pub max_concurrent: usize,
    /// Attempts made by the request gate on throttling/timeouts.
    pub max_retries: u32,
    /// Extra attempts a provider makes itself on transport errors, 429 and 5xx.
    pub transport_retries: u32,
    /// Base of the exponential backoff used by the request gate.
    pub backoff_base: Duration,
    /// Timeout for a single upstream call.
    pub timeout: Duration,
    pub system_prompt: String,
    /// Number of history messages sent with each request.
    pub context_window: usize,
}

/// OCR.space settings.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub language: String,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_OCR_API_URL.to_string(),
            language: "eng".to_string(),
            max_retries: 3,
            backoff_base: Duration::from_millis(800),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Live-edit behaviour while a reply is being generated.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Minimum time between two edits of the loading message.
    pub edit_min_interval: Duration,
    /// Accumulated length that forces an edit regardless of the interval.
    pub edit_min_chars: usize,
    /// Chunk size used when a full reply is replayed as a stream.
    pub chunk_size: usize,
    /// Appended to partial text while generation is running.
    pub cursor: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            edit_min_interval: Duration::from_millis(800),
            edit_min_chars: 120,
            chunk_size: 200,
            cursor: " ▮".to_string(),
        }
    }
}

/// Limits and retry policy for user-facing flows.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Longest accepted user message.
    pub max_text_len: usize,
    /// Telegram's per-message limit.
    pub message_max_len: usize,
    /// Messages kept per chat.
    pub history_max: usize,
    /// Manual "retry" presses allowed per failed request.
    pub max_manual_retries: u32,
    /// Automatic attempts made for each manual retry.
    pub max_auto_retries: u32,
    pub auto_backoffs: Vec<Duration>,
    /// Minimum time between two retry presses by the same user.
    pub user_cooldown: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_len: 5000,
            message_max_len: 4096,
            history_max: 100,
            max_manual_retries: 3,
            max_auto_retries: 2,
            auto_backoffs: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            user_cooldown: Duration::from_secs(5),
        }
    }
}

/// Background jobs and pacing.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Period of the inactive-user notifier.
    pub notify_interval: Duration,
    /// Days without activity after which a user is greeted again.
    pub inactive_after_days: i64,
    /// Pause between two notifier messages.
    pub notify_delay: Duration,
    /// Pause between two broadcast messages.
    pub broadcast_delay: Duration,
    /// Long-poll timeout passed to `getUpdates`.
    pub poll_timeout_secs: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            notify_interval: Duration::from_secs(3600 * 24 * 7),
            inactive_after_days: 7,
            notify_delay: Duration::from_millis(80),
            broadcast_delay: Duration::from_millis(50),
            poll_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// BotConfig
// ---------------------------------------------------------------------------

/// Complete bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub telegram_api_url: String,
    /// Admin seeded into the `admins` table.
    pub admin_id: Option<i64>,
    /// Super-admin seeded into the `super_admins` table.
    pub superadmin_id: Option<i64>,
    /// Postgres URL; the in-memory store is used when absent.
    pub database_url: Option<String>,
    /// Port of the health probe; disabled when absent.
    pub health_port: Option<u16>,
    pub llm: LlmConfig,
    pub ocr: OcrConfig,
    pub stream: StreamConfig,
    pub limits: LimitsConfig,
    pub schedule: ScheduleConfig,
}

impl BotConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bot_token = get("BOT_TOKEN").ok_or(ConfigError::Missing { name: "BOT_TOKEN" })?;

        let provider = match get("LLM_PROVIDER") {
            Some(raw) => raw.parse::<LlmProvider>().map_err(|reason| ConfigError::Invalid {
                name: "LLM_PROVIDER",
                value: raw.clone(),
                reason,
            })?,
            None => LlmProvider::Mistral,
        };

        let key_var = provider.api_key_var();
        let api_key = get(key_var).ok_or(ConfigError::Missing { name: key_var })?;

        let llm = LlmConfig {
            provider,
            api_key,
            model: get("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            base_url: get("LLM_BASE_URL"),
            temperature: parse_or(&get, "LLM_TEMPERATURE", 0.7)?,
            max_tokens: Some(parse_or(&get, "LLM_MAX_TOKENS", 1500u32)?),
            top_p: parse_opt(&get, "LLM_TOP_P")?,
            streaming: parse_bool_or(&get, "LLM_STREAMING", true)?,
            max_concurrent: parse_or(&get, "LLM_MAX_CONCURRENT", 4usize)?.max(1),
            max_retries: parse_or(&get, "LLM_MAX_RETRIES", 3u32)?.max(1),
            transport_retries: parse_or(&get, "LLM_TRANSPORT_RETRIES", 2u32)?,
            backoff_base: Duration::from_secs(1),
            timeout: Duration::from_secs(parse_or(&get, "LLM_TIMEOUT_SECS", 60u64)?),
            system_prompt: get("SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            context_window: parse_or(&get, "CONTEXT_WINDOW", 12usize)?,
        };

        let ocr = OcrConfig {
            api_key: get("OCR_API_KEY"),
            api_url: get("OCR_API_URL").unwrap_or_else(|| DEFAULT_OCR_API_URL.to_string()),
            ..OcrConfig::default()
        };

        Ok(Self {
            bot_token,
            telegram_api_url: get("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            admin_id: parse_opt(&get, "ADMIN_ID")?,
            superadmin_id: parse_opt(&get, "SUPERADMIN_ID")?,
            database_url: get("DATABASE_URL"),
            health_port: parse_opt(&get, "PORT")?,
            llm,
            ocr,
            stream: StreamConfig::default(),
            limits: LimitsConfig::default(),
            schedule: ScheduleConfig::default(),
        })
    }
}

fn parse_opt<T, G>(get: &G, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => Ok(None),
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(get, name)?.unwrap_or(default))
}

fn parse_bool_or<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = BotConfig::from_lookup(lookup(&[
            ("BOT_TOKEN", "123:abc"),
            ("MISTRAL_API_KEY", "mk"),
        ]))
        .unwrap();

        assert_eq!(cfg.llm.provider, LlmProvider::Mistral);
        assert_eq!(cfg.llm.model, "mistral-large-latest");
        assert_eq!(cfg.llm.context_window, 12);
        assert!(cfg.llm.streaming);
        assert_eq!(cfg.telegram_api_url, DEFAULT_TELEGRAM_API_URL);
        assert_eq!(cfg.limits.max_text_len, 5000);
        assert_eq!(cfg.stream.chunk_size, 200);
        assert!(cfg.database_url.is_none());
        assert!(cfg.health_port.is_none());
    }

    #[test]
    fn test_openai_requires_its_own_key() {
        let err = BotConfig::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("LLM_PROVIDER", "openai"),
            ("MISTRAL_API_KEY", "mk"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "OPENAI_API_KEY" }));
    }

    #[test]
    fn test_missing_token() {
        let err = BotConfig::from_lookup(lookup(&[("MISTRAL_API_KEY", "mk")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { name: "BOT_TOKEN" }));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = BotConfig::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("MISTRAL_API_KEY", "mk"),
            ("ADMIN_ID", "not-a-number"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ADMIN_ID", .. }));

        let err = BotConfig::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("MISTRAL_API_KEY", "mk"),
            ("LLM_STREAMING", "maybe"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LLM_STREAMING", .. }));
    }

    #[test]
    fn test_overrides() {
        let cfg = BotConfig::from_lookup(lookup(&[
            ("BOT_TOKEN", "t"),
            ("LLM_PROVIDER", "OpenAI"),
            ("OPENAI_API_KEY", "ok"),
            ("LLM_MODEL", "gpt-4o"),
            ("LLM_STREAMING", "false"),
            ("ADMIN_ID", "42"),
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/bot"),
        ]))
        .unwrap();

        assert_eq!(cfg.llm.provider, LlmProvider::OpenAI);
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert!(!cfg.llm.streaming);
        assert_eq!(cfg.admin_id, Some(42));
        assert_eq!(cfg.health_port, Some(8080));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/bot"));
    }
}
