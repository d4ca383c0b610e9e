//! Error types for the bot.
//!
//! One enum per concern, plus [`BotError`] which the handlers propagate.

use thiserror::Error;

/// Errors raised while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing or empty.
    #[error("required environment variable {name} is not set")]
    Missing { name: &'static str },

    /// A variable is present but cannot be parsed.
    #[error("invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Errors from chat-completion providers.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key configured for the provider.
    #[error("{provider} API key not set")]
    MissingApiKey { provider: String },

    /// HTTP 429 from the provider.
    #[error("rate limited by {provider} API (429)")]
    RateLimited { provider: String },

    /// HTTP 5xx from the provider.
    #[error("{provider} API server error: {status}")]
    Server { provider: String, status: u16 },

    /// Any other non-success status.
    #[error("{provider} API error ({status}): {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    /// The call did not finish within the configured timeout.
    #[error("{provider} request timed out")]
    Timeout { provider: String },

    /// Transport-level failure.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body could not be interpreted.
    #[error("failed to parse {provider} response: {message}")]
    Parse { provider: String, message: String },

    /// A stream broke off after it was opened.
    #[error("{provider} stream failed: {message}")]
    Stream { provider: String, message: String },

    /// The provider answered with no text at all.
    #[error("{provider} returned an empty reply")]
    EmptyReply { provider: String },
}

impl LlmError {
    /// Whether this error means the upstream is throttling us.
    ///
    /// Some gateways report throttling as a 4xx/5xx with a textual body, so
    /// the message is inspected as well.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, body, .. } => {
                *status == 429 || crate::llms::providers::utils::is_rate_limit_message(body)
            }
            other => crate::llms::providers::utils::is_rate_limit_message(&other.to_string()),
        }
    }

    /// Whether this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Errors from the Telegram Bot API client.
#[derive(Debug, Error)]
pub enum TelegramError {
    /// Transport-level failure, with the request URL stripped.
    #[error("telegram transport error: {0}")]
    Http(reqwest::Error),

    /// The Bot API answered `ok: false`.
    #[error("telegram API error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    /// The Bot API answered with something we could not decode.
    #[error("failed to decode telegram response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TelegramError {
    /// Bot API URLs embed the token, so it is dropped before the error is kept.
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

impl TelegramError {
    /// The user blocked the bot or the chat no longer exists.
    pub fn is_unreachable_chat(&self) -> bool {
        match self {
            Self::Api { code, description, .. } => {
                *code == 403 || description.contains("chat not found")
            }
            _ => false,
        }
    }

    /// `editMessageText` with identical content.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Api { description, .. } if description.contains("message is not modified"))
    }

    /// Telegram rejected the Markdown/HTML entities of a message.
    pub fn is_entity_parse_error(&self) -> bool {
        matches!(self, Self::Api { code: 400, description, .. } if description.contains("can't parse entities"))
    }
}

/// Errors from the user store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// The store was used before it was connected or after it was closed.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the OCR client.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Transport-level failure.
    #[error("OCR transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("OCR service returned status {0}")]
    Status(u16),

    /// OCR.space reported a processing error.
    #[error("OCR processing failed: {0}")]
    Processing(String),

    /// All attempts finished without any recognised text.
    #[error("no text recognised in image")]
    NoText,
}

/// Top-level error for bot handlers.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BotError {
    /// Whether the root cause is upstream throttling.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_rate_limited(),
            Self::Telegram(TelegramError::Api { code: 429, .. }) => true,
            _ => false,
        }
    }
}

pub type BotResult<T> = Result<T, BotError>;
