//! Text extraction from images via OCR.space.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OcrConfig;
use crate::error::OcrError;

/// Something that reads text out of an image.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Recognised text, trimmed. Errors once all attempts are used.
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    parsed_results: Vec<ParsedResult>,
    #[serde(default)]
    is_errored_on_processing: bool,
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: String,
}

impl OcrResponse {
    fn error_text(&self) -> String {
        match &self.error_message {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            Some(other) => other.to_string(),
            None => "unknown error".to_string(),
        }
    }
}

/// OCR.space HTTP client.
#[derive(Debug, Clone)]
pub struct OcrClient {
    config: OcrConfig,
    client: reqwest::Client,
}

impl OcrClient {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config.backoff_base * 2u32.saturating_pow(attempt)
    }

    async fn attempt(&self, image: &[u8]) -> Result<String, OcrError> {
        let part = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("language", self.config.language.clone())
            .text("isOverlayRequired", "false");

        let mut request = self
            .client
            .post(&self.config.api_url)
            .timeout(self.config.timeout)
            .multipart(form);
        if let Some(ref key) = self.config.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OcrError::Status(status.as_u16()));
        }

        let body: OcrResponse = response.json().await?;
        if body.is_errored_on_processing {
            return Err(OcrError::Processing(body.error_text()));
        }

        let text = body
            .parsed_results
            .first()
            .map(|r| r.parsed_text.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(OcrError::NoText);
        }
        Ok(text)
    }
}

#[async_trait]
impl TextExtractor for OcrClient {
    async fn extract_text(&self, image: &[u8]) -> Result<String, OcrError> {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = OcrError::NoText;

        for attempt in 0..attempts {
            match self.attempt(image).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "OCR attempt failed");
                    last_error = e;
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }
        Err(last_error)
    }
}
