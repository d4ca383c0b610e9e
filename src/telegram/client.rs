//! HTTPS client for the Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::types::{Chat, File, InlineKeyboardMarkup, Message, OutgoingMessage, ParseMode, Update};
use super::TelegramApi;
use crate::error::TelegramError;

/// Extra time allowed on top of the long-poll timeout.
const POLL_GRACE: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, TelegramError> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| TelegramError::Decode("ok response without result".to_string()));
        }
        Err(TelegramError::Api {
            code: self.error_code.unwrap_or(0),
            description: self.description.unwrap_or_else(|| "unknown error".to_string()),
            retry_after: self.parameters.and_then(|p| p.retry_after),
        })
    }
}

/// Bot API client bound to one token.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl TelegramClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.base_url, self.token, file_path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TelegramError> {
        let status = response.status();
        let body = response.text().await?;
        let envelope: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
            TelegramError::Decode(format!("{} (status {}): {}", e, status.as_u16(), excerpt(&body)))
        })?;
        envelope.into_result()
    }

    /// POST a method with a JSON body.
    async fn call<T, B>(&self, method: &str, body: &B, timeout: Duration) -> Result<T, TelegramError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        tracing::trace!(method, "telegram call");
        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Methods that answer `true`.
    async fn call_unit<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<(), TelegramError> {
        self.call::<Value, _>(method, body, REQUEST_TIMEOUT).await.map(|_| ())
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}

#[async_trait]
impl TelegramApi for TelegramClient {
    async fn get_updates(&self, offset: i64, timeout_secs: u32) -> Result<Vec<Update>, TelegramError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let timeout = Duration::from_secs(u64::from(timeout_secs)) + POLL_GRACE;
        self.call("getUpdates", &body, timeout).await
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, TelegramError> {
        self.call("sendMessage", message, REQUEST_TIMEOUT).await
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = serde_json::to_value(mode).map_err(|e| TelegramError::Decode(e.to_string()))?;
        }
        if let Some(markup) = markup {
            body["reply_markup"] = serde_json::to_value(markup).map_err(|e| TelegramError::Decode(e.to_string()))?;
        }
        self.call_unit("editMessageText", &body).await
    }

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let markup = match markup {
            Some(m) => serde_json::to_value(m).map_err(|e| TelegramError::Decode(e.to_string()))?,
            None => json!({ "inline_keyboard": [] }),
        };
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": markup,
        });
        self.call_unit("editMessageReplyMarkup", &body).await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        self.call_unit("deleteMessage", &json!({ "chat_id": chat_id, "message_id": message_id }))
            .await
    }

    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), TelegramError> {
        self.call_unit("sendChatAction", &json!({ "chat_id": chat_id, "action": action }))
            .await
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TelegramError> {
        let mut body = json!({ "callback_query_id": callback_query_id, "show_alert": show_alert });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call_unit("answerCallbackQuery", &body).await
    }

    async fn get_file(&self, file_id: &str) -> Result<File, TelegramError> {
        self.call("getFile", &json!({ "file_id": file_id }), REQUEST_TIMEOUT).await
    }

    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, TelegramError> {
        let response = self
            .client
            .get(self.file_url(file_path))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TelegramError::Api {
                code: i64::from(status.as_u16()),
                description: format!("file download failed for {}", file_path),
                retry_after: None,
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn pin_chat_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        let body = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "disable_notification": true,
        });
        self.call_unit("pinChatMessage", &body).await
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        content: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<Message, TelegramError> {
        let part = reqwest::multipart::Part::bytes(content)
            .file_name(file_name.to_string())
            .mime_str("application/octet-stream")?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .timeout(REQUEST_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), TelegramError> {
        self.call_unit("deleteWebhook", &json!({ "drop_pending_updates": drop_pending_updates }))
            .await
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, TelegramError> {
        self.call("getChat", &json!({ "chat_id": chat_id }), REQUEST_TIMEOUT).await
    }
}
