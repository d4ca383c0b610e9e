//! Telegram Bot API access.
//!
//! Handlers talk to Telegram only through [`TelegramApi`], so tests can swap
//! in a recording fake. [`TelegramClient`] is the HTTPS implementation.

pub mod client;
pub mod keyboards;
pub mod types;

use async_trait::async_trait;

use crate::error::TelegramError;

pub use client::TelegramClient;
pub use keyboards::CallbackAction;
pub use types::{
    CallbackQuery, Chat, File, InlineKeyboardMarkup, Message, OutgoingMessage, ParseMode,
    ReplyMarkup, Update, User,
};

/// The subset of the Bot API the bot uses.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    /// Long-poll for updates with `update_id >= offset`.
    async fn get_updates(&self, offset: i64, timeout_secs: u32) -> Result<Vec<Update>, TelegramError>;

    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, TelegramError>;

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError>;

    /// Replace (or with `None`, remove) the inline keyboard of a message.
    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError>;

    /// `typing`, `upload_document`, ...
    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), TelegramError>;

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TelegramError>;

    async fn get_file(&self, file_id: &str) -> Result<File, TelegramError>;

    /// Fetch the bytes of a file returned by [`TelegramApi::get_file`].
    async fn download_file(&self, file_path: &str) -> Result<Vec<u8>, TelegramError>;

    async fn pin_chat_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError>;

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        content: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<Message, TelegramError>;

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<(), TelegramError>;

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, TelegramError>;
}
