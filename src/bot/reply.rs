//! Producing and delivering assistant replies.

use std::time::{Duration, Instant};

use super::texts;
use super::BotContext;
use crate::error::{LlmError, TelegramError};
use crate::llms::{ChatMessage, StreamAccumulator, StreamChunk};
use crate::memory::FailedRequest;
use crate::telegram::keyboards::retry_keyboard;
use crate::telegram::{InlineKeyboardMarkup, Message, OutgoingMessage, ParseMode};
use crate::utilities::chunking::split_message;
use crate::utilities::cleaning::{strip_headings, strip_markdown, strip_no_button_marker};

/// A reply ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    /// Whether the "full answer" button goes under it.
    pub show_button: bool,
}

impl Answer {
    /// Strip the no-button marker and heading marks from raw model output.
    pub fn from_raw(raw: &str) -> Self {
        let (text, no_button) = strip_no_button_marker(raw);
        Self {
            text: strip_headings(&text),
            show_button: !no_button,
        }
    }
}

/// Decides when the loading message is edited during a stream.
#[derive(Debug, Clone)]
pub struct EditThrottle {
    min_interval: Duration,
    min_chars: usize,
    last_edit: Option<Instant>,
    chars_at_last_edit: usize,
}

impl EditThrottle {
    pub fn new(min_interval: Duration, min_chars: usize) -> Self {
        Self {
            min_interval,
            min_chars,
            last_edit: None,
            chars_at_last_edit: 0,
        }
    }

    /// Edit when enough time has passed or enough new text arrived.
    pub fn should_edit(&self, now: Instant, total_chars: usize) -> bool {
        if total_chars <= self.chars_at_last_edit {
            return false;
        }
        let interval_ok = self
            .last_edit
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_interval);
        interval_ok || total_chars - self.chars_at_last_edit >= self.min_chars
    }

    pub fn mark(&mut self, now: Instant, total_chars: usize) {
        self.last_edit = Some(now);
        self.chars_at_last_edit = total_chars;
    }
}

/// Partial text with the cursor, cut to fit one message.
fn preview(text: &str, cursor: &str, max_len: usize) -> String {
    let budget = max_len.saturating_sub(cursor.chars().count() + 1);
    let len = text.chars().count();
    if len <= budget {
        return format!("{}{}", text, cursor);
    }
    let tail: String = text.chars().skip(len - budget).collect();
    format!("…{}{}", tail, cursor)
}

/// Stream a reply, editing the loading message as text arrives.
///
/// Edit failures are ignored. Returns the full raw reply text.
pub async fn stream_reply(
    ctx: &BotContext,
    chat_id: i64,
    loading_id: i64,
    messages: &[ChatMessage],
) -> Result<String, LlmError> {
    let stream_cfg = &ctx.config.stream;
    let mut receiver = ctx.gate.stream(messages).await?;
    let mut acc = StreamAccumulator::new();
    let mut throttle = EditThrottle::new(stream_cfg.edit_min_interval, stream_cfg.edit_min_chars);

    while let Some(chunk) = receiver.next().await {
        let done = acc.push(&chunk);
        if done {
            break;
        }
        if !matches!(chunk, StreamChunk::TextDelta { .. }) {
            continue;
        }

        let total = acc.text().chars().count();
        let now = Instant::now();
        if throttle.should_edit(now, total) {
            let _ = ctx.api.send_chat_action(chat_id, "typing").await;
            let text = preview(acc.text(), &stream_cfg.cursor, ctx.config.limits.message_max_len);
            match ctx.api.edit_message_text(chat_id, loading_id, &text, None, None).await {
                Ok(()) => throttle.mark(now, total),
                Err(e) => tracing::debug!(chat_id, error = %e, "live edit skipped"),
            }
        }
    }

    let provider = ctx.gate.llm().provider().to_string();
    if let Some(message) = acc.error() {
        return Err(LlmError::Stream {
            provider,
            message: message.to_string(),
        });
    }
    let text = acc.into_text();
    if text.trim().is_empty() {
        return Err(LlmError::EmptyReply { provider });
    }
    Ok(text)
}

/// Send one message as Markdown, resending as plain text when Telegram
/// rejects the entities.
pub async fn send_markdown(
    ctx: &BotContext,
    chat_id: i64,
    text: &str,
    markup: Option<&InlineKeyboardMarkup>,
) -> Result<Message, TelegramError> {
    let mut message = OutgoingMessage::new(chat_id, text).parse_mode(ParseMode::Markdown);
    if let Some(markup) = markup {
        message = message.markup(markup.clone());
    }
    match ctx.api.send_message(&message).await {
        Err(e) if e.is_entity_parse_error() => {
            tracing::debug!(chat_id, "markdown rejected, sending plain text");
            message.text = strip_markdown(text);
            message.parse_mode = None;
            ctx.api.send_message(&message).await
        }
        other => other,
    }
}

/// Send a reply of any length; the markup goes under the last part.
pub async fn send_long_text(
    ctx: &BotContext,
    chat_id: i64,
    text: &str,
    markup: Option<&InlineKeyboardMarkup>,
) -> Result<Option<Message>, TelegramError> {
    let parts = split_message(text, ctx.config.limits.message_max_len);
    let last = parts.len().saturating_sub(1);
    let mut sent = None;
    for (i, part) in parts.iter().enumerate() {
        if part.trim().is_empty() {
            continue;
        }
        let markup = if i == last { markup } else { None };
        sent = Some(send_markdown(ctx, chat_id, part, markup).await?);
    }
    Ok(sent)
}

/// Post an error notice with the retry keyboard and remember the request.
pub async fn send_error_with_retry(
    ctx: &BotContext,
    chat_id: i64,
    user_id: i64,
    prompt: &str,
    original_text: &str,
    reason: Option<&str>,
) -> Result<(), TelegramError> {
    let mut text = reason.map(|r| format!("{}\n\n", r)).unwrap_or_default();
    text.push_str(texts::random_error_message());

    let message = OutgoingMessage::new(chat_id, text).markup(retry_keyboard(chat_id, 0));
    let sent = ctx.api.send_message(&message).await?;
    ctx.sessions.store_failed(
        chat_id,
        FailedRequest::new(user_id, prompt, original_text, sent.message_id),
    );
    Ok(())
}

/// Strip the inline keyboard from the last message that offered "full answer".
pub async fn remove_previous_button(ctx: &BotContext, chat_id: i64) {
    if let Some(message_id) = ctx.sessions.take_button_message(chat_id) {
        if let Err(e) = ctx.api.edit_message_reply_markup(chat_id, message_id, None).await {
            tracing::debug!(chat_id, message_id, error = %e, "could not remove old button");
        }
    }
}
