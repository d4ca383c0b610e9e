//! User-facing message handlers: `/start`, `/clear`, questions and photos.

use std::sync::Arc;

use chrono::Utc;

use super::admin::{self, AdminAction};
use super::record_user;
use crate::bot::notifier::spawn_daily_pin;
use crate::bot::reply::{remove_previous_button, send_error_with_retry, send_long_text, stream_reply, Answer};
use crate::bot::texts;
use crate::bot::BotContext;
use crate::error::{BotError, BotResult, OcrError, TelegramError};
use crate::storage::activity;
use crate::telegram::keyboards::{admin_keyboard, expand_keyboard, resend_photo_keyboard};
use crate::telegram::{Message, OutgoingMessage, ParseMode};
use crate::utilities::prompts::{build_messages, concise_prompt, photo_prompt, static_answer};

/// OCR results shorter than this are treated as "no text".
const MIN_OCR_CHARS: usize = 3;

pub async fn handle_start(ctx: &Arc<BotContext>, message: &Message) -> BotResult<()> {
    let Some(user) = message.from.clone() else {
        return Ok(());
    };

    let bg = Arc::clone(ctx);
    let bg_user = user.clone();
    tokio::spawn(async move { record_user(&bg, &bg_user, activity::START).await });

    let reply = if ctx.is_privileged(user.id).await {
        OutgoingMessage::new(message.chat.id, texts::ADMIN_GREETING)
            .parse_mode(ParseMode::Html)
            .markup(admin_keyboard())
    } else {
        OutgoingMessage::new(message.chat.id, texts::START_GREETING).parse_mode(ParseMode::Html)
    };
    ctx.api.send_message(&reply).await?;
    Ok(())
}

pub async fn handle_clear(ctx: &Arc<BotContext>, message: &Message) -> BotResult<()> {
    ctx.history.clear(message.chat.id);
    ctx.api
        .send_message(&OutgoingMessage::new(message.chat.id, texts::HISTORY_CLEARED))
        .await?;
    Ok(())
}

pub async fn handle_text(ctx: &Arc<BotContext>, message: &Message) -> BotResult<()> {
    let (Some(text), Some(user)) = (message.text.as_deref(), message.from.as_ref()) else {
        return Ok(());
    };
    let chat_id = message.chat.id;

    if text.chars().count() > ctx.config.limits.max_text_len {
        ctx.api.send_message(&OutgoingMessage::new(chat_id, texts::TOO_LONG)).await?;
        return Ok(());
    }

    record_user(ctx, user, activity::MESSAGE).await;
    spawn_daily_pin(ctx, chat_id, user.id, message.message_id);

    if let Some(action) = AdminAction::from_button(text) {
        if ctx.is_privileged(user.id).await {
            ctx.dialogues.finish(chat_id, user.id);
            return admin::run_action(ctx, message, action, "").await;
        }
    }
    if let Some(dialogue) = ctx.dialogues.current(chat_id, user.id) {
        return admin::continue_dialogue(ctx, message, dialogue, text).await;
    }

    remove_previous_button(ctx, chat_id).await;
    let loading = ctx.api.send_message(&OutgoingMessage::new(chat_id, texts::LOADING_TEXT)).await?;
    let _ = ctx.api.send_chat_action(chat_id, "typing").await;

    answer(ctx, chat_id, user.id, text, &concise_prompt(text), loading.message_id).await
}

pub async fn handle_photo(ctx: &Arc<BotContext>, message: &Message) -> BotResult<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat.id;

    record_user(ctx, user, activity::PHOTO).await;
    spawn_daily_pin(ctx, chat_id, user.id, message.message_id);

    if ctx.dialogues.current(chat_id, user.id).is_some() {
        return Ok(());
    }

    remove_previous_button(ctx, chat_id).await;
    let loading = ctx.api.send_message(&OutgoingMessage::new(chat_id, texts::LOADING_PHOTO)).await?;
    let _ = ctx.api.send_chat_action(chat_id, "typing").await;

    let notice = match read_photo(ctx, message).await {
        Ok(text) if text.trim().chars().count() >= MIN_OCR_CHARS => {
            let prompt = photo_prompt(&text, message.caption.as_deref());
            return answer(ctx, chat_id, user.id, &text, &prompt, loading.message_id).await;
        }
        Ok(_) | Err(BotError::Ocr(_)) => texts::NO_TEXT_IN_PHOTO.to_string(),
        Err(e) => {
            tracing::warn!(chat_id, error = %e, "photo download failed");
            format!("{}\n\n{}", texts::PHOTO_FAILED, texts::random_error_message())
        }
    };

    let _ = ctx.api.delete_message(chat_id, loading.message_id).await;
    ctx.api
        .send_message(&OutgoingMessage::new(chat_id, notice).markup(resend_photo_keyboard(chat_id)))
        .await?;
    Ok(())
}

/// Download the largest size of a photo and run OCR on it.
async fn read_photo(ctx: &BotContext, message: &Message) -> BotResult<String> {
    let photo = message.largest_photo().ok_or(OcrError::NoText)?;
    let file = ctx.api.get_file(&photo.file_id).await?;
    let path = file
        .file_path
        .ok_or_else(|| TelegramError::Decode("getFile returned no file_path".to_string()))?;
    let image = ctx.api.download_file(&path).await?;
    Ok(ctx.ocr.extract_text(&image).await?)
}

/// Answer `question`, replacing the loading message with the reply.
///
/// On failure the loading message is removed and an error notice with the
/// retry keyboard is posted; the request is kept for the retry button.
pub(crate) async fn answer(
    ctx: &BotContext,
    chat_id: i64,
    user_id: i64,
    question: &str,
    prompt: &str,
    loading_id: i64,
) -> BotResult<()> {
    ctx.sessions.set_expansion(chat_id, question);

    let raw = match static_answer(question) {
        Some(canned) => Ok(canned.to_string()),
        None => {
            let history = ctx.history.recent(chat_id, ctx.config.llm.context_window);
            let messages = build_messages(&ctx.config.llm.system_prompt, &history, question, prompt, Utc::now());
            stream_reply(ctx, chat_id, loading_id, &messages).await
        }
    };

    let _ = ctx.api.delete_message(chat_id, loading_id).await;

    let outcome = match raw {
        Ok(raw) => deliver(ctx, chat_id, question, &raw).await,
        Err(e) => Err(BotError::from(e)),
    };
    let Err(e) = outcome else {
        return Ok(());
    };

    tracing::warn!(chat_id, error = %e, "reply failed");
    if e.is_rate_limited() {
        let _ = ctx.api.send_message(&OutgoingMessage::new(chat_id, texts::SERVICE_BUSY)).await;
    }
    send_error_with_retry(ctx, chat_id, user_id, prompt, question, None).await?;
    Ok(())
}

async fn deliver(ctx: &BotContext, chat_id: i64, question: &str, raw: &str) -> BotResult<()> {
    let answer = Answer::from_raw(raw);
    let markup = answer.show_button.then(|| expand_keyboard(chat_id));

    let sent = send_long_text(ctx, chat_id, &answer.text, markup.as_ref()).await?;
    if let (Some(sent), true) = (sent, answer.show_button) {
        ctx.sessions.set_button_message(chat_id, sent.message_id);
    }

    ctx.history.push_exchange(chat_id, question, &answer.text);
    ctx.sessions.clear_failed(chat_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{photo_message, text_message, Call, TestBot, ADMIN_ID};
    use crate::error::LlmError;
    use crate::llms::Role;
    use crate::storage::UserStore;
    use crate::telegram::ReplyMarkup;

    #[tokio::test]
    async fn test_start_greets_user_and_admin() {
        let bot = TestBot::builder().build();
        handle_start(&bot.ctx, &text_message(5, 5, "/start")).await.unwrap();
        handle_start(&bot.ctx, &text_message(ADMIN_ID, ADMIN_ID, "/start")).await.unwrap();

        let sent = bot.api.sent_messages();
        assert_eq!(sent[0].text, texts::START_GREETING);
        assert!(sent[0].reply_markup.is_none());
        assert_eq!(sent[1].text, texts::ADMIN_GREETING);
        assert!(matches!(sent[1].reply_markup, Some(ReplyMarkup::Reply(_))));
    }

    #[tokio::test]
    async fn test_text_answer_flow() {
        let bot = TestBot::builder().reply(Ok("### Javob\nIkki plus ikki **to'rt**.".into())).build();
        handle_text(&bot.ctx, &text_message(5, 5, "2+2 nechchi?")).await.unwrap();

        let sent = bot.api.sent_messages();
        assert_eq!(sent[0].text, texts::LOADING_TEXT);
        let reply = sent.last().unwrap();
        assert_eq!(reply.text, "Javob\nIkki plus ikki **to'rt**.");
        assert_eq!(reply.parse_mode, Some(ParseMode::Markdown));
        assert!(reply.reply_markup.is_some());

        let loading_id = 500;
        assert!(bot
            .api
            .calls()
            .contains(&Call::Delete { chat_id: 5, message_id: loading_id }));

        let history = bot.ctx.history.recent(5, 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "2+2 nechchi?");
        assert_eq!(history[1].role, Role::Assistant);

        assert_eq!(bot.ctx.sessions.expansion(5).as_deref(), Some("2+2 nechchi?"));
        assert!(bot.ctx.sessions.take_button_message(5).is_some());
        assert_eq!(bot.store.active_user_ids().await.unwrap(), vec![5]);

        let request = &bot.llm.requests()[0];
        assert!(request.last().unwrap().content.ends_with("2+2 nechchi?"));
    }

    #[tokio::test]
    async fn test_static_answer_skips_llm_and_button() {
        let bot = TestBot::builder().build();
        handle_text(&bot.ctx, &text_message(5, 5, "Rahmat senga")).await.unwrap();

        assert!(bot.llm.requests().is_empty());
        let reply = bot.api.sent_messages().pop().unwrap();
        assert!(!reply.text.contains("[NO_BUTTON]"));
        assert!(reply.reply_markup.is_none());
    }

    #[tokio::test]
    async fn test_too_long_text_is_refused() {
        let bot = TestBot::builder().build();
        let long = "a".repeat(5001);
        handle_text(&bot.ctx, &text_message(5, 5, &long)).await.unwrap();
        assert_eq!(bot.api.texts_to(5), vec![texts::TOO_LONG.to_string()]);
        assert!(bot.llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failure_stores_request_and_offers_retry() {
        let bot = TestBot::builder()
            .reply(Err(LlmError::RateLimited { provider: "fake".into() }))
            .build();
        handle_text(&bot.ctx, &text_message(5, 7, "savol")).await.unwrap();

        let texts_sent = bot.api.texts_to(5);
        assert!(texts_sent.contains(&texts::SERVICE_BUSY.to_string()));

        let error = bot.api.sent_messages().pop().unwrap();
        assert!(texts::ERROR_MESSAGES.contains(&error.text.as_str()));
        assert!(matches!(error.reply_markup, Some(ReplyMarkup::Inline(_))));

        let failed = bot.ctx.sessions.failed(5).unwrap();
        assert_eq!(failed.user_id, 7);
        assert_eq!(failed.original_text, "savol");
        assert_eq!(failed.prompt, concise_prompt("savol"));
        assert_eq!(bot.ctx.history.len(5), 0);
    }

    #[tokio::test]
    async fn test_new_question_removes_previous_button() {
        let bot = TestBot::builder().reply(Ok("birinchi".into())).reply(Ok("ikkinchi".into())).build();
        handle_text(&bot.ctx, &text_message(5, 5, "bir")).await.unwrap();
        let first_reply = bot.api.calls().len();
        handle_text(&bot.ctx, &text_message(5, 5, "ikki")).await.unwrap();

        let later = &bot.api.calls()[first_reply..];
        assert!(later
            .iter()
            .any(|c| matches!(c, Call::EditMarkup { chat_id: 5, markup: None, .. })));
    }

    #[tokio::test]
    async fn test_photo_answer_uses_ocr_text_and_caption() {
        let bot = TestBot::builder()
            .ocr(Ok("x^2 = 4".into()))
            .reply(Ok("x = 2 yoki x = -2".into()))
            .build();
        handle_photo(&bot.ctx, &photo_message(5, 5, Some("tez"))).await.unwrap();

        let requests = bot.llm.requests();
        let prompt = &requests[0].last().unwrap().content;
        assert!(prompt.contains("x^2 = 4"));
        assert!(prompt.contains("tez"));
        assert_eq!(bot.api.sent_messages().pop().unwrap().text, "x = 2 yoki x = -2");
        assert_eq!(bot.ctx.sessions.expansion(5).as_deref(), Some("x^2 = 4"));
    }

    #[tokio::test]
    async fn test_photo_without_text_offers_resend() {
        let bot = TestBot::builder().ocr(Ok("ab".into())).build();
        handle_photo(&bot.ctx, &photo_message(5, 5, None)).await.unwrap();

        let notice = bot.api.sent_messages().pop().unwrap();
        assert_eq!(notice.text, texts::NO_TEXT_IN_PHOTO);
        match notice.reply_markup {
            Some(ReplyMarkup::Inline(kb)) => assert_eq!(kb.inline_keyboard[0][0].callback_data, "resend_photo:5"),
            other => panic!("unexpected markup {:?}", other),
        }
        assert!(bot.llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_clear_drops_history() {
        let bot = TestBot::builder().build();
        bot.ctx.history.push_exchange(5, "a", "b");
        handle_clear(&bot.ctx, &text_message(5, 5, "/clear")).await.unwrap();
        assert_eq!(bot.ctx.history.len(5), 0);
        assert_eq!(bot.api.texts_to(5), vec![texts::HISTORY_CLEARED.to_string()]);
    }
}
