//! Inline button presses.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;

use crate::bot::reply::{send_long_text, Answer};
use crate::bot::texts;
use crate::bot::BotContext;
use crate::error::{BotResult, LlmError};
use crate::llms::Role;
use crate::memory::{FailedRequest, RetryDecision};
use crate::telegram::keyboards::{retry_keyboard, CallbackAction};
use crate::telegram::{CallbackQuery, OutgoingMessage, ParseMode};
use crate::utilities::prompts::{build_messages, expand_prompt};

pub async fn handle_callback(ctx: &Arc<BotContext>, query: &CallbackQuery) -> BotResult<()> {
    let parsed = query.data.as_deref().unwrap_or_default().parse::<CallbackAction>();
    let action = match parsed {
        Ok(action) if query_chat(query).map_or(true, |chat| chat == action.chat_id()) => action,
        Ok(action) => {
            tracing::warn!(user_id = query.from.id, data = %action, "callback for another chat");
            return alert(ctx, query, texts::BAD_CALLBACK).await;
        }
        Err(e) => {
            tracing::debug!(user_id = query.from.id, error = %e, "bad callback data");
            return alert(ctx, query, texts::BAD_CALLBACK).await;
        }
    };

    match action {
        CallbackAction::Retry(chat_id) => handle_retry(ctx, query, chat_id).await,
        CallbackAction::Expand(chat_id) => handle_expand(ctx, query, chat_id).await,
        CallbackAction::ResendPhoto(chat_id) => {
            ctx.api.answer_callback_query(&query.id, None, false).await?;
            ctx.api.send_message(&OutgoingMessage::new(chat_id, texts::RESEND_PHOTO)).await?;
            Ok(())
        }
        CallbackAction::Report(chat_id) => handle_report(ctx, query, chat_id).await,
    }
}

fn query_chat(query: &CallbackQuery) -> Option<i64> {
    query.message.as_ref().map(|m| m.chat.id)
}

async fn alert(ctx: &BotContext, query: &CallbackQuery, text: &str) -> BotResult<()> {
    ctx.api.answer_callback_query(&query.id, Some(text), true).await?;
    Ok(())
}

async fn handle_retry(ctx: &BotContext, query: &CallbackQuery, chat_id: i64) -> BotResult<()> {
    let limits = &ctx.config.limits;
    let decision = ctx.sessions.begin_retry(
        chat_id,
        query.from.id,
        Instant::now(),
        limits.user_cooldown,
        limits.max_manual_retries,
    );
    let request = match decision {
        RetryDecision::Proceed(request) => request,
        RetryDecision::NotFound => {
            ctx.api.answer_callback_query(&query.id, None, false).await?;
            if let Some(message) = &query.message {
                let _ = ctx
                    .api
                    .edit_message_text(chat_id, message.message_id, texts::RETRY_NOT_FOUND, None, None)
                    .await;
            }
            return Ok(());
        }
        RetryDecision::NotOwner => return alert(ctx, query, texts::RETRY_NOT_OWNER).await,
        RetryDecision::Cooldown => {
            return alert(ctx, query, &texts::cooldown_notice(limits.user_cooldown.as_secs())).await
        }
        RetryDecision::Exhausted => return alert(ctx, query, texts::RETRY_EXHAUSTED).await,
        RetryDecision::InFlight => {
            ctx.api
                .answer_callback_query(&query.id, Some(texts::RETRY_IN_FLIGHT), false)
                .await?;
            return Ok(());
        }
    };

    if let Err(e) = ctx.api.answer_callback_query(&query.id, None, false).await {
        tracing::debug!(chat_id, error = %e, "retry callback answer failed");
    }
    let notice_id = query
        .message
        .as_ref()
        .map_or(request.error_message_id, |m| m.message_id);
    let _ = ctx
        .api
        .edit_message_text(chat_id, notice_id, texts::RETRY_PROGRESS, None, None)
        .await;

    tracing::info!(chat_id, attempt = request.attempts_manual, "manual retry");
    if retry_with_backoff(ctx, chat_id, &request).await {
        ctx.sessions.clear_failed(chat_id);
        return Ok(());
    }

    let attempts = ctx
        .sessions
        .finish_failed_retry(chat_id, Instant::now())
        .map_or(request.attempts_manual, |r| r.attempts_manual);
    let keyboard = retry_keyboard(chat_id, attempts);
    let _ = ctx
        .api
        .edit_message_text(chat_id, notice_id, texts::RETRY_FAILED, None, Some(&keyboard))
        .await;
    Ok(())
}

/// Run the automatic attempts of one manual retry; true once a reply went out.
async fn retry_with_backoff(ctx: &BotContext, chat_id: i64, request: &FailedRequest) -> bool {
    let backoffs = &ctx.config.limits.auto_backoffs;
    let attempts = ctx.config.limits.max_auto_retries.max(1);

    for attempt in 0..attempts {
        ctx.sessions.record_auto_attempt(chat_id);
        match retry_once(ctx, chat_id, request).await {
            Ok(()) => return true,
            Err(e) => tracing::warn!(chat_id, attempt, error = %e, "retry attempt failed"),
        }
        if attempt + 1 < attempts {
            let base = backoffs
                .get(attempt as usize)
                .or_else(|| backoffs.last())
                .copied()
                .unwrap_or_default();
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..300));
            tokio::time::sleep(base + jitter).await;
        }
    }
    false
}

async fn retry_once(ctx: &BotContext, chat_id: i64, request: &FailedRequest) -> BotResult<()> {
    let history = ctx.history.recent(chat_id, ctx.config.llm.context_window);
    let messages = build_messages(
        &ctx.config.llm.system_prompt,
        &history,
        &request.original_text,
        &request.prompt,
        Utc::now(),
    );
    let raw = ctx.gate.complete(&messages).await?;
    let answer = Answer::from_raw(&raw);
    if answer.text.trim().is_empty() {
        return Err(LlmError::EmptyReply {
            provider: ctx.gate.llm().provider().to_string(),
        }
        .into());
    }

    let _ = ctx.api.delete_message(chat_id, request.error_message_id).await;
    send_long_text(ctx, chat_id, &answer.text, None).await?;
    ctx.history.push_exchange(chat_id, &request.original_text, &answer.text);
    Ok(())
}

async fn handle_expand(ctx: &BotContext, query: &CallbackQuery, chat_id: i64) -> BotResult<()> {
    let original = ctx.sessions.expansion(chat_id);
    if original.is_none() {
        ctx.api
            .answer_callback_query(&query.id, Some(texts::EXPAND_GONE), true)
            .await?;
    } else {
        ctx.api.answer_callback_query(&query.id, None, false).await?;
    }
    if let Some(message) = &query.message {
        let _ = ctx.api.edit_message_reply_markup(chat_id, message.message_id, None).await;
    }
    let Some(original) = original else {
        return Ok(());
    };

    let mut progress = OutgoingMessage::new(chat_id, texts::EXPAND_PROGRESS);
    if let Some(message) = &query.message {
        progress = progress.reply_to(message.message_id);
    }
    let loading = ctx.api.send_message(&progress).await?;

    let history = ctx.history.recent(chat_id, ctx.config.llm.context_window);
    let messages = build_messages(
        &ctx.config.llm.system_prompt,
        &history,
        &original,
        &expand_prompt(&original),
        Utc::now(),
    );
    let outcome = match ctx.gate.complete(&messages).await {
        Ok(raw) => {
            let answer = Answer::from_raw(&raw);
            send_long_text(ctx, chat_id, &answer.text, None)
                .await
                .map(|_| answer.text)
                .map_err(Into::into)
        }
        Err(e) => Err(crate::error::BotError::from(e)),
    };
    let _ = ctx.api.delete_message(chat_id, loading.message_id).await;

    match outcome {
        Ok(text) => ctx.history.push(chat_id, Role::Assistant, &text),
        Err(e) => {
            tracing::warn!(chat_id, error = %e, "expand failed");
            ctx.api
                .send_message(&OutgoingMessage::new(chat_id, texts::EXPAND_FAILED))
                .await?;
        }
    }
    Ok(())
}

/// Forward the stored failed request to every admin.
async fn handle_report(ctx: &BotContext, query: &CallbackQuery, chat_id: i64) -> BotResult<()> {
    let request = ctx.sessions.failed(chat_id).map(|r| r.original_text);
    let report = texts::report_to_admin(query.from.id, query.from.username.as_deref(), request.as_deref());

    let mut admins = ctx.store.list_admins().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "list_admins failed");
        Vec::new()
    });
    admins.extend(ctx.config.admin_id);
    admins.sort_unstable();
    admins.dedup();

    for admin in admins {
        let message = OutgoingMessage::new(admin, report.as_str()).parse_mode(ParseMode::Html);
        if let Err(e) = ctx.api.send_message(&message).await {
            tracing::warn!(admin, error = %e, "report not delivered");
        }
    }
    ctx.api
        .answer_callback_query(&query.id, Some(texts::REPORT_SENT), false)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::testing::{callback, Call, TestBot, ADMIN_ID};
    use crate::storage::UserStore;
    use crate::utilities::prompts::concise_prompt;

    fn store_failed(bot: &TestBot) {
        bot.ctx
            .sessions
            .store_failed(5, FailedRequest::new(7, concise_prompt("savol"), "savol", 99));
    }

    fn answers(bot: &TestBot) -> Vec<(Option<String>, bool)> {
        bot.api
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Answer { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_retry_success() {
        let bot = TestBot::builder().reply(Ok("javob".into())).build();
        store_failed(&bot);
        handle_callback(&bot.ctx, &callback(7, 5, 99, "retry:5")).await.unwrap();

        let calls = bot.api.calls();
        assert!(calls.contains(&Call::Edit {
            chat_id: 5,
            message_id: 99,
            text: texts::RETRY_PROGRESS.into(),
            markup: None,
        }));
        assert!(calls.contains(&Call::Delete { chat_id: 5, message_id: 99 }));
        assert_eq!(bot.api.texts_to(5), vec!["javob".to_string()]);
        assert!(bot.ctx.sessions.failed(5).is_none());
        assert!(!bot.ctx.sessions.is_ongoing(5));
        assert_eq!(bot.ctx.history.len(5), 2);
        assert_eq!(bot.llm.requests()[0].last().unwrap().content, concise_prompt("savol"));
    }

    #[tokio::test]
    async fn test_retry_runs_when_callback_answer_expired() {
        let bot = TestBot::builder().reply(Ok("javob".into())).build();
        store_failed(&bot);
        bot.api.expire_queries(true);

        handle_callback(&bot.ctx, &callback(7, 5, 99, "retry:5")).await.unwrap();

        assert_eq!(bot.api.texts_to(5), vec!["javob".to_string()]);
        assert!(!bot.ctx.sessions.is_ongoing(5));
        assert!(bot.ctx.sessions.failed(5).is_none());
    }

    #[tokio::test]
    async fn test_retry_failure_reoffers_keyboard() {
        let bot = TestBot::builder().build();
        store_failed(&bot);
        handle_callback(&bot.ctx, &callback(7, 5, 99, "retry:5")).await.unwrap();

        assert_eq!(bot.llm.requests().len(), 2);
        let last = bot.api.calls().pop().unwrap();
        assert_eq!(
            last,
            Call::Edit {
                chat_id: 5,
                message_id: 99,
                text: texts::RETRY_FAILED.into(),
                markup: Some(retry_keyboard(5, 1)),
            }
        );
        let failed = bot.ctx.sessions.failed(5).unwrap();
        assert_eq!(failed.attempts_manual, 1);
        assert_eq!(failed.attempts_auto, 2);
        assert!(!bot.ctx.sessions.is_ongoing(5));
    }

    #[tokio::test]
    async fn test_retry_refusals() {
        let bot = TestBot::builder().build();
        store_failed(&bot);
        handle_callback(&bot.ctx, &callback(8, 5, 99, "retry:5")).await.unwrap();

        let mut request = FailedRequest::new(7, "p", "savol", 99);
        request.attempts_manual = 3;
        bot.ctx.sessions.store_failed(5, request);
        handle_callback(&bot.ctx, &callback(7, 5, 99, "retry:5")).await.unwrap();

        assert_eq!(
            answers(&bot),
            vec![
                (Some(texts::RETRY_NOT_OWNER.to_string()), true),
                (Some(texts::RETRY_EXHAUSTED.to_string()), true),
            ]
        );
        assert!(bot.llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_retry_without_request() {
        let bot = TestBot::builder().build();
        handle_callback(&bot.ctx, &callback(7, 5, 99, "retry:5")).await.unwrap();
        assert!(bot.api.calls().contains(&Call::Edit {
            chat_id: 5,
            message_id: 99,
            text: texts::RETRY_NOT_FOUND.into(),
            markup: None,
        }));
    }

    #[tokio::test]
    async fn test_callback_for_other_chat_is_rejected() {
        let bot = TestBot::builder().build();
        store_failed(&bot);
        handle_callback(&bot.ctx, &callback(7, 6, 99, "retry:5")).await.unwrap();
        handle_callback(&bot.ctx, &callback(7, 5, 99, "nonsense")).await.unwrap();
        assert_eq!(
            answers(&bot),
            vec![
                (Some(texts::BAD_CALLBACK.to_string()), true),
                (Some(texts::BAD_CALLBACK.to_string()), true),
            ]
        );
        assert_eq!(bot.ctx.sessions.failed(5).map(|r| r.attempts_manual), Some(0));
    }

    #[tokio::test]
    async fn test_expand() {
        let bot = TestBot::builder().reply(Ok("## Batafsil\nuzun javob".into())).build();
        bot.ctx.sessions.set_expansion(5, "savol");
        handle_callback(&bot.ctx, &callback(5, 5, 40, "expand:5")).await.unwrap();

        let calls = bot.api.calls();
        assert!(calls.contains(&Call::EditMarkup {
            chat_id: 5,
            message_id: 40,
            markup: None,
        }));
        assert_eq!(
            bot.api.texts_to(5),
            vec![texts::EXPAND_PROGRESS.to_string(), "Batafsil\nuzun javob".to_string()]
        );
        assert!(calls.contains(&Call::Delete { chat_id: 5, message_id: 500 }));
        assert_eq!(bot.llm.requests()[0].last().unwrap().content, expand_prompt("savol"));
        assert_eq!(bot.ctx.history.len(5), 1);
    }

    #[tokio::test]
    async fn test_expand_without_text() {
        let bot = TestBot::builder().build();
        handle_callback(&bot.ctx, &callback(5, 5, 40, "expand:5")).await.unwrap();
        assert_eq!(answers(&bot), vec![(Some(texts::EXPAND_GONE.to_string()), true)]);
        assert!(bot.api.sent_messages().is_empty());
    }

    #[tokio::test]
    async fn test_report_reaches_all_admins() {
        let bot = TestBot::builder().build();
        bot.store.add_admin(2000).await.unwrap();
        store_failed(&bot);
        handle_callback(&bot.ctx, &callback(7, 5, 99, "report:5")).await.unwrap();

        for admin in [ADMIN_ID, 2000] {
            let sent = bot.api.texts_to(admin);
            assert_eq!(sent.len(), 1);
            assert!(sent[0].contains("savol"));
            assert!(sent[0].contains("@tester"));
        }
        assert_eq!(answers(&bot), vec![(Some(texts::REPORT_SENT.to_string()), false)]);
    }
}
