//! Background chores: the daily pin and the inactive-user notifier.

use std::sync::Arc;

use chrono::Utc;

use super::texts;
use super::BotContext;
use crate::error::BotResult;
use crate::telegram::OutgoingMessage;
use crate::utilities::prompts::tashkent_today;

/// Pin `message_id` if nothing was pinned for this user today (Tashkent).
///
/// Returns whether a pin was made. A refused pin is not an error.
pub async fn process_daily_pin(ctx: &BotContext, chat_id: i64, user_id: i64, message_id: i64) -> BotResult<bool> {
    let today = tashkent_today(Utc::now());
    if ctx.store.last_pinned_date(user_id).await? == Some(today) {
        return Ok(false);
    }
    if let Err(e) = ctx.api.pin_chat_message(chat_id, message_id).await {
        tracing::debug!(chat_id, message_id, error = %e, "pin refused");
        return Ok(false);
    }
    ctx.store.set_last_pinned_date(user_id, today).await?;
    Ok(true)
}

/// Run [`process_daily_pin`] on its own task.
pub fn spawn_daily_pin(ctx: &Arc<BotContext>, chat_id: i64, user_id: i64, message_id: i64) {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        if let Err(e) = process_daily_pin(&ctx, chat_id, user_id, message_id).await {
            tracing::warn!(chat_id, error = %e, "daily pin failed");
        }
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub notified: usize,
    pub deactivated: usize,
}

/// Greet every active user idle for the configured number of days.
///
/// A delivered greeting refreshes `last_seen`; a failed one deactivates the
/// user. A store error for one user is logged and the round goes on.
pub async fn notify_inactive_users(ctx: &BotContext) -> BotResult<NotifyReport> {
    let schedule = &ctx.config.schedule;
    let idle = ctx.store.inactive_users(schedule.inactive_after_days).await?;
    tracing::info!(count = idle.len(), "notifying inactive users");

    let mut report = NotifyReport::default();
    for user_id in idle {
        let greeting = OutgoingMessage::new(user_id, texts::INACTIVE_GREETING);
        match ctx.api.send_message(&greeting).await {
            Ok(_) => {
                report.notified += 1;
                if let Err(e) = ctx.store.touch_last_seen(user_id).await {
                    tracing::warn!(user_id, error = %e, "touch_last_seen failed");
                }
            }
            Err(e) => {
                tracing::debug!(user_id, error = %e, "greeting failed, deactivating");
                match ctx.store.deactivate_user(user_id).await {
                    Ok(()) => report.deactivated += 1,
                    Err(e) => tracing::warn!(user_id, error = %e, "deactivate_user failed"),
                }
            }
        }
        if !schedule.notify_delay.is_zero() {
            tokio::time::sleep(schedule.notify_delay).await;
        }
    }
    Ok(report)
}

/// Notifier loop; the first round runs one interval after start.
pub async fn run_inactive_notifier(ctx: Arc<BotContext>) {
    let interval = ctx.config.schedule.notify_interval;
    loop {
        tokio::time::sleep(interval).await;
        match notify_inactive_users(&ctx).await {
            Ok(report) => tracing::info!(
                notified = report.notified,
                deactivated = report.deactivated,
                "inactive-user round done"
            ),
            Err(e) => tracing::error!(error = %e, "inactive-user round failed"),
        }
    }
}
