//! Admin panel: broadcast, private messages, statistics and admin management.

use std::time::Duration;

use crate::bot::dialogue::Dialogue;
use crate::bot::texts::{self, user_link};
use crate::bot::BotContext;
use crate::error::{BotError, BotResult, TelegramError};
use crate::storage::{activity, ActivityCount, ActivityRecord, UserStats};
use crate::telegram::keyboards::{
    BTN_ADD_ADMIN, BTN_BROADCAST, BTN_MESSAGES, BTN_PM, BTN_REMOVE_ADMIN, BTN_STATS, BTN_TOP, BTN_USERS,
};
use crate::telegram::{Message, OutgoingMessage, ParseMode};
use crate::utilities::prompts::tashkent_offset;

const TOP_MEDALS: [&str; 3] = ["👑", "🥈", "🥉"];
const RECENT_ACTIVITY_ROWS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Broadcast,
    PrivateMessage,
    TopUsers,
    Stats,
    UserList,
    AddAdmin,
    RemoveAdmin,
    RecentActivity,
}

impl AdminAction {
    /// Action behind an admin keyboard button.
    pub fn from_button(text: &str) -> Option<Self> {
        Some(match text.trim() {
            BTN_BROADCAST => Self::Broadcast,
            BTN_PM => Self::PrivateMessage,
            BTN_TOP => Self::TopUsers,
            BTN_STATS => Self::Stats,
            BTN_USERS => Self::UserList,
            BTN_ADD_ADMIN => Self::AddAdmin,
            BTN_REMOVE_ADMIN => Self::RemoveAdmin,
            BTN_MESSAGES => Self::RecentActivity,
            _ => return None,
        })
    }

    /// Action behind a slash command, without the slash.
    pub fn from_command(command: &str) -> Option<Self> {
        Some(match command {
            "send" => Self::Broadcast,
            "pm" => Self::PrivateMessage,
            "top" => Self::TopUsers,
            "stats" => Self::Stats,
            "users" => Self::UserList,
            "add_admin" => Self::AddAdmin,
            "remove_admin" => Self::RemoveAdmin,
            "messages" => Self::RecentActivity,
            _ => return None,
        })
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
    pub deactivated: usize,
}

/// Where a PM target given by the admin points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    Found(i64),
    BadFormat,
    NotFound,
}

pub async fn handle_command(ctx: &BotContext, message: &Message, action: AdminAction, args: &str) -> BotResult<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    if !ctx.is_privileged(user.id).await {
        tracing::info!(user_id = user.id, ?action, "admin command refused");
        send(ctx, message.chat.id, texts::ADMIN_ONLY).await?;
        return Ok(());
    }
    ctx.dialogues.finish(message.chat.id, user.id);
    run_action(ctx, message, action, args).await
}

/// Run an action for an already authorised admin.
///
/// Store and serialization failures are reported to the admin instead of
/// being propagated.
pub async fn run_action(ctx: &BotContext, message: &Message, action: AdminAction, args: &str) -> BotResult<()> {
    let chat_id = message.chat.id;
    let user_id = message.from.as_ref().map_or(0, |u| u.id);
    let result = match action {
        AdminAction::Broadcast if args.is_empty() => {
            ask(ctx, chat_id, user_id, Dialogue::BroadcastText, texts::BROADCAST_ASK_TEXT).await
        }
        AdminAction::Broadcast => broadcast(ctx, chat_id, args).await.map(|_| ()),
        AdminAction::PrivateMessage if args.is_empty() => {
            ask(ctx, chat_id, user_id, Dialogue::PmTarget, texts::PM_ASK_TARGET).await
        }
        AdminAction::PrivateMessage => accept_pm_target(ctx, chat_id, user_id, args).await,
        AdminAction::TopUsers => send_top_users(ctx, chat_id).await,
        AdminAction::Stats => send_stats(ctx, chat_id).await,
        AdminAction::UserList => send_user_list(ctx, chat_id).await,
        AdminAction::RecentActivity => send_recent_activity(ctx, chat_id).await,
        AdminAction::AddAdmin | AdminAction::RemoveAdmin => {
            if !ctx.can_manage_admins(user_id).await {
                send(ctx, chat_id, texts::SUPERADMIN_ONLY).await
            } else if args.is_empty() {
                let (dialogue, prompt) = if action == AdminAction::AddAdmin {
                    (Dialogue::AddAdmin, texts::ADMIN_ASK_ADD)
                } else {
                    (Dialogue::RemoveAdmin, texts::ADMIN_ASK_REMOVE)
                };
                ask(ctx, chat_id, user_id, dialogue, prompt).await
            } else {
                change_admin(ctx, chat_id, action == AdminAction::AddAdmin, args).await
            }
        }
    };
    report_failure(ctx, chat_id, result).await
}

/// Feed the admin's text into the open dialogue.
///
/// Rights are checked again, since they may have been revoked while the
/// dialogue was open.
pub async fn continue_dialogue(ctx: &BotContext, message: &Message, dialogue: Dialogue, text: &str) -> BotResult<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat.id;
    let allowed = if dialogue.manages_admins() {
        ctx.can_manage_admins(user.id).await
    } else {
        ctx.is_privileged(user.id).await
    };
    if !allowed {
        ctx.dialogues.finish(chat_id, user.id);
        tracing::info!(user_id = user.id, ?dialogue, "dialogue closed, rights revoked");
        let refusal = if dialogue.manages_admins() {
            texts::SUPERADMIN_ONLY
        } else {
            texts::ADMIN_ONLY
        };
        return send(ctx, chat_id, refusal).await;
    }

    let text = text.trim();
    let result = match dialogue {
        Dialogue::BroadcastText => {
            ctx.dialogues.finish(chat_id, user.id);
            broadcast(ctx, chat_id, text).await.map(|_| ())
        }
        Dialogue::PmTarget => accept_pm_target(ctx, chat_id, user.id, text).await,
        Dialogue::PmText { target } => {
            ctx.dialogues.finish(chat_id, user.id);
            send_private_message(ctx, chat_id, target, text).await
        }
        Dialogue::AddAdmin | Dialogue::RemoveAdmin => {
            ctx.dialogues.finish(chat_id, user.id);
            change_admin(ctx, chat_id, dialogue == Dialogue::AddAdmin, text).await
        }
    };
    report_failure(ctx, chat_id, result).await
}

pub async fn handle_cancel(ctx: &BotContext, message: &Message) -> BotResult<()> {
    let user_id = message.from.as_ref().map_or(0, |u| u.id);
    if ctx.dialogues.finish(message.chat.id, user_id) {
        tracing::debug!(chat_id = message.chat.id, "dialogue cancelled");
    }
    send(ctx, message.chat.id, texts::CANCELLED).await
}

async fn report_failure(ctx: &BotContext, chat_id: i64, result: BotResult<()>) -> BotResult<()> {
    match result {
        Err(e @ (BotError::Store(_) | BotError::Json(_))) => {
            tracing::error!(chat_id, error = %e, "admin action failed");
            send(ctx, chat_id, &texts::failure_notice(&e)).await
        }
        other => other,
    }
}

async fn send(ctx: &BotContext, chat_id: i64, text: &str) -> BotResult<()> {
    ctx.api.send_message(&OutgoingMessage::new(chat_id, text)).await?;
    Ok(())
}

async fn send_html(ctx: &BotContext, chat_id: i64, text: &str) -> BotResult<()> {
    ctx.api
        .send_message(&OutgoingMessage::new(chat_id, text).parse_mode(ParseMode::Html))
        .await?;
    Ok(())
}

async fn ask(ctx: &BotContext, chat_id: i64, user_id: i64, dialogue: Dialogue, prompt: &str) -> BotResult<()> {
    ctx.dialogues.start(chat_id, user_id, dialogue);
    send(ctx, chat_id, prompt).await
}

// -- broadcast ---------------------------------------------------------------

/// Send `text` to every active user, editing a progress message as it goes.
///
/// Unreachable chats are deactivated; other failures are only counted.
pub async fn broadcast(ctx: &BotContext, admin_chat: i64, text: &str) -> BotResult<BroadcastReport> {
    let recipients = ctx.store.active_user_ids().await?;
    let total = recipients.len();
    let progress = ctx
        .api
        .send_message(&OutgoingMessage::new(admin_chat, texts::broadcast_progress(0)))
        .await?;
    tracing::info!(admin_chat, total, "broadcast started");

    let mut report = BroadcastReport::default();
    let mut shown = 0;
    for (i, user_id) in recipients.into_iter().enumerate() {
        match deliver_plain(ctx, user_id, text).await {
            Ok(()) => report.sent += 1,
            Err(e) => {
                report.failed += 1;
                tracing::debug!(user_id, error = %e, "broadcast delivery failed");
                if e.is_unreachable_chat() {
                    match ctx.store.deactivate_user(user_id).await {
                        Ok(()) => report.deactivated += 1,
                        Err(e) => tracing::warn!(user_id, error = %e, "deactivate_user failed"),
                    }
                }
            }
        }

        let percent = ((i + 1) * 100 / total) as u32;
        if percent != shown {
            shown = percent;
            let _ = ctx
                .api
                .edit_message_text(admin_chat, progress.message_id, &texts::broadcast_progress(percent), None, None)
                .await;
        }
        if !ctx.config.schedule.broadcast_delay.is_zero() {
            tokio::time::sleep(ctx.config.schedule.broadcast_delay).await;
        }
    }

    tracing::info!(admin_chat, sent = report.sent, failed = report.failed, "broadcast finished");
    let _ = ctx
        .api
        .edit_message_text(
            admin_chat,
            progress.message_id,
            &texts::broadcast_summary(report.sent, report.failed),
            None,
            None,
        )
        .await;
    Ok(report)
}

/// Send a plain message, waiting once when Telegram asks us to slow down.
async fn deliver_plain(ctx: &BotContext, chat_id: i64, text: &str) -> Result<(), TelegramError> {
    let message = OutgoingMessage::new(chat_id, text);
    match ctx.api.send_message(&message).await {
        Err(TelegramError::Api {
            retry_after: Some(secs), ..
        }) => {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            ctx.api.send_message(&message).await.map(|_| ())
        }
        other => other.map(|_| ()),
    }
}

// -- private messages --------------------------------------------------------

async fn accept_pm_target(ctx: &BotContext, chat_id: i64, user_id: i64, input: &str) -> BotResult<()> {
    match resolve_target(ctx, input).await? {
        Resolved::Found(target) => {
            ask(ctx, chat_id, user_id, Dialogue::PmText { target }, texts::PM_ASK_TEXT).await
        }
        Resolved::BadFormat => {
            ctx.dialogues.start(chat_id, user_id, Dialogue::PmTarget);
            send(ctx, chat_id, texts::PM_BAD_ID).await
        }
        Resolved::NotFound => {
            ctx.dialogues.start(chat_id, user_id, Dialogue::PmTarget);
            send(ctx, chat_id, texts::PM_NOT_FOUND).await
        }
    }
}

/// A numeric id is taken as is; `@name` is looked up among known users.
async fn resolve_target(ctx: &BotContext, input: &str) -> BotResult<Resolved> {
    let input = input.trim();
    if let Some(name) = input.strip_prefix('@') {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Ok(Resolved::BadFormat);
        }
        return Ok(match ctx.store.user_id_by_username(name).await? {
            Some(id) => Resolved::Found(id),
            None => Resolved::NotFound,
        });
    }
    Ok(input.parse::<i64>().map_or(Resolved::BadFormat, Resolved::Found))
}

async fn send_private_message(ctx: &BotContext, chat_id: i64, target: i64, text: &str) -> BotResult<()> {
    let progress = ctx
        .api
        .send_message(&OutgoingMessage::new(chat_id, texts::broadcast_progress(0)))
        .await?;
    let delivery = OutgoingMessage::new(target, texts::admin_pm(text)).parse_mode(ParseMode::Html);
    let status = match ctx.api.send_message(&delivery).await {
        Ok(_) => {
            tracing::info!(target, "private message delivered");
            texts::PM_SENT.to_string()
        }
        Err(e) => {
            tracing::warn!(target, error = %e, "private message failed");
            texts::failure_notice(&e)
        }
    };
    let _ = ctx
        .api
        .edit_message_text(chat_id, progress.message_id, &status, None, None)
        .await;
    Ok(())
}

// -- reports -----------------------------------------------------------------

fn medal(rank: usize) -> String {
    match TOP_MEDALS.get(rank - 1) {
        Some(m) => m.to_string(),
        None => format!("{}\u{FE0F}\u{20E3}", rank),
    }
}

fn top_table(title: &str, rows: &[ActivityCount]) -> String {
    let mut out = format!("🏆 <b>{}</b>\n\n", title);
    for (i, row) in rows.iter().enumerate() {
        out.push_str(&format!(
            "{} 👤 {} — <b>{}</b> marta\n",
            medal(i + 1),
            user_link(row.user_id, row.username.as_deref()),
            row.activity_count
        ));
    }
    out
}

/// The two leaderboards, HTML formatted.
pub fn top_users_text(two_weeks: &[ActivityCount], month: &[ActivityCount]) -> String {
    format!(
        "{}\n\n{}",
        top_table("So'nggi 2 hafta — TOP 5", two_weeks),
        top_table("So'nggi 1 oy — TOP 10", month)
    )
}

async fn send_top_users(ctx: &BotContext, chat_id: i64) -> BotResult<()> {
    let two_weeks = ctx.store.top_users(14, 5).await?;
    let month = ctx.store.top_users(30, 10).await?;
    send_html(ctx, chat_id, &top_users_text(&two_weeks, &month)).await
}

fn leader(row: Option<&ActivityCount>) -> (String, i64) {
    row.map_or(("—".to_string(), 0), |r| {
        (user_link(r.user_id, r.username.as_deref()), r.activity_count)
    })
}

/// Statistics screen, HTML formatted. Times are Tashkent local.
pub fn stats_text(stats: &UserStats, active_users: i64) -> String {
    let (month_user, month_count) = leader(stats.most_active_30_days.as_ref());
    let (today_user, today_count) = leader(stats.most_active_today.as_ref());
    let (newest, joined) = stats.newest_user.as_ref().map_or(("—".to_string(), "—".to_string()), |u| {
        (
            user_link(u.user_id, u.username.as_deref()),
            u.created_at
                .with_timezone(&tashkent_offset())
                .format("%Y-%m-%d %H:%M")
                .to_string(),
        )
    });

    format!(
        "👥 <b>Bot foydalanuvchilari statistikasi</b>\n\n\
         📌 Umumiy foydalanuvchilar: <b>{}</b>\n\
         ✅ Faol foydalanuvchilar: <b>{}</b>\n\n\
         🏆 Oxirgi 30 kun eng faol:\n├ 👤 {}\n└ 🔢 Faollik: {}\n\n\
         🔥 Bugungi eng faol:\n├ 👤 {}\n└ 🔢 Faollik: {}\n\n\
         🆕 Oxirgi foydalanuvchi:\n├ 👤 {}\n└ 📅 Qo'shilgan: {}",
        stats.total_users, active_users, month_user, month_count, today_user, today_count, newest, joined
    )
}

async fn send_stats(ctx: &BotContext, chat_id: i64) -> BotResult<()> {
    let stats = ctx.store.stats(ctx.config.admin_id).await?;
    let active = ctx.store.active_users_count().await?;
    send_html(ctx, chat_id, &stats_text(&stats, active)).await
}

async fn send_user_list(ctx: &BotContext, chat_id: i64) -> BotResult<()> {
    let users = ctx.store.list_users().await?;
    let body = serde_json::to_vec_pretty(&users)?;
    ctx.api
        .send_document(chat_id, "users.json", body, Some(texts::USERS_CAPTION))
        .await?;
    Ok(())
}

fn activity_label(activity_type: &str) -> &str {
    match activity_type {
        activity::START => "▶️ /start",
        activity::MESSAGE => "💬 xabar",
        activity::PHOTO => "🖼 rasm",
        other => other,
    }
}

/// Latest activity rows, newest first, HTML formatted.
pub fn recent_activity_text(rows: &[ActivityRecord]) -> String {
    if rows.is_empty() {
        return texts::NO_ACTIVITY.to_string();
    }
    let mut out = String::from("👀 <b>So'nggi faollik</b>\n\n");
    for row in rows {
        out.push_str(&format!(
            "🕒 {} 👤 {} — {}\n",
            row.activity_time.with_timezone(&tashkent_offset()).format("%d.%m %H:%M"),
            user_link(row.user_id, row.username.as_deref()),
            activity_label(&row.activity_type)
        ));
    }
    out
}

async fn send_recent_activity(ctx: &BotContext, chat_id: i64) -> BotResult<()> {
    let rows = ctx.store.recent_activity(RECENT_ACTIVITY_ROWS).await?;
    send_html(ctx, chat_id, &recent_activity_text(&rows)).await
}

// -- admin management ----------------------------------------------------------

async fn change_admin(ctx: &BotContext, chat_id: i64, add: bool, input: &str) -> BotResult<()> {
    let Ok(target) = input.trim().parse::<i64>() else {
        return send(ctx, chat_id, texts::ADMIN_BAD_ID).await;
    };
    let reply = if add {
        ctx.store.add_admin(target).await?;
        tracing::info!(target, "admin added");
        texts::admin_added(target)
    } else if ctx.store.remove_admin(target).await? {
        tracing::info!(target, "admin removed");
        texts::admin_removed(target)
    } else {
        texts::not_an_admin(target)
    };
    send(ctx, chat_id, &reply).await
}
