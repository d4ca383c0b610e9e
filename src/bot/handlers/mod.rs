//! Update routing.

pub mod admin;
pub mod callbacks;
pub mod messages;

use std::sync::Arc;

use super::BotContext;
use crate::error::BotResult;
use crate::telegram::{Message, Update, User};

use admin::AdminAction;

/// Route one update to its handler.
pub async fn handle_update(ctx: &Arc<BotContext>, update: Update) -> BotResult<()> {
    if let Some(query) = update.callback_query {
        return callbacks::handle_callback(ctx, &query).await;
    }
    let Some(message) = update.message else {
        return Ok(());
    };

    if let Some((command, args)) = message.command() {
        return handle_command(ctx, &message, command, args).await;
    }
    if message.photo.is_some() {
        return messages::handle_photo(ctx, &message).await;
    }
    if message.text.is_some() {
        return messages::handle_text(ctx, &message).await;
    }
    Ok(())
}

async fn handle_command(ctx: &Arc<BotContext>, message: &Message, command: &str, args: &str) -> BotResult<()> {
    match command {
        "start" => messages::handle_start(ctx, message).await,
        "clear" => messages::handle_clear(ctx, message).await,
        "cancel" => admin::handle_cancel(ctx, message).await,
        other => match AdminAction::from_command(other) {
            Some(action) => admin::handle_command(ctx, message, action, args).await,
            None => {
                tracing::debug!(command = other, "ignoring unknown command");
                Ok(())
            }
        },
    }
}

/// Save the user and log the activity. Store failures are only logged.
pub(crate) async fn record_user(ctx: &BotContext, user: &User, activity_type: &str) {
    let username = user.username.as_deref();
    if let Err(e) = ctx.store.save_user(user.id, username).await {
        tracing::warn!(user_id = user.id, error = %e, "save_user failed");
        return;
    }
    if let Err(e) = ctx.store.log_activity(user.id, username, activity_type).await {
        tracing::warn!(user_id = user.id, error = %e, "log_activity failed");
    }
}
