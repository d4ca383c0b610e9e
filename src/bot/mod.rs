//! The Telegram bot: update dispatching, handlers and background jobs.

pub mod dialogue;
pub mod dispatcher;
pub mod handlers;
pub mod notifier;
pub mod reply;
pub mod texts;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use crate::config::BotConfig;
use crate::llms::RequestGate;
use crate::memory::{ChatHistory, SessionMemory};
use crate::ocr::TextExtractor;
use crate::storage::UserStore;
use crate::telegram::TelegramApi;

pub use dialogue::{Dialogue, Dialogues};
pub use dispatcher::Dispatcher;

/// Everything a handler needs, shared by all update tasks.
pub struct BotContext {
    pub config: BotConfig,
    pub api: Arc<dyn TelegramApi>,
    pub gate: Arc<RequestGate>,
    pub ocr: Arc<dyn TextExtractor>,
    pub store: Arc<dyn UserStore>,
    pub history: ChatHistory,
    pub sessions: SessionMemory,
    pub dialogues: Dialogues,
}

impl BotContext {
    pub fn new(
        config: BotConfig,
        api: Arc<dyn TelegramApi>,
        gate: Arc<RequestGate>,
        ocr: Arc<dyn TextExtractor>,
        store: Arc<dyn UserStore>,
    ) -> Self {
        let history = ChatHistory::new(config.limits.history_max);
        Self {
            config,
            api,
            gate,
            ocr,
            store,
            history,
            sessions: SessionMemory::new(),
            dialogues: Dialogues::new(),
        }
    }

    /// Admins, super-admins and the configured admin may use the panel.
    ///
    /// Store failures count as "not an admin".
    pub async fn is_privileged(&self, user_id: i64) -> bool {
        if self.config.admin_id == Some(user_id) || self.config.superadmin_id == Some(user_id) {
            return true;
        }
        let admin = self.store.is_admin(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(user_id, error = %e, "admin lookup failed");
            false
        });
        admin || self.store.is_superadmin(user_id).await.unwrap_or(false)
    }

    /// Only super-admins and the configured admin may add or remove admins.
    pub async fn can_manage_admins(&self, user_id: i64) -> bool {
        if self.config.admin_id == Some(user_id) || self.config.superadmin_id == Some(user_id) {
            return true;
        }
        self.store.is_superadmin(user_id).await.unwrap_or(false)
    }
}
