//! Recording fakes for handler tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use super::BotContext;
use crate::config::BotConfig;
use crate::error::{LlmError, OcrError, StoreError, TelegramError};
use crate::llms::{ChatLLM, ChatMessage, RequestGate};
use crate::ocr::TextExtractor;
use crate::storage::{ActivityCount, ActivityRecord, MemoryStore, UserRecord, UserStats, UserStore};
use crate::telegram::types::PhotoSize;
use crate::telegram::{
    CallbackQuery, Chat, File, InlineKeyboardMarkup, Message, OutgoingMessage, ParseMode, TelegramApi, Update, User,
};

pub(crate) const ADMIN_ID: i64 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Send(OutgoingMessage),
    Edit {
        chat_id: i64,
        message_id: i64,
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    },
    EditMarkup {
        chat_id: i64,
        message_id: i64,
        markup: Option<InlineKeyboardMarkup>,
    },
    Delete {
        chat_id: i64,
        message_id: i64,
    },
    Action {
        chat_id: i64,
        action: String,
    },
    Answer {
        id: String,
        text: Option<String>,
        alert: bool,
    },
    Pin {
        chat_id: i64,
        message_id: i64,
    },
    Document {
        chat_id: i64,
        file_name: String,
        content: Vec<u8>,
        caption: Option<String>,
    },
}

#[derive(Default)]
pub(crate) struct FakeTelegram {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicI64,
    reject_markdown: AtomicBool,
    expired_queries: AtomicBool,
    unreachable: Mutex<HashSet<i64>>,
    updates: Mutex<VecDeque<Vec<Update>>>,
    offsets: Mutex<Vec<i64>>,
}

fn blocked() -> TelegramError {
    TelegramError::Api {
        code: 403,
        description: "Forbidden: bot was blocked by the user".into(),
        retry_after: None,
    }
}

impl FakeTelegram {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn message(&self, chat_id: i64, text: &str) -> Message {
        Message {
            message_id: 500 + self.next_id.fetch_add(1, Ordering::SeqCst),
            chat: Chat {
                id: chat_id,
                kind: "private".into(),
                username: None,
            },
            from: None,
            date: 0,
            text: Some(text.to_string()),
            caption: None,
            photo: None,
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn sent_messages(&self) -> Vec<OutgoingMessage> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Texts sent to one chat, in order.
    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent_messages()
            .into_iter()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.text)
            .collect()
    }

    pub fn reject_markdown(&self, reject: bool) {
        self.reject_markdown.store(reject, Ordering::SeqCst);
    }

    /// `answerCallbackQuery` fails as if the query had expired.
    pub fn expire_queries(&self, expired: bool) {
        self.expired_queries.store(expired, Ordering::SeqCst);
    }

    /// Every call addressed to this chat fails with 403.
    pub fn block_chat(&self, chat_id: i64) {
        self.unreachable.lock().insert(chat_id);
    }

    pub fn push_updates(&self, batch: Vec<Update>) {
        self.updates.lock().push_back(batch);
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.offsets.lock().clone()
    }

    fn check_chat(&self, chat_id: i64) -> Result<(), TelegramError> {
        if self.unreachable.lock().contains(&chat_id) {
            Err(blocked())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TelegramApi for FakeTelegram {
    async fn get_updates(&self, offset: i64, _timeout_secs: u32) -> Result<Vec<Update>, TelegramError> {
        self.offsets.lock().push(offset);
        let next = self.updates.lock().pop_front();
        match next {
            Some(batch) => Ok(batch),
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, TelegramError> {
        self.record(Call::Send(message.clone()));
        self.check_chat(message.chat_id)?;
        if message.parse_mode == Some(ParseMode::Markdown) && self.reject_markdown.load(Ordering::SeqCst) {
            return Err(TelegramError::Api {
                code: 400,
                description: "Bad Request: can't parse entities: Can't find end of the entity".into(),
                retry_after: None,
            });
        }
        Ok(self.message(message.chat_id, &message.text))
    }

    async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        _parse_mode: Option<ParseMode>,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        self.record(Call::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
            markup: markup.cloned(),
        });
        self.check_chat(chat_id)
    }

    async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        self.record(Call::EditMarkup {
            chat_id,
            message_id,
            markup: markup.cloned(),
        });
        self.check_chat(chat_id)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        self.record(Call::Delete { chat_id, message_id });
        self.check_chat(chat_id)
    }

    async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<(), TelegramError> {
        self.record(Call::Action {
            chat_id,
            action: action.to_string(),
        });
        self.check_chat(chat_id)
    }

    async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), TelegramError> {
        self.record(Call::Answer {
            id: callback_query_id.to_string(),
            text: text.map(str::to_string),
            alert: show_alert,
        });
        if self.expired_queries.load(Ordering::SeqCst) {
            return Err(TelegramError::Api {
                code: 400,
                description: "Bad Request: query is too old and response timeout expired".into(),
                retry_after: None,
            });
        }
        Ok(())
    }

    async fn get_file(&self, file_id: &str) -> Result<File, TelegramError> {
        Ok(File {
            file_id: file_id.to_string(),
            file_path: Some(format!("photos/{}.jpg", file_id)),
            file_size: Some(3),
        })
    }

    async fn download_file(&self, _file_path: &str) -> Result<Vec<u8>, TelegramError> {
        Ok(vec![0xFF, 0xD8, 0xFF])
    }

    async fn pin_chat_message(&self, chat_id: i64, message_id: i64) -> Result<(), TelegramError> {
        self.record(Call::Pin { chat_id, message_id });
        self.check_chat(chat_id)
    }

    async fn send_document(
        &self,
        chat_id: i64,
        file_name: &str,
        content: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<Message, TelegramError> {
        self.record(Call::Document {
            chat_id,
            file_name: file_name.to_string(),
            content,
            caption: caption.map(str::to_string),
        });
        self.check_chat(chat_id)?;
        Ok(self.message(chat_id, ""))
    }

    async fn delete_webhook(&self, _drop_pending_updates: bool) -> Result<(), TelegramError> {
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64) -> Result<Chat, TelegramError> {
        self.check_chat(chat_id)?;
        Ok(Chat {
            id: chat_id,
            kind: "private".into(),
            username: None,
        })
    }
}

/// LLM answering from a script; an empty script answers with a 400.
#[derive(Debug, Default)]
pub(crate) struct FakeLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeLlm {
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    pub fn push_reply(&self, reply: Result<String, LlmError>) {
        self.replies.lock().push_back(reply);
    }
}

#[async_trait]
impl ChatLLM for FakeLlm {
    fn model(&self) -> &str {
        "fake-model"
    }

    fn provider(&self) -> &str {
        "fake"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        self.requests.lock().push(messages.to_vec());
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| {
            Err(LlmError::Api {
                provider: "fake".into(),
                status: 400,
                body: "no scripted reply".into(),
            })
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeOcr {
    results: Mutex<VecDeque<Result<String, OcrError>>>,
}

#[async_trait]
impl TextExtractor for FakeOcr {
    async fn extract_text(&self, _image: &[u8]) -> Result<String, OcrError> {
        let next = self.results.lock().pop_front();
        next.unwrap_or(Err(OcrError::NoText))
    }
}

/// [`MemoryStore`] whose per-user writes fail for chosen users.
pub(crate) struct FlakyStore {
    inner: Arc<MemoryStore>,
    broken: HashSet<i64>,
}

impl FlakyStore {
    fn check(&self, user_id: i64) -> Result<(), StoreError> {
        if self.broken.contains(&user_id) {
            return Err(StoreError::Unavailable(format!("write for user {} failed", user_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for FlakyStore {
    async fn migrate(&self, admin_id: Option<i64>, superadmin_id: Option<i64>) -> Result<(), StoreError> {
        self.inner.migrate(admin_id, superadmin_id).await
    }

    async fn save_user(&self, user_id: i64, username: Option<&str>) -> Result<(), StoreError> {
        self.check(user_id)?;
        self.inner.save_user(user_id, username).await
    }

    async fn log_activity(&self, user_id: i64, username: Option<&str>, activity_type: &str) -> Result<(), StoreError> {
        self.check(user_id)?;
        self.inner.log_activity(user_id, username, activity_type).await
    }

    async fn active_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        self.inner.active_user_ids().await
    }

    async fn deactivate_user(&self, user_id: i64) -> Result<(), StoreError> {
        self.check(user_id)?;
        self.inner.deactivate_user(user_id).await
    }

    async fn active_users_count(&self) -> Result<i64, StoreError> {
        self.inner.active_users_count().await
    }

    async fn user_id_by_username(&self, username: &str) -> Result<Option<i64>, StoreError> {
        self.inner.user_id_by_username(username).await
    }

    async fn add_admin(&self, user_id: i64) -> Result<(), StoreError> {
        self.check(user_id)?;
        self.inner.add_admin(user_id).await
    }

    async fn remove_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        self.check(user_id)?;
        self.inner.remove_admin(user_id).await
    }

    async fn list_admins(&self) -> Result<Vec<i64>, StoreError> {
        self.inner.list_admins().await
    }

    async fn is_admin(&self, user_id: i64) -> Result<bool, StoreError> {
        self.inner.is_admin(user_id).await
    }

    async fn is_superadmin(&self, user_id: i64) -> Result<bool, StoreError> {
        self.inner.is_superadmin(user_id).await
    }

    async fn top_users(&self, days: i64, limit: i64) -> Result<Vec<ActivityCount>, StoreError> {
        self.inner.top_users(days, limit).await
    }

    async fn stats(&self, exclude: Option<i64>) -> Result<UserStats, StoreError> {
        self.inner.stats(exclude).await
    }

    async fn inactive_users(&self, idle_days: i64) -> Result<Vec<i64>, StoreError> {
        self.inner.inactive_users(idle_days).await
    }

    async fn touch_last_seen(&self, user_id: i64) -> Result<(), StoreError> {
        self.check(user_id)?;
        self.inner.touch_last_seen(user_id).await
    }

    async fn last_pinned_date(&self, user_id: i64) -> Result<Option<NaiveDate>, StoreError> {
        self.inner.last_pinned_date(user_id).await
    }

    async fn set_last_pinned_date(&self, user_id: i64, date: NaiveDate) -> Result<(), StoreError> {
        self.check(user_id)?;
        self.inner.set_last_pinned_date(user_id, date).await
    }

    async fn list_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.inner.list_users().await
    }

    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityRecord>, StoreError> {
        self.inner.recent_activity(limit).await
    }
}

pub(crate) struct TestBot {
    pub ctx: Arc<BotContext>,
    pub api: Arc<FakeTelegram>,
    pub llm: Arc<FakeLlm>,
    pub store: Arc<MemoryStore>,
}

#[derive(Default)]
pub(crate) struct TestBotBuilder {
    replies: Vec<Result<String, LlmError>>,
    ocr: Vec<Result<String, OcrError>>,
    broken_users: HashSet<i64>,
    tweaks: Vec<Box<dyn FnOnce(&mut BotConfig)>>,
}

impl TestBot {
    pub fn builder() -> TestBotBuilder {
        TestBotBuilder::default()
    }
}

impl TestBotBuilder {
    pub fn reply(mut self, reply: Result<String, LlmError>) -> Self {
        self.replies.push(reply);
        self
    }

    pub fn ocr(mut self, result: Result<String, OcrError>) -> Self {
        self.ocr.push(result);
        self
    }

    /// Store writes concerning `user_id` fail; reads and `bot.store` are unaffected.
    pub fn store_fails_for(mut self, user_id: i64) -> Self {
        self.broken_users.insert(user_id);
        self
    }

    pub fn configure(mut self, tweak: impl FnOnce(&mut BotConfig) + 'static) -> Self {
        self.tweaks.push(Box::new(tweak));
        self
    }

    pub fn build(self) -> TestBot {
        let mut config = BotConfig::from_lookup(|name| match name {
            "BOT_TOKEN" => Some("123:test".to_string()),
            "MISTRAL_API_KEY" => Some("key".to_string()),
            _ => None,
        })
        .expect("test config");
        config.admin_id = Some(ADMIN_ID);
        config.limits.auto_backoffs = vec![Duration::from_millis(1)];
        config.schedule.broadcast_delay = Duration::ZERO;
        config.schedule.notify_delay = Duration::ZERO;
        for tweak in self.tweaks {
            tweak(&mut config);
        }

        let api = Arc::new(FakeTelegram::default());
        let llm = Arc::new(FakeLlm::default());
        for reply in self.replies {
            llm.push_reply(reply);
        }
        let ocr = Arc::new(FakeOcr {
            results: Mutex::new(self.ocr.into_iter().collect()),
        });
        let store = Arc::new(MemoryStore::new());
        let gate = RequestGate::new(llm.clone(), 2, 1, Duration::from_millis(1), Duration::from_secs(5)).without_jitter();

        let flaky = FlakyStore {
            inner: store.clone(),
            broken: self.broken_users,
        };

        let ctx = BotContext::new(config, api.clone(), Arc::new(gate), ocr, Arc::new(flaky));
        TestBot {
            ctx: Arc::new(ctx),
            api,
            llm,
            store,
        }
    }
}

pub(crate) fn user(id: i64, username: Option<&str>) -> User {
    User {
        id,
        is_bot: false,
        first_name: "Test".into(),
        username: username.map(str::to_string),
    }
}

pub(crate) fn text_message(chat_id: i64, user_id: i64, text: &str) -> Message {
    Message {
        message_id: 10,
        chat: Chat {
            id: chat_id,
            kind: "private".into(),
            username: None,
        },
        from: Some(user(user_id, Some("tester"))),
        date: 0,
        text: Some(text.to_string()),
        caption: None,
        photo: None,
    }
}

pub(crate) fn photo_message(chat_id: i64, user_id: i64, caption: Option<&str>) -> Message {
    let mut msg = text_message(chat_id, user_id, "");
    msg.text = None;
    msg.caption = caption.map(str::to_string);
    msg.photo = Some(vec![
        PhotoSize {
            file_id: "small".into(),
            file_unique_id: "s".into(),
            width: 90,
            height: 90,
            file_size: None,
        },
        PhotoSize {
            file_id: "large".into(),
            file_unique_id: "l".into(),
            width: 1280,
            height: 960,
            file_size: None,
        },
    ]);
    msg
}

pub(crate) fn callback(user_id: i64, chat_id: i64, message_id: i64, data: &str) -> CallbackQuery {
    let mut message = text_message(chat_id, user_id, "");
    message.message_id = message_id;
    CallbackQuery {
        id: "cb".into(),
        from: user(user_id, Some("tester")),
        message: Some(message),
        data: Some(data.to_string()),
    }
}
