//! Per-chat bookkeeping for retries and inline buttons.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A request whose answer could not be delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRequest {
    /// Only this user may press "retry".
    pub user_id: i64,
    /// Full prompt sent upstream, instruction prefix included.
    pub prompt: String,
    /// What the user actually wrote (or the OCR text).
    pub original_text: String,
    pub attempts_manual: u32,
    pub attempts_auto: u32,
    /// Message carrying the retry keyboard.
    pub error_message_id: i64,
    pub last_attempt: Option<Instant>,
}

impl FailedRequest {
    pub fn new(user_id: i64, prompt: impl Into<String>, original_text: impl Into<String>, error_message_id: i64) -> Self {
        Self {
            user_id,
            prompt: prompt.into(),
            original_text: original_text.into(),
            attempts_manual: 0,
            attempts_auto: 0,
            error_message_id,
            last_attempt: None,
        }
    }
}

/// Outcome of [`SessionMemory::begin_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Go ahead; the request is marked in flight and counted.
    Proceed(FailedRequest),
    /// Nothing stored for this chat.
    NotFound,
    /// The presser is not the user who sent the request.
    NotOwner,
    /// Pressed again before the cooldown ran out.
    Cooldown,
    /// All manual attempts used.
    Exhausted,
    /// A retry for this chat is already running.
    InFlight,
}

/// Retry, cooldown and button state shared by all update tasks.
#[derive(Debug, Default)]
pub struct SessionMemory {
    failed: DashMap<i64, FailedRequest>,
    ongoing: DashMap<i64, ()>,
    last_action: DashMap<i64, Instant>,
    expansions: DashMap<i64, String>,
    button_messages: DashMap<i64, i64>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    // -- failed requests ---------------------------------------------------

    pub fn store_failed(&self, chat_id: i64, request: FailedRequest) {
        self.failed.insert(chat_id, request);
    }

    pub fn failed(&self, chat_id: i64) -> Option<FailedRequest> {
        self.failed.get(&chat_id).map(|r| r.clone())
    }

    /// Forget the failed request and its in-flight flag.
    pub fn clear_failed(&self, chat_id: i64) {
        self.failed.remove(&chat_id);
        self.ongoing.remove(&chat_id);
    }

    /// Check every retry precondition and claim the request.
    ///
    /// Checks run in order: stored, owner, cooldown, manual cap, in flight.
    /// The cooldown clock is reset as soon as the owner presses, even when a
    /// later check refuses.
    pub fn begin_retry(
        &self,
        chat_id: i64,
        user_id: i64,
        now: Instant,
        cooldown: Duration,
        max_manual: u32,
    ) -> RetryDecision {
        let Some(mut entry) = self.failed.get_mut(&chat_id) else {
            return RetryDecision::NotFound;
        };
        if entry.user_id != user_id {
            return RetryDecision::NotOwner;
        }

        if let Some(last) = self.last_action.get(&user_id).map(|t| *t) {
            if now.saturating_duration_since(last) < cooldown {
                return RetryDecision::Cooldown;
            }
        }
        self.last_action.insert(user_id, now);

        if entry.attempts_manual >= max_manual {
            return RetryDecision::Exhausted;
        }
        if self.ongoing.contains_key(&chat_id) {
            return RetryDecision::InFlight;
        }

        self.ongoing.insert(chat_id, ());
        entry.attempts_manual += 1;
        entry.last_attempt = Some(now);
        RetryDecision::Proceed(entry.clone())
    }

    /// Count one automatic attempt.
    pub fn record_auto_attempt(&self, chat_id: i64) {
        if let Some(mut entry) = self.failed.get_mut(&chat_id) {
            entry.attempts_auto += 1;
        }
    }

    /// A retry round failed: release the flag, keep the request.
    pub fn finish_failed_retry(&self, chat_id: i64, now: Instant) -> Option<FailedRequest> {
        self.ongoing.remove(&chat_id);
        self.failed.get_mut(&chat_id).map(|mut entry| {
            entry.last_attempt = Some(now);
            entry.clone()
        })
    }

    // -- ongoing flags -----------------------------------------------------

    pub fn is_ongoing(&self, chat_id: i64) -> bool {
        self.ongoing.contains_key(&chat_id)
    }

    // -- expansions --------------------------------------------------------

    /// Remember the text the "full answer" button will expand.
    pub fn set_expansion(&self, chat_id: i64, text: impl Into<String>) {
        self.expansions.insert(chat_id, text.into());
    }

    pub fn expansion(&self, chat_id: i64) -> Option<String> {
        self.expansions.get(&chat_id).map(|t| t.clone())
    }

    // -- button messages ---------------------------------------------------

    pub fn set_button_message(&self, chat_id: i64, message_id: i64) {
        self.button_messages.insert(chat_id, message_id);
    }

    /// Take the id of the last message carrying an expand button.
    pub fn take_button_message(&self, chat_id: i64) -> Option<i64> {
        self.button_messages.remove(&chat_id).map(|(_, id)| id)
    }
}
