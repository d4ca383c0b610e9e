use std::collections::VecDeque;

use dashmap::DashMap;

use crate::llms::base_llm::{ChatMessage, Role};

/// Messages kept per chat when no cap is given.
pub const DEFAULT_HISTORY_MAX: usize = 100;

/// Bounded per-chat message history.
#[derive(Debug)]
pub struct ChatHistory {
    chats: DashMap<i64, VecDeque<ChatMessage>>,
    max_per_chat: usize,
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_MAX)
    }
}

impl ChatHistory {
    pub fn new(max_per_chat: usize) -> Self {
        Self {
            chats: DashMap::new(),
            max_per_chat: max_per_chat.max(1),
        }
    }

    /// Append a message; the oldest ones are dropped past the cap.
    /// Empty contents are ignored.
    pub fn push(&self, chat_id: i64, role: Role, content: &str) {
        if content.trim().is_empty() {
            return;
        }
        let mut entry = self.chats.entry(chat_id).or_default();
        entry.push_back(ChatMessage::new(role, content));
        while entry.len() > self.max_per_chat {
            entry.pop_front();
        }
    }

    /// Record one successful exchange.
    pub fn push_exchange(&self, chat_id: i64, user_text: &str, reply: &str) {
        self.push(chat_id, Role::User, user_text);
        self.push(chat_id, Role::Assistant, reply);
    }

    /// The last `limit` messages, oldest first.
    pub fn recent(&self, chat_id: i64, limit: usize) -> Vec<ChatMessage> {
        self.chats
            .get(&chat_id)
            .map(|msgs| {
                let skip = msgs.len().saturating_sub(limit);
                msgs.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, chat_id: i64) -> usize {
        self.chats.get(&chat_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn clear(&self, chat_id: i64) {
        self.chats.remove(&chat_id);
    }
}
