//! Multi-step admin dialogues.
//!
//! A dialogue is keyed by chat and user and holds the input that user's next
//! text message in that chat will be taken as. While one is open, that text
//! never reaches the assistant. Other members of a group chat are unaffected.

use dashmap::DashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialogue {
    BroadcastText,
    PmTarget,
    PmText { target: i64 },
    AddAdmin,
    RemoveAdmin,
}

impl Dialogue {
    /// Dialogues that change the admin list.
    pub fn manages_admins(self) -> bool {
        matches!(self, Self::AddAdmin | Self::RemoveAdmin)
    }
}

#[derive(Debug, Default)]
pub struct Dialogues {
    states: DashMap<(i64, i64), Dialogue>,
}

impl Dialogues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, chat_id: i64, user_id: i64, dialogue: Dialogue) {
        self.states.insert((chat_id, user_id), dialogue);
    }

    pub fn current(&self, chat_id: i64, user_id: i64) -> Option<Dialogue> {
        self.states.get(&(chat_id, user_id)).map(|d| *d)
    }

    /// Close the dialogue; returns whether one was open.
    pub fn finish(&self, chat_id: i64, user_id: i64) -> bool {
        self.states.remove(&(chat_id, user_id)).is_some()
    }
}
