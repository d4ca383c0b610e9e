//! Keyboards and callback payloads.

use std::fmt;
use std::str::FromStr;

use super::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, ReplyKeyboardMarkup};

pub const BTN_BROADCAST: &str = "📢 Barchaga xabar yuborish";
pub const BTN_PM: &str = "📨 Userga xabar yuborish";
pub const BTN_TOP: &str = "🏆 Faol foydalanuvchilar";
pub const BTN_STATS: &str = "📊 Statistika";
pub const BTN_REMOVE_ADMIN: &str = "➖ Admin o'chirish";
pub const BTN_ADD_ADMIN: &str = "➕ Admin qo'shish";
pub const BTN_USERS: &str = "📄 Userlar ro'yxati";
pub const BTN_MESSAGES: &str = "👀 Messages";

/// Inline button actions, encoded as `<action>:<chat_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Retry(i64),
    Report(i64),
    Expand(i64),
    ResendPhoto(i64),
}

impl CallbackAction {
    pub fn chat_id(&self) -> i64 {
        match *self {
            Self::Retry(id) | Self::Report(id) | Self::Expand(id) | Self::ResendPhoto(id) => id,
        }
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry(id) => write!(f, "retry:{}", id),
            Self::Report(id) => write!(f, "report:{}", id),
            Self::Expand(id) => write!(f, "expand:{}", id),
            Self::ResendPhoto(id) => write!(f, "resend_photo:{}", id),
        }
    }
}

impl FromStr for CallbackAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (action, id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed callback data: {:?}", s))?;
        let id: i64 = id
            .trim()
            .parse()
            .map_err(|_| format!("bad chat id in callback data: {:?}", s))?;
        match action {
            "retry" => Ok(Self::Retry(id)),
            "report" => Ok(Self::Report(id)),
            "expand" => Ok(Self::Expand(id)),
            "resend_photo" => Ok(Self::ResendPhoto(id)),
            other => Err(format!("unknown callback action: {:?}", other)),
        }
    }
}

fn button(text: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton {
        text: text.into(),
        callback_data: action.to_string(),
    }
}

/// Persistent admin panel.
pub fn admin_keyboard() -> ReplyKeyboardMarkup {
    let row = |a: &str, b: &str| {
        vec![
            KeyboardButton { text: a.to_string() },
            KeyboardButton { text: b.to_string() },
        ]
    };
    ReplyKeyboardMarkup {
        keyboard: vec![
            row(BTN_BROADCAST, BTN_PM),
            row(BTN_TOP, BTN_STATS),
            row(BTN_REMOVE_ADMIN, BTN_ADD_ADMIN),
            row(BTN_USERS, BTN_MESSAGES),
        ],
        resize_keyboard: true,
        one_time_keyboard: false,
    }
}

/// Retry and report buttons under an error message.
pub fn retry_keyboard(chat_id: i64, attempts: u32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![button(format!("↻ Qayta so'rash ({})", attempts), CallbackAction::Retry(chat_id))],
            vec![button("📨 Adminga xabar", CallbackAction::Report(chat_id))],
        ],
    }
}

pub fn expand_keyboard(chat_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![button("📝 To'liq javob", CallbackAction::Expand(chat_id))]],
    }
}

/// Offered when no text was found in a photo.
pub fn resend_photo_keyboard(chat_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: vec![
            vec![button("🔁 Rasmni qayta yuborish", CallbackAction::ResendPhoto(chat_id))],
            vec![button("📨 Adminga xabar", CallbackAction::Report(chat_id))],
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_round_trip() {
        for action in [
            CallbackAction::Retry(-100123),
            CallbackAction::Report(5),
            CallbackAction::Expand(6),
            CallbackAction::ResendPhoto(7),
        ] {
            assert_eq!(action.to_string().parse::<CallbackAction>(), Ok(action));
        }
    }

    #[test]
    fn test_callback_rejects_garbage() {
        assert!("retry".parse::<CallbackAction>().is_err());
        assert!("retry:abc".parse::<CallbackAction>().is_err());
        assert!("delete:1".parse::<CallbackAction>().is_err());
    }

    #[test]
    fn test_keyboards() {
        let admin = admin_keyboard();
        assert_eq!(admin.keyboard.iter().map(Vec::len).sum::<usize>(), 8);
        assert!(admin.resize_keyboard);

        let retry = retry_keyboard(9, 2);
        assert_eq!(retry.inline_keyboard[0][0].text, "↻ Qayta so'rash (2)");
        assert_eq!(retry.inline_keyboard[1][0].callback_data, "report:9");

        assert_eq!(expand_keyboard(3).inline_keyboard[0][0].callback_data, "expand:3");
        assert_eq!(resend_photo_keyboard(4).inline_keyboard[0][0].callback_data, "resend_photo:4");
    }
}
