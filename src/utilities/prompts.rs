//! Prompt texts and message assembly for the assistant.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use once_cell::sync::Lazy;

use crate::llms::base_llm::ChatMessage;

/// System prompt used when `SYSTEM_PROMPT` is not set.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Siz o'zbek tilida so'zlashuvchi, foydali va xushmuomala AI yordamchisiz. \
Savollarga aniq, ijodiy va professional javob bering. Foydalanuvchi qaysi tilda yozsa, \
o'sha tilda javob bering. Tarjima, texnik yordam, hujjat va kodlarni tahlil qilishda \
yordam bera olasiz. Bilmagan narsangizni o'ylab topmang.";

/// Prefix of every normal question: short answer, marker when nothing more to add.
pub const CONCISE_INSTRUCTION: &str = "Qisqa va aniq javob bering (ko'pi bilan 5-7 gap). \
Sarlavha belgilaridan (#) foydalanmang. Agar javob to'liq bo'lsa va batafsil \
tushuntirishga hojat bo'lmasa (masalan, salomlashish yoki oddiy savol), javob oxiriga \
[NO_BUTTON] belgisini qo'shing.";

/// Prefix used by the "full answer" button.
pub const EXPAND_INSTRUCTION: &str = "Batafsil, kengaytirilgan va to'liq tushuntirib javob bering:";

/// Prefix of a question read from an image.
pub const PHOTO_INSTRUCTION: &str =
    "Sizga rasmdan olingan matn bo'yicha professional tushuntirish va yechim kerak.";

/// Tashkent is UTC+5 all year.
pub const TASHKENT_OFFSET_SECS: i32 = 5 * 3600;

/// Answer style picked from keywords in the question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRole {
    Technical,
    Commercial,
    Supportive,
}

impl ResponseRole {
    const TECHNICAL: &'static [&'static str] =
        &["kod", "error", "xato", "python", "javascript", "ai", "api", "server", "sql"];
    const COMMERCIAL: &'static [&'static str] =
        &["narx", "sotish", "savdo", "mijoz", "reklama", "marketing"];
    const SUPPORTIVE: &'static [&'static str] =
        &["ruhiy", "psixolog", "depress", "stress", "maslahat"];

    /// First matching style; technical wins over commercial over supportive.
    pub fn detect(text: &str) -> Option<Self> {
        let t = text.to_lowercase();
        let any = |keys: &[&str]| keys.iter().any(|k| t.contains(k));
        if any(Self::TECHNICAL) {
            Some(Self::Technical)
        } else if any(Self::COMMERCIAL) {
            Some(Self::Commercial)
        } else if any(Self::SUPPORTIVE) {
            Some(Self::Supportive)
        } else {
            None
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Self::Technical => "Javobni texnik uslubda, aniq kod misollari yoki buyruqlar bilan taqdim et.",
            Self::Commercial => "Javobni tijoriy, qisqa va savdoga yo'naltirilgan tilda bering.",
            Self::Supportive => "Javobni yumshoq, empatik va qo'llab-quvvatlovchi uslubda bering.",
        }
    }
}

static TASHKENT: Lazy<FixedOffset> = Lazy::new(|| FixedOffset::east_opt(TASHKENT_OFFSET_SECS).unwrap());

pub fn tashkent_offset() -> FixedOffset {
    *TASHKENT
}

/// Current calendar date in Tashkent.
pub fn tashkent_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tashkent_offset()).date_naive()
}

fn weekday_uz(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Dushanba",
        Weekday::Tue => "Seshanba",
        Weekday::Wed => "Chorshanba",
        Weekday::Thu => "Payshanba",
        Weekday::Fri => "Juma",
        Weekday::Sat => "Shanba",
        Weekday::Sun => "Yakshanba",
    }
}

/// System line telling the model today's date in Tashkent.
pub fn date_context(now: DateTime<Utc>) -> String {
    let local = now.with_timezone(&tashkent_offset());
    format!(
        "Bugungi sana (Toshkent): {}; Haftaning kuni: {}.",
        local.format("%Y-%m-%d"),
        weekday_uz(local.weekday())
    )
}

pub fn concise_prompt(text: &str) -> String {
    format!("{}\n\n{}", CONCISE_INSTRUCTION, text)
}

pub fn expand_prompt(text: &str) -> String {
    format!("{}\n\n{}", EXPAND_INSTRUCTION, text)
}

/// Prompt for OCR'd text, with the photo caption as a note when present.
pub fn photo_prompt(ocr_text: &str, caption: Option<&str>) -> String {
    let mut prompt = format!("{}\nMatn: {}", PHOTO_INSTRUCTION, ocr_text);
    if let Some(caption) = caption.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\n\nFoydalanuvchi izohi: ");
        prompt.push_str(caption);
    }
    prompt
}

/// Assemble the messages of one request.
///
/// Order: system prompt, date line, history, style instruction (if
/// `question` matches one), the prompt itself. The style is detected on the
/// user's own words so the instruction prefixes cannot trigger it.
pub fn build_messages(
    system_prompt: &str,
    history: &[ChatMessage],
    question: &str,
    prompt: &str,
    now: DateTime<Utc>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 4);
    messages.push(ChatMessage::system(system_prompt));
    messages.push(ChatMessage::system(date_context(now)));
    messages.extend(history.iter().cloned());
    if let Some(role) = ResponseRole::detect(question) {
        messages.push(ChatMessage::system(format!("ROLE_INSTRUCTION: {}", role.instruction())));
    }
    messages.push(ChatMessage::user(prompt));
    messages
}

/// Keyword → canned answer, checked before any API call.
pub const STATIC_KNOWLEDGE_BASE: &[(&str, &str)] = &[
    (
        "seni kim yaratgan",
        "🤖 Meni o'zbek tilidagi foydalanuvchilarga yordam berish uchun ishlab chiqilgan AI yordamchiman. [NO_BUTTON]",
    ),
    (
        "isming nima",
        "😊 Men sizning AI yordamchingizman. Savolingizni yozing! [NO_BUTTON]",
    ),
    (
        "nima qila olasan",
        "✅ Savollarga javob beraman, tarjima qilaman, texnik yordam beraman va rasmdagi matnni o'qib tushuntiraman. [NO_BUTTON]",
    ),
    (
        "rahmat",
        "😊 Arzimaydi! Yana savollar bo'lsa, bemalol yozing. [NO_BUTTON]",
    ),
];

pub fn static_answer(text: &str) -> Option<&'static str> {
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    STATIC_KNOWLEDGE_BASE
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, answer)| *answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::base_llm::Role;
    use chrono::TimeZone;

    #[test]
    fn test_role_detection_priority() {
        assert_eq!(ResponseRole::detect("Python kodda xato bor"), Some(ResponseRole::Technical));
        assert_eq!(ResponseRole::detect("Mahsulot narxi qancha?"), Some(ResponseRole::Commercial));
        assert_eq!(ResponseRole::detect("Stress bilan qanday kurashaman"), Some(ResponseRole::Supportive));
        assert_eq!(ResponseRole::detect("Bugun ob-havo qanday"), None);
    }

    #[test]
    fn test_date_context_crosses_midnight() {
        // 20:30 UTC on a Sunday is 01:30 Monday in Tashkent.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 20, 30, 0).unwrap();
        assert_eq!(
            date_context(now),
            "Bugungi sana (Toshkent): 2024-03-11; Haftaning kuni: Dushanba."
        );
    }

    #[test]
    fn test_build_messages_order() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let history = vec![ChatMessage::user("oldingi"), ChatMessage::assistant("javob")];
        let msgs = build_messages("SYS", &history, "SQL so'rov yoz", "SQL so'rov yoz", now);

        assert_eq!(msgs.len(), 6);
        assert_eq!(msgs[0].content, "SYS");
        assert!(msgs[1].content.starts_with("Bugungi sana"));
        assert_eq!(msgs[2].content, "oldingi");
        assert!(msgs[4].content.starts_with("ROLE_INSTRUCTION: "));
        assert_eq!(msgs[5].role, Role::User);
        assert_eq!(msgs[5].content, "SQL so'rov yoz");

        let plain = build_messages("SYS", &[], "salom", &concise_prompt("salom"), now);
        assert_eq!(plain.len(), 3);
        assert!(plain[2].content.starts_with(CONCISE_INSTRUCTION));
    }

    #[test]
    fn test_tashkent_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 19, 0, 0).unwrap();
        assert_eq!(tashkent_today(now), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    }

    #[test]
    fn test_static_answer() {
        assert!(static_answer("Rahmat katta!").is_some());
        assert!(static_answer("kvant fizikasi").is_none());
        assert!(static_answer("").is_none());
    }

    #[test]
    fn test_photo_prompt_caption() {
        let p = photo_prompt("2+2=?", Some("  yeching "));
        assert!(p.contains("Matn: 2+2=?"));
        assert!(p.ends_with("Foydalanuvchi izohi: yeching"));
        assert!(!photo_prompt("x", Some("  ")).contains("izohi"));
    }
}
