//! User-facing texts. The bot speaks Uzbek.

use rand::seq::SliceRandom;

pub const START_GREETING: &str = "👋 <b>Keling tanishib olaylik!</b>\n\n\
🤖 Men sizning AI yordamchimman. Quyidagilarni qila olaman:\n\
➤ Savollaringizga javob beraman\n\
➤ Til va tarjima\n\
➤ Texnik yordam\n\
➤ Ijtimoiy va madaniy masalalar\n\
➤ Hujjatlar va yozuvlar\n\
➤ Har qanday mavzuda izoh, yechim yoki maslahat bera olaman\n\
➤ Rasm ko'rinishida savol yuborsangiz — matnni o'qib, yechimini tushuntirib beraman\n\n\
✍️ Savolingizni yozing men sizga javob berishga harakat qilaman.";

pub const ADMIN_GREETING: &str = "👋 <b>Admin panelga xush kelibsiz!</b>";
pub const HISTORY_CLEARED: &str = "💬 Suhbat tarixi tozalandi!";
pub const CANCELLED: &str = "❌ Bekor qilindi.";

pub const TOO_LONG: &str = "📏 Matningiz juda uzun. 5000 belgidan kamroq yozing.";
pub const LOADING_TEXT: &str = "🧠 Savolingiz tahlil qilinmoqda...";
pub const LOADING_PHOTO: &str = "🧠 Rasm tahlil qilinmoqda...";
pub const NO_TEXT_IN_PHOTO: &str = "❗ Rasmda aniq matn topilmadi.";
pub const PHOTO_FAILED: &str = "❌ Rasmni tahlil qilishda xatolik.";
pub const SERVICE_BUSY: &str =
    "🔁 Xizmat band — hozir boshqa so'rovlar ko'p. Iltimos 10-30 soniya ichida qayta urinib ko'ring.";

pub const ERROR_MESSAGES: &[&str] = &[
    "⚙️ Uzr — tizimda kichik nosozlik yuz berdi. Qayta urinib ko'ring yoki /start bilan qayta boshlang.",
    "🔧 Hozir biroz texnik ishlar bor. Savolingizni saqlab qo'ying — tez orada yordam beraman.",
    "🧠 Men hozir biroz bandman — lekin yaqin orada aniq va ijodiy javob beraman.",
];

// Callbacks
pub const BAD_CALLBACK: &str = "Noto'g'ri so'rov.";
pub const RETRY_NOT_FOUND: &str = "⚠️ Qayta yuborish uchun ma'lumot topilmadi.";
pub const RETRY_NOT_OWNER: &str = "Faqat so'rovni yuborgan foydalanuvchi qayta so'rashi mumkin.";
pub const RETRY_EXHAUSTED: &str = "Maksimal urinish tugadi.";
pub const RETRY_IN_FLIGHT: &str = "Jarayon ketmoqda...";
pub const RETRY_PROGRESS: &str = "⏳ Qayta so'ralmoqda... Iltimos kuting.";
pub const RETRY_FAILED: &str = "❌ Javob olinmadi.";
pub const EXPAND_GONE: &str = "⚠️ Matn xotiradan o'chgan.";
pub const EXPAND_PROGRESS: &str = "⏳ To'liq javob tayyorlanmoqda...";
pub const EXPAND_FAILED: &str = "❌ To'liq javob olishda xatolik yuz berdi.";
pub const RESEND_PHOTO: &str = "Iltimos, rasmni yuboring.";
pub const REPORT_SENT: &str = "✅ Xabaringiz adminga yuborildi.";

pub const INACTIVE_GREETING: &str =
    "👋 Salom! Sizni ko'rmaganimizga bir hafta bo'ldi. Yordam kerak bo'lsa, bemalol yozing!";

// Admin panel
pub const ADMIN_ONLY: &str = "❌ Bu buyruq faqat admin uchun.";
pub const SUPERADMIN_ONLY: &str = "❌ Bu amal faqat super-admin uchun.";
pub const BROADCAST_ASK_TEXT: &str = "✍️ Barchaga yuboriladigan xabar matnini kiriting:";
pub const PM_ASK_TARGET: &str = "✍️ Iltimos, foydalanuvchi ID yoki @username ni kiriting:";
pub const PM_ASK_TEXT: &str = "✍️ Endi xabar matnini kiriting:";
pub const PM_BAD_ID: &str = "❌ Noto'g'ri ID format. Qayta urinib ko'ring:";
pub const PM_NOT_FOUND: &str = "❌ Foydalanuvchi topilmadi. Qayta urinib ko'ring. Yoki user ID kiriting..!";
pub const PM_SENT: &str = "📤 Xabar yuborildi ✅";
pub const ADMIN_ASK_ADD: &str = "✍️ Yangi admin ID sini kiriting:";
pub const ADMIN_ASK_REMOVE: &str = "✍️ O'chiriladigan admin ID sini kiriting:";
pub const ADMIN_BAD_ID: &str = "❌ Noto'g'ri ID format.";
pub const USERS_CAPTION: &str = "📄 Foydalanuvchilar ro'yxati";
pub const NO_ACTIVITY: &str = "Hozircha faollik yo'q.";

pub fn random_error_message() -> &'static str {
    ERROR_MESSAGES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(ERROR_MESSAGES[0])
}

pub fn cooldown_notice(secs: u64) -> String {
    format!("Iltimos, {} soniya kuting.", secs)
}

pub fn broadcast_progress(percent: u32) -> String {
    format!("📤 Xabar yuborilmoqda: {}%", percent)
}

pub fn broadcast_summary(sent: usize, failed: usize) -> String {
    format!(
        "✅ {} ta foydalanuvchiga xabar yuborildi.\n❌ {} ta foydalanuvchiga yuborilmadi (bloklagan yoki mavjud emas).",
        sent, failed
    )
}

pub fn admin_pm(text: &str) -> String {
    format!("📨 <b>Admin xabari:</b>\n\n{}", text)
}

pub fn failure_notice(error: &impl std::fmt::Display) -> String {
    format!("❌ Xatolik yuz berdi: {}", error)
}

pub fn admin_added(id: i64) -> String {
    format!("✅ {} admin qilindi", id)
}

pub fn admin_removed(id: i64) -> String {
    format!("✅ {} adminlikdan olindi", id)
}

pub fn not_an_admin(id: i64) -> String {
    format!("⚠️ {} admin emas", id)
}

/// Escape `<`, `>` and `&` for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            other => out.push(other),
        }
    }
    out
}

/// `@username`, or a mention link when the user has none.
pub fn user_link(user_id: i64, username: Option<&str>) -> String {
    match username.filter(|u| !u.is_empty()) {
        Some(name) => format!("@{}", name),
        None => format!("<a href=\"tg://user?id={}\">User {}</a>", user_id, user_id),
    }
}

/// Report of a failed request, sent to every admin.
pub fn report_to_admin(user_id: i64, username: Option<&str>, request: Option<&str>) -> String {
    format!(
        "📨 <b>Foydalanuvchi xabari</b>\n\n👤 {} (<code>{}</code>)\n💬 {}",
        user_link(user_id, username),
        user_id,
        request.map(escape_html).unwrap_or_else(|| "—".to_string())
    )
}
