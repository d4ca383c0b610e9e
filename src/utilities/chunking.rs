//! Char-safe text splitting.

/// Split `text` into pieces of at most `size` chars.
pub fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Split a reply into Telegram-sized messages.
///
/// Each piece holds at most `max_len` chars. When a window has a newline in
/// its second half the piece ends there, so paragraphs are not cut in the
/// middle; the newline itself is dropped.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_len).min(chars.len());
        if end == chars.len() {
            parts.push(chars[start..end].iter().collect());
            break;
        }

        let window = &chars[start..end];
        let half = window.len() / 2;
        match window.iter().rposition(|c| *c == '\n').filter(|&pos| pos >= half) {
            Some(pos) => {
                parts.push(window[..pos].iter().collect());
                start += pos + 1;
            }
            None => {
                parts.push(window.iter().collect());
                start = end;
            }
        }
    }
    parts.retain(|p: &String| !p.is_empty());
    parts
}
