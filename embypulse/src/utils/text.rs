//! Text helpers for message bodies.

/// Overviews longer than this are cut.
pub const OVERVIEW_LIMIT: usize = 150;

/// Characters kept from an overview that exceeds [`OVERVIEW_LIMIT`].
pub const OVERVIEW_KEEP: usize = 145;

/// Cut `s` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Shorten an item overview for display.
pub fn truncate_overview(overview: &str) -> String {
    let trimmed = overview.trim();
    if trimmed.chars().count() > OVERVIEW_LIMIT {
        format!("{}...", truncate_chars(trimmed, OVERVIEW_KEEP).trim_end())
    } else {
        trimmed.to_string()
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape_html`], plus the apostrophe entity.
pub fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
