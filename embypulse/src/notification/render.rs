//! Channel-specific rendering of a [`NotificationUnit`].
//!
//! Rendering is pure: the same unit and style always produce the same message.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::unit::NotificationUnit;
use crate::utils::text::{escape_html, truncate_chars, truncate_overview, unescape_html};

/// Telegram `sendMessage` text limit (characters).
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Telegram photo caption limit (characters).
pub const TELEGRAM_CAPTION_LIMIT: usize = 1024;

const SEPARATOR: &str = "━━━━━━━━━━━━━━";

const DETAILS_LABEL: &str = "View details";

static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<b>(.*?)</b>").unwrap());
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<a href="([^"]*)">(.*?)</a>"#).unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStyle {
    /// HTML captions with an inline button.
    RichClient,
    /// Article cards and markdown text.
    EnterpriseIm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionButton {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Rich {
        text: String,
        button: Option<ActionButton>,
    },
    Card {
        title: String,
        description: String,
        link: Option<String>,
    },
    Markdown {
        content: String,
    },
}

/// A text-only body plus an optional body sent alongside the poster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMessage {
    pub text: MessageBody,
    pub media: Option<MessageBody>,
}

pub fn render(unit: &NotificationUnit, style: RenderStyle) -> ChannelMessage {
    match style {
        RenderStyle::RichClient => render_rich(unit),
        RenderStyle::EnterpriseIm => render_enterprise(unit),
    }
}

/// Telegram HTML body.
pub fn rich_text(unit: &NotificationUnit) -> String {
    let mut out: Vec<String> = Vec::new();

    if !unit.headline.is_empty() {
        out.push(format!("<b>{}</b>", escape_html(&unit.headline)));
    }
    if !unit.title.is_empty() {
        out.push(format!("<b>{}</b>", escape_html(&unit.display_title())));
    }
    if let Some(subtitle) = &unit.subtitle {
        out.push(format!("<i>{}</i>", escape_html(subtitle)));
    }

    let mut details: Vec<String> = Vec::new();
    if let Some(rating) = unit.rating.filter(|r| *r > 0.0) {
        details.push(format!("⭐ Rating: {rating:.1}/10"));
    }
    for field in &unit.fields {
        details.push(format!(
            "{}: {}",
            escape_html(&field.label),
            escape_html(&field.value)
        ));
    }
    for line in &unit.lines {
        details.push(escape_html(line));
    }
    if let Some(overview) = unit.overview.as_deref().filter(|o| !o.trim().is_empty()) {
        details.push(format!("📝 {}", escape_html(&truncate_overview(overview))));
    }

    if !details.is_empty() {
        if !out.is_empty() && unit.title.is_empty() {
            // Replies go straight from headline to content.
            out.push(String::new());
        } else if !out.is_empty() {
            out.push(SEPARATOR.to_string());
        }
        out.extend(details);
    }

    out.join("\n")
}

fn cap(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "…";
    let cut = truncate_chars(text, limit - suffix.chars().count());
    // Don't leave a dangling partial tag behind.
    let cut = match (cut.rfind('<'), cut.rfind('>')) {
        (Some(open), Some(close)) if open > close => &cut[..open],
        (Some(open), None) => &cut[..open],
        _ => cut,
    };
    // Nor half an entity such as `&am`.
    let cut = match cut.rfind('&') {
        Some(amp) if !cut[amp..].contains(';') => &cut[..amp],
        _ => cut,
    };
    format!("{cut}{suffix}")
}

fn render_rich(unit: &NotificationUnit) -> ChannelMessage {
    let text = rich_text(unit);
    let button = unit.deep_link.as_ref().map(|url| ActionButton {
        text: DETAILS_LABEL.to_string(),
        url: url.clone(),
    });

    let media = unit.poster.as_ref().map(|_| MessageBody::Rich {
        text: cap(&text, TELEGRAM_CAPTION_LIMIT),
        button: button.clone(),
    });

    ChannelMessage {
        text: MessageBody::Rich {
            text: cap(&text, TELEGRAM_MESSAGE_LIMIT),
            button,
        },
        media,
    }
}

fn render_enterprise(unit: &NotificationUnit) -> ChannelMessage {
    let rich = rich_text(unit);

    let mut content = html_to_markdown(&rich);
    if let Some(link) = &unit.deep_link {
        content.push_str(&format!("\n[{DETAILS_LABEL}]({link})"));
    }

    let title_line = unit.display_title();
    let card_title = if unit.title.is_empty() {
        unit.headline.clone()
    } else {
        title_line.clone()
    };
    let description = strip_tags(&rich)
        .lines()
        .filter(|line| !is_separator(line))
        .filter(|line| unit.title.is_empty() || *line != title_line)
        .filter(|line| !(unit.title.is_empty() && *line == unit.headline))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    ChannelMessage {
        text: MessageBody::Markdown { content },
        media: unit.poster.as_ref().map(|_| MessageBody::Card {
            title: card_title,
            description,
            link: unit.deep_link.clone(),
        }),
    }
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| matches!(c, '━' | '─' | '-' | '='))
}

/// Convert the Telegram HTML subset to WeCom markdown.
pub fn html_to_markdown(html: &str) -> String {
    let text = BOLD_RE.replace_all(html, "**$1**");
    let text = LINK_RE.replace_all(&text, "[$2]($1)");
    let text = TAG_RE.replace_all(&text, "");
    unescape_html(&text)
}

/// Remove all tags and decode entities.
pub fn strip_tags(html: &str) -> String {
    unescape_html(&TAG_RE.replace_all(html, ""))
}
