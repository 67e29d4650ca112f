//! 消息格式化 - 将 `SinkMessage` 转为各 sink 的请求体
//!
//! Telegram 使用 HTML parse mode，Discord 使用 embed（Markdown），
//! 通用 webhook 直接序列化 `SinkMessage`。

use serde_json::{json, Value};

use super::channel::SinkMessage;
use crate::tracker::Category;

/// Telegram 单条消息上限
pub const TELEGRAM_MAX_CHARS: usize = 4096;
/// Discord embed description 上限
pub const DISCORD_MAX_CHARS: usize = 4096;
/// 标题上限，剩余空间留给正文
pub const TITLE_MAX_CHARS: usize = 256;
/// 站点名、发送者、时间戳上限（同时是 Discord author name 上限）
const FIELD_MAX_CHARS: usize = 256;

const NOTIFICATION_COLOR: u32 = 0xFE0203;
const MESSAGE_COLOR: u32 = 0x5865F2;

fn icon(category: Category) -> &'static str {
    match category {
        Category::Notification => "🔔",
        Category::Message => "📩",
    }
}

/// 转义 Telegram HTML 特殊字符
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// 按字符截断，超出时以省略号结尾
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// 转义后按字符截断，不会切开实体；超出时以省略号结尾
pub fn escape_html_truncated(text: &str, max: usize) -> String {
    let escaped = escape_html(text);
    if escaped.chars().count() <= max {
        return escaped;
    }
    let mut truncated = String::new();
    let mut used = 0;
    for c in text.chars() {
        let piece = escape_html(c.encode_utf8(&mut [0; 4]));
        let len = piece.chars().count();
        if used + len + 1 > max {
            break;
        }
        truncated.push_str(&piece);
        used += len;
    }
    truncated.push('…');
    truncated
}

/// Telegram HTML 正文
pub fn telegram_text(message: &SinkMessage) -> String {
    let mut text = format!(
        "<b>{}</b>\n\n<b>{} New {}</b>\n\n",
        escape_html_truncated(&message.tracker, FIELD_MAX_CHARS),
        icon(message.category),
        message.category.label()
    );

    if message.is_staff {
        text.push_str("⚠️ <b>STAFF MESSAGE</b> ⚠️\n\n");
    }
    if let Some(sender) = &message.sender {
        text.push_str(&format!(
            "👤 {}\n\n",
            escape_html_truncated(sender, FIELD_MAX_CHARS)
        ));
    }
    if !message.title.is_empty() {
        text.push_str(&format!(
            "<b>Title:</b> {}\n\n",
            escape_html_truncated(&message.title, TITLE_MAX_CHARS)
        ));
    }

    let footer = message
        .timestamp
        .as_deref()
        .map(|t| escape_html_truncated(t, FIELD_MAX_CHARS))
        .unwrap_or_default();

    if !message.body.is_empty() {
        // 其他字段都有上限，超长时只截断正文，避免截断 HTML 标签
        let used = text.chars().count() + footer.chars().count() + "<b>Body:</b> \n\n".len();
        let room = TELEGRAM_MAX_CHARS.saturating_sub(used);
        text.push_str(&format!(
            "<b>Body:</b> {}\n\n",
            escape_html_truncated(&message.body, room)
        ));
    }

    text.push_str(&footer);
    text.trim_end().to_string()
}

/// Telegram `sendMessage` 请求体
pub fn telegram_payload(message: &SinkMessage, chat_id: &str, topic_id: Option<&str>) -> Value {
    let mut payload = json!({
        "chat_id": chat_id,
        "text": telegram_text(message),
        "parse_mode": "HTML",
        "disable_web_page_preview": true,
        "reply_markup": {
            "inline_keyboard": [[{"text": format!("Open {}", message.category.label()), "url": message.link}]]
        }
    });
    if let Some(topic) = topic_id.filter(|t| !t.is_empty()) {
        payload["message_thread_id"] = json!(topic);
    }
    payload
}

/// Discord embed description（Markdown）
pub fn discord_description(message: &SinkMessage) -> String {
    let mut text = format!(
        "{} **New {}**\n\n",
        icon(message.category),
        message.category.label()
    );
    if message.is_staff {
        text.push_str("⚠️ **STAFF MESSAGE** ⚠️\n\n");
    }
    if let Some(sender) = &message.sender {
        text.push_str(&format!(
            "👤  {}\n\n",
            truncate_chars(sender, FIELD_MAX_CHARS)
        ));
    }
    if !message.title.is_empty() {
        text.push_str(&format!(
            "**Title:** {}\n\n",
            truncate_chars(&message.title, TITLE_MAX_CHARS)
        ));
    }

    let link = format!("[Open {}]({})", message.category.label(), message.link);
    if !message.body.is_empty() {
        let used = text.chars().count() + link.chars().count() + "**Body:** \n\n".len();
        let room = DISCORD_MAX_CHARS.saturating_sub(used);
        text.push_str(&format!(
            "**Body:** {}\n\n",
            truncate_chars(&message.body, room)
        ));
    }
    text.push_str(&link);
    // 链接异常长时整体截断
    truncate_chars(&text, DISCORD_MAX_CHARS)
}

/// Discord webhook 请求体
pub fn discord_payload(message: &SinkMessage) -> Value {
    let color = match message.category {
        Category::Notification => NOTIFICATION_COLOR,
        Category::Message => MESSAGE_COLOR,
    };
    let mut author = json!({ "name": truncate_chars(&message.tracker, FIELD_MAX_CHARS) });
    if let Some(icon_url) = &message.icon_url {
        author["icon_url"] = json!(icon_url);
    }

    let mut embed = json!({
        "description": discord_description(message),
        "color": color,
        "author": author,
    });
    if let Some(timestamp) = &message.timestamp {
        embed["footer"] = json!({ "text": truncate_chars(timestamp, FIELD_MAX_CHARS) });
    }
    json!({ "embeds": [embed] })
}
