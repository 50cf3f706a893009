//! Channel-specific JSON bodies for the chat integrations.

use serde_json::json;

/// Builds the request body of one chat service from a rendered title and
/// message.
pub trait WebhookPayloadBuilder: Send + Sync {
    fn build_payload(&self, title: &str, message: &str) -> serde_json::Value;
}

/// Slack incoming webhook with a single markdown section block.
pub struct SlackPayloadBuilder;

impl WebhookPayloadBuilder for SlackPayloadBuilder {
    fn build_payload(&self, title: &str, message: &str) -> serde_json::Value {
        json!({
            "text": title,
            "blocks": [
                {
                    "type": "section",
                    "text": {
                        "type": "mrkdwn",
                        "text": format!("*{title}*\n\n{message}")
                    }
                }
            ]
        })
    }
}

/// Discord webhook. Discord rejects content longer than 2000 characters.
pub struct DiscordPayloadBuilder;

const DISCORD_MAX_CONTENT: usize = 2000;

impl WebhookPayloadBuilder for DiscordPayloadBuilder {
    fn build_payload(&self, title: &str, message: &str) -> serde_json::Value {
        let content = format!("**{title}**\n\n{message}");
        json!({ "content": truncate_chars(&content, DISCORD_MAX_CONTENT) })
    }
}

/// Telegram Bot API `sendMessage` body in HTML parse mode.
pub struct TelegramPayloadBuilder {
    /// Target chat.
    pub chat_id: String,
    /// Whether link previews are disabled.
    pub disable_web_preview: bool,
}

impl TelegramPayloadBuilder {
    fn escape_html(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                c => out.push(c),
            }
        }
        out
    }
}

impl WebhookPayloadBuilder for TelegramPayloadBuilder {
    fn build_payload(&self, title: &str, message: &str) -> serde_json::Value {
        json!({
            "chat_id": self.chat_id,
            "text": format!("<b>{}</b>\n\n{}", Self::escape_html(title), Self::escape_html(message)),
            "parse_mode": "HTML",
            "disable_web_page_preview": self.disable_web_preview,
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max.saturating_sub(1)) {
        Some((idx, _)) if text.chars().count() > max => format!("{}…", &text[..idx]),
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_payload() {
        let payload = SlackPayloadBuilder.build_payload("[FIRING:1] Cpu", "details");
        assert_eq!(payload["text"], "[FIRING:1] Cpu");
        assert_eq!(payload["blocks"][0]["text"]["text"], "*[FIRING:1] Cpu*\n\ndetails");
    }

    #[test]
    fn test_discord_payload_is_truncated() {
        let long = "x".repeat(3000);
        let payload = DiscordPayloadBuilder.build_payload("t", &long);
        let content = payload["content"].as_str().unwrap();
        assert_eq!(content.chars().count(), DISCORD_MAX_CONTENT);
        assert!(content.starts_with("**t**"));
        assert!(content.ends_with('…'));

        let short = DiscordPayloadBuilder.build_payload("t", "m");
        assert_eq!(short["content"], "**t**\n\nm");
    }

    #[test]
    fn test_telegram_payload_escapes_html() {
        let builder = TelegramPayloadBuilder { chat_id: "-100".into(), disable_web_preview: true };
        let payload = builder.build_payload("a < b", "x & y > z");
        assert_eq!(payload["chat_id"], "-100");
        assert_eq!(payload["parse_mode"], "HTML");
        assert_eq!(payload["text"], "<b>a &lt; b</b>\n\nx &amp; y &gt; z");
        assert_eq!(payload["disable_web_page_preview"], true);
    }
}
