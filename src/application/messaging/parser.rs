//! Message parser - Parses raw text into structured messages

use crate::domain::entities::{Content, Message, Sender};

/// Text prefix marking a button press in line-based transports
pub const BUTTON_PREFIX: &str = "#button:";

/// Parses incoming text into Message objects
pub struct MessageParser {
    command_prefix: String,
}

impl MessageParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            command_prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.command_prefix
    }

    /// Parse a text message
    pub fn parse(&self, chat_id: impl Into<String>, text: impl Into<String>, sender: Option<Sender>) -> Message {
        let text = text.into();
        let chat_id = chat_id.into();

        let message = if let Some(button_id) = text.strip_prefix(BUTTON_PREFIX) {
            Message::from_button(chat_id, button_id.trim())
        } else if let Some(rest) = self.strip_command_prefix(&text) {
            let mut parts = rest.split_whitespace();
            let name = parts.next().unwrap_or_default().to_string();
            let args = parts.map(str::to_string).collect();
            Message::new(chat_id, Content::Command { name, args })
        } else {
            Message::from_text(chat_id, text)
        };

        match sender {
            Some(s) => message.with_sender(s),
            None => message,
        }
    }

    fn strip_command_prefix<'a>(&self, text: &'a str) -> Option<&'a str> {
        let rest = text.strip_prefix('/')
            .or_else(|| text.strip_prefix(self.command_prefix.as_str()))?;
        // A lone prefix is plain text
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new("!")
    }
}
