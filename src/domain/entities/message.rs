use chrono::{DateTime, Utc};

/// Kind of inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Command,
    Callback,
}

/// Message content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Text(String),
    Command { name: String, args: Vec<String> },
    /// Identifier of a pressed button
    CallbackData(String),
}

impl Content {
    pub fn is_command(&self) -> bool {
        matches!(self, Content::Command { .. })
    }
}

/// Author of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sender {
    pub id: String,
    pub display_name: Option<String>,
    pub is_bot: bool,
}

impl Sender {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            is_bot: false,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// An inbound chat message
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender: Option<Sender>,
    pub content: Content,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub is_group: bool,
}

impl Message {
    pub fn new(chat_id: impl Into<String>, content: Content) -> Self {
        let message_type = match &content {
            Content::Command { .. } => MessageType::Command,
            Content::CallbackData(_) => MessageType::Callback,
            Content::Text(_) => MessageType::Text,
        };
        let chat_id = chat_id.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            is_group: chat_id.ends_with("@g.us"),
            chat_id,
            sender: None,
            content,
            message_type,
            timestamp: Utc::now(),
        }
    }

    pub fn from_text(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(chat_id, Content::Text(text.into()))
    }

    pub fn from_command(chat_id: impl Into<String>, name: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(chat_id, Content::Command { name: name.into(), args })
    }

    pub fn from_button(chat_id: impl Into<String>, button_id: impl Into<String>) -> Self {
        Self::new(chat_id, Content::CallbackData(button_id.into()))
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Command name and arguments, if this message is a command
    pub fn command(&self) -> Option<(&str, &[String])> {
        match &self.content {
            Content::Command { name, args } => Some((name.as_str(), args.as_slice())),
            _ => None,
        }
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender.as_ref().map(|s| s.id.as_str())
    }
}
