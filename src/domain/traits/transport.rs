use async_trait::async_trait;
use crate::application::errors::TransportError;

/// Transport trait - abstraction for the messaging connection plugins talk through
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a text message to a chat, returning the transport's message id
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, TransportError>;

    /// Send a message with inline buttons
    async fn send_with_keyboard(&self, chat_id: &str, text: &str, buttons: Vec<Vec<KeyboardButton>>) -> Result<String, TransportError>;

    /// Acknowledge a button press
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), TransportError>;

    /// Identity of the connected account
    fn info(&self) -> TransportInfo;
}

/// Button for inline keyboards
#[derive(Debug, Clone)]
pub struct KeyboardButton {
    pub text: String,
    pub callback_data: Option<String>,
}

impl KeyboardButton {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
        }
    }

    pub fn with_callback(mut self, data: impl Into<String>) -> Self {
        self.callback_data = Some(data.into());
        self
    }
}

/// Connected account information
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub id: String,
    pub name: String,
    pub platform: String,
}
