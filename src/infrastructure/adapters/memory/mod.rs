//! In-memory transport that records outbound traffic

use async_trait::async_trait;
use std::sync::Mutex;
use crate::application::errors::TransportError;
use crate::domain::traits::{KeyboardButton, Transport, TransportInfo};

/// A message sent through [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
    pub buttons: Vec<String>,
}

/// Transport that keeps everything it is asked to send.
/// Used when the host runs without a live connection.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<SentMessage>>,
    answered: Mutex<Vec<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn answered_callbacks(&self) -> Vec<String> {
        self.answered.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn push(&self, message: SentMessage) -> Result<String, TransportError> {
        let mut sent = self.sent.lock().map_err(|_| TransportError::Closed)?;
        sent.push(message);
        Ok(format!("mem-{}", sent.len()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, TransportError> {
        self.push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            buttons: Vec::new(),
        })
    }

    async fn send_with_keyboard(&self, chat_id: &str, text: &str, buttons: Vec<Vec<KeyboardButton>>) -> Result<String, TransportError> {
        self.push(SentMessage {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            buttons: buttons.into_iter().flatten().map(|b| b.text).collect(),
        })
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> Result<(), TransportError> {
        self.answered.lock()
            .map_err(|_| TransportError::Closed)?
            .push(callback_id.to_string());
        Ok(())
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            id: "memory".to_string(),
            name: "plugin-host".to_string(),
            platform: "memory".to_string(),
        }
    }
}
