//! Console adapter for development/testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use crate::application::errors::TransportError;
use crate::domain::traits::{KeyboardButton, Transport, TransportInfo};

/// Console transport: outbound messages go to stdout, inbound lines come from stdin
pub struct ConsoleAdapter {
    info: TransportInfo,
    next_id: AtomicU64,
    stdin: Mutex<Lines<BufReader<Stdin>>>,
}

impl ConsoleAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            info: TransportInfo {
                id: "console".to_string(),
                name: name.into(),
                platform: "console".to_string(),
            },
            next_id: AtomicU64::new(1),
            stdin: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    /// Print a prompt and wait for the next line. `None` on end of input.
    pub async fn read_line(&self, prompt: &str) -> Option<String> {
        let mut stdout = tokio::io::stdout();
        // A prompt that fails to print does not stop input
        let _ = stdout.write_all(prompt.as_bytes()).await;
        let _ = stdout.flush().await;

        let mut lines = self.stdin.lock().await;
        match lines.next_line().await {
            Ok(Some(line)) => Some(line.trim().to_string()),
            Ok(None) => None,
            Err(e) => {
                tracing::error!("Failed to read console input: {}", e);
                None
            }
        }
    }

    fn message_id(&self) -> String {
        format!("console-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new("plugin-host")
    }
}

#[async_trait]
impl Transport for ConsoleAdapter {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, TransportError> {
        println!("[BOT -> {}] {}", chat_id, text);
        Ok(self.message_id())
    }

    async fn send_with_keyboard(&self, chat_id: &str, text: &str, buttons: Vec<Vec<KeyboardButton>>) -> Result<String, TransportError> {
        println!("[BOT -> {}] {}", chat_id, text);
        for row in buttons {
            let row_text: Vec<String> = row.iter()
                .map(|b| match &b.callback_data {
                    Some(data) => format!("{} (#button:{})", b.text, data),
                    None => b.text.clone(),
                })
                .collect();
            println!("  [Buttons] {}", row_text.join(" | "));
        }
        Ok(self.message_id())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<(), TransportError> {
        if let Some(text) = text {
            println!("[BOT callback {}] {}", callback_id, text);
        }
        Ok(())
    }

    fn info(&self) -> TransportInfo {
        self.info.clone()
    }
}
