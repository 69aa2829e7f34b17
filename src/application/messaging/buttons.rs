//! Button handler table - Routes button responses to the plugin that owns them

use std::collections::HashMap;
use std::sync::RwLock;
use crate::plugins::trait_def::EventHandler;

/// Separator between a handler id and the payload of a button
const PAYLOAD_SEPARATOR: char = ':';

#[derive(Clone)]
struct ButtonEntry {
    plugin: String,
    handler: EventHandler,
}

/// Button identifier → handler, tagged with the owning plugin
#[derive(Default)]
pub struct ButtonRegistry {
    handlers: RwLock<HashMap<String, ButtonEntry>>,
}

impl ButtonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin's handlers. An id already owned by another plugin is
    /// taken over by the newcomer.
    pub fn register(&self, plugin: &str, handlers: HashMap<String, EventHandler>) {
        let Ok(mut table) = self.handlers.write() else { return };
        for (id, handler) in handlers {
            if let Some(previous) = table.get(&id).filter(|e| e.plugin != plugin) {
                tracing::warn!("Button handler '{}' moves from {} to {}", id, previous.plugin, plugin);
            }
            table.insert(id, ButtonEntry { plugin: plugin.to_string(), handler });
        }
    }

    pub fn unregister_plugin(&self, plugin: &str) -> usize {
        let Ok(mut table) = self.handlers.write() else { return 0 };
        let before = table.len();
        table.retain(|_, e| e.plugin != plugin);
        before - table.len()
    }

    pub fn clear(&self) {
        if let Ok(mut table) = self.handlers.write() {
            table.clear();
        }
    }

    /// Resolve a pressed button. Exact ids win; otherwise `<id>:<payload>`
    /// resolves to the handler registered as `<id>`.
    pub fn resolve(&self, button_id: &str) -> Option<(String, EventHandler)> {
        let table = self.handlers.read().ok()?;
        let entry = table.get(button_id).or_else(|| {
            button_id
                .split_once(PAYLOAD_SEPARATOR)
                .and_then(|(prefix, _)| table.get(prefix))
        })?;
        Some((entry.plugin.clone(), entry.handler.clone()))
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
