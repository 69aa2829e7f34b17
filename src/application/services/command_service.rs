use std::sync::Arc;
use crate::application::errors::{HostError, PluginError};
use crate::domain::entities::{CommandDescriptor, Content, Event};
use crate::domain::traits::Transport;
use crate::infrastructure::config::Config;
use crate::infrastructure::plugins::registry::PluginRegistry;
use crate::plugins::trait_def::EventHandler;

/// Resolves commands declared by loaded plugins
pub struct CommandService {
    registry: Arc<PluginRegistry>,
}

impl CommandService {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// Every declared command with the plugin that owns it, sorted by name
    pub fn commands(&self) -> Vec<(String, CommandDescriptor)> {
        let mut all: Vec<(String, CommandDescriptor)> = self.registry.list()
            .into_iter()
            .flat_map(|record| {
                let plugin = record.name;
                record.metadata.commands.into_iter().map(move |cmd| (plugin.clone(), cmd))
            })
            .collect();
        all.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        all
    }

    /// Look up a command by name or alias, case-insensitively
    pub fn find(&self, name: &str) -> Option<(String, CommandDescriptor)> {
        self.commands().into_iter().find(|(_, cmd)| cmd.matches(name))
    }

    /// Handler for a command. Handlers registered directly under the typed
    /// name win over ones reached through a declared alias.
    fn handler_for(&self, name: &str) -> Option<(String, EventHandler)> {
        let lowered = name.to_lowercase();
        let enabled = self.registry.enabled();

        for record in &enabled {
            if let Some(h) = record.command_handlers.get(name).or_else(|| record.command_handlers.get(&lowered)) {
                return Some((record.name.clone(), h.clone()));
            }
        }
        for record in &enabled {
            let Some(cmd) = record.metadata.commands.iter().find(|c| c.matches(name)) else { continue };
            if let Some(h) = cmd.all_names().find_map(|n| record.command_handlers.get(n)) {
                return Some((record.name.clone(), h.clone()));
            }
        }
        None
    }

    /// Run the command handler matching a command event.
    ///
    /// Returns `Ok(None)` when the event is not a command, `NotFound` when no
    /// enabled plugin handles it, and the owning plugin with the handler's
    /// result otherwise.
    pub async fn execute(
        &self,
        event: Arc<Event>,
        transport: Arc<dyn Transport>,
        config: Arc<Config>,
    ) -> Result<Option<(String, Result<(), PluginError>)>, HostError> {
        let Some(Content::Command { name, .. }) = event.as_message().map(|m| &m.content) else {
            return Ok(None);
        };

        let (plugin, handler) = self.handler_for(name)
            .ok_or_else(|| HostError::NotFound(format!("command '{}'", name)))?;

        let result = match tokio::spawn(handler(event.clone(), transport, config)).await {
            Ok(result) => result,
            Err(e) => Err(PluginError::from(e)),
        };
        if let Err(e) = &result {
            tracing::warn!("Command {} of {} failed: {}", name, plugin, e);
        }
        Ok(Some((plugin, result)))
    }
}
