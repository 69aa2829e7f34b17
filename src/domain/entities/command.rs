use serde::{Deserialize, Serialize};

/// A command a plugin declares in its metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CommandDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Case-insensitive match on the name or any alias.
    pub fn matches(&self, input: &str) -> bool {
        self.name.eq_ignore_ascii_case(input) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(input))
    }

    /// Name followed by every alias.
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_aliases_case_insensitive() {
        let cmd = CommandDescriptor::new("balance").with_aliases(["bal", "wallet"]);
        assert!(cmd.matches("BALANCE"));
        assert!(cmd.matches("Bal"));
        assert!(!cmd.matches("bank"));
        assert_eq!(cmd.all_names().collect::<Vec<_>>(), vec!["balance", "bal", "wallet"]);
    }
}
