use super::Message;
use chrono::{DateTime, Utc};

/// Membership change in a group chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl GroupAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupAction::Add => "add",
            GroupAction::Remove => "remove",
            GroupAction::Promote => "promote",
            GroupAction::Demote => "demote",
        }
    }
}

/// A group participants update delivered by the transport
#[derive(Debug, Clone)]
pub struct GroupUpdate {
    pub chat_id: String,
    pub action: GroupAction,
    pub participants: Vec<String>,
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl GroupUpdate {
    pub fn new(chat_id: impl Into<String>, action: GroupAction, participants: Vec<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            action,
            participants,
            author: None,
            timestamp: Utc::now(),
        }
    }
}

/// Everything the transport hands to the dispatcher
#[derive(Debug, Clone)]
pub enum Event {
    Message(Message),
    Group(GroupUpdate),
}

impl Event {
    pub fn chat_id(&self) -> &str {
        match self {
            Event::Message(m) => &m.chat_id,
            Event::Group(g) => &g.chat_id,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Event::Message(m) => Some(m),
            Event::Group(_) => None,
        }
    }

    /// Identifier of the pressed button when this event is a button response.
    pub fn button_id(&self) -> Option<&str> {
        match self {
            Event::Message(m) => match &m.content {
                super::Content::CallbackData(id) => Some(id),
                _ => None,
            },
            Event::Group(_) => None,
        }
    }
}

impl From<Message> for Event {
    fn from(m: Message) -> Self {
        Event::Message(m)
    }
}

impl From<GroupUpdate> for Event {
    fn from(g: GroupUpdate) -> Self {
        Event::Group(g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_id_only_for_callback() {
        let button: Event = Message::from_button("chat", "bet:yes").into();
        assert_eq!(button.button_id(), Some("bet:yes"));

        let text: Event = Message::from_text("chat", "hi").into();
        assert_eq!(text.button_id(), None);

        let group: Event = GroupUpdate::new("g@g.us", GroupAction::Add, vec!["u1".into()]).into();
        assert_eq!(group.button_id(), None);
        assert_eq!(group.chat_id(), "g@g.us");
    }
}
