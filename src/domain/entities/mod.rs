//! Domain entities - Events, messages and command descriptors

pub mod command;
pub mod event;
pub mod message;

pub use command::CommandDescriptor;
pub use event::{Event, GroupAction, GroupUpdate};
pub use message::{Content, Message, MessageType, Sender};
