//! Message handling - Event fan-out, button routing and text parsing

pub mod buttons;
pub mod dispatcher;
pub mod parser;

pub use buttons::ButtonRegistry;
pub use dispatcher::{DispatchSettings, DispatchSummary, MessageDispatcher};
pub use parser::MessageParser;
