//! Domain layer - Core objects with no infrastructure dependencies
//!
//! This layer contains:
//! - Entities: Events, messages, command descriptors
//! - Traits: Abstractions for the messaging transport

pub mod entities;
pub mod traits;
