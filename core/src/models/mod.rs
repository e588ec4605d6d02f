//! Data models for the audit relay
//!
//! This module provides the MySQL command table and the audit event emitted
//! for every classified client packet.

pub mod command;
pub mod event;

pub use command::{classify, lookup, Classification, CommandKind, CommandSpec, PayloadRule, COMMAND_TABLE};
pub use event::{QueryEvent, SessionEndpoints};
