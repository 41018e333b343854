//! # swarm-proto
//!
//! Shared types for the Swarm choreography framework.
//!
//! Agents never call each other. They append spans to a shared JSONL log and
//! react to the spans other agents append. This crate holds the vocabulary
//! every other crate speaks:
//! - `Span` records and their attribute values
//! - `Command` requests produced by trigger handlers
//! - Agent and state identifiers, including the wildcard source state
//! - Suffix patterns used for trigger routing
//! - Common error types

mod agent;
mod command;
mod error;
mod pattern;
mod span;

pub use agent::{AgentId, SourceState, StateId};
pub use command::{Command, Delivery};
pub use error::{Error, Result};
pub use pattern::SuffixPattern;
pub use span::{AttrValue, Attributes, Span, SpanStatus, now_seconds};
