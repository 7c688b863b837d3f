//! Reasoning capability adapters
//!
//! - `HttpReasoningClient`: messages-style JSON HTTP API
//! - `ScriptedReasoningClient`: canned replies for tests and dry runs

pub mod client;
pub mod scripted;
pub mod types;

pub use client::{parse_json_reply, HttpReasoningClient};
pub use scripted::ScriptedReasoningClient;
