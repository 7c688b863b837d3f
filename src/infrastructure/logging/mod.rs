//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty output on stderr
//! - Rolling JSON log files via tracing-appender
//! - Credential redaction for remote URLs and tokens

pub mod logger;
pub mod redact;

pub use logger::LoggerImpl;
pub use redact::{redact_url, scrub};
