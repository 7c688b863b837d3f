//! Sandbox port - isolated, time-bounded test execution.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::models::Stack;

/// Why a sandbox execution did not produce a regular test outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SandboxFailure {
    /// Wall-clock timeout hit; the environment was torn down.
    Timeout(u64),
    /// The environment could not be started or waited on.
    Execution(String),
}

/// Normalized result of one sandbox run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub exit_code: i32,
    /// Combined stdout+stderr with environment noise removed.
    pub log: String,
    /// Combined stdout+stderr as produced.
    pub raw_log: String,
    #[serde(default)]
    pub failure: Option<SandboxFailure>,
    /// True when the entry-point fallback replaced a "no tests" result.
    #[serde(default)]
    pub fallback_used: bool,
}

impl SandboxOutcome {
    pub const fn passed(&self) -> bool {
        self.exit_code == 0 && self.failure.is_none()
    }
}

/// Executes a repository's test suite in isolation.
///
/// Implementations must tear the environment down on every exit path and
/// never return an error: execution problems are folded into the outcome.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, stack: Stack, workdir: &Path, timeout: Duration) -> SandboxOutcome;
}
