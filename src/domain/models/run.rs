//! Run domain model.
//!
//! A [`RunState`] owns everything one healing run knows about itself. It is
//! created once per request, mutated in place by each phase, and sealed once a
//! terminal phase is reached.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::diagnosis::FixRecord;
use super::score::ScoreBreakdown;

/// Technology stack detected for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stack {
    Python,
    Node,
    #[default]
    Unknown,
}

impl Stack {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "PYTHON",
            Self::Node => "NODE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

impl RunStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase marker of the healing state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Discover,
    DiscoveryFailed,
    Test,
    Diagnose,
    Patch,
    Publish,
    Passed,
    NoBugsFound,
    MaxRetries,
    Score,
    Done,
}

impl Phase {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Discover => "DISCOVER",
            Self::DiscoveryFailed => "DISCOVERY_FAILED",
            Self::Test => "TEST",
            Self::Diagnose => "DIAGNOSE",
            Self::Patch => "PATCH",
            Self::Publish => "PUBLISH",
            Self::Passed => "PASSED",
            Self::NoBugsFound => "NO_BUGS_FOUND",
            Self::MaxRetries => "MAX_RETRIES",
            Self::Score => "SCORE",
            Self::Done => "DONE",
        }
    }

    /// Phases that route straight to scoring.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryFailed
                | Self::Passed
                | Self::NoBugsFound
                | Self::MaxRetries
                | Self::Score
                | Self::Done
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the append-only run timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Intake request for one healing run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealingRequest {
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Model selector forwarded to the reasoning capability. `None` uses the
    /// configured default.
    #[serde(default)]
    pub model: Option<String>,
}

const fn default_max_iterations() -> u32 {
    5
}

/// Mutable state of one healing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub model: Option<String>,

    pub repo_path: Option<PathBuf>,
    pub stack: Stack,
    pub test_files: Vec<PathBuf>,

    pub retry_count: u32,
    pub max_iterations: u32,
    pub phase: Phase,

    pub last_exit_code: Option<i32>,
    pub raw_logs: String,
    pub clean_logs: String,
    /// Failure counts of recent test cycles, oldest first. The only thing
    /// carried across iterations for anchoring.
    pub failure_history: Vec<usize>,

    fixes_applied: Vec<FixRecord>,
    timeline: Vec<TimelineEvent>,

    pub final_status: RunStatus,
    pub score: Option<ScoreBreakdown>,
    pub branch_name: Option<String>,
    pub branch_pushed: bool,
    pub pr_url: Option<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    sealed: bool,
}

impl RunState {
    pub fn new(request: &HealingRequest) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            repo_url: request.repo_url.clone(),
            team_name: request.team_name.clone(),
            leader_name: request.leader_name.clone(),
            model: request.model.clone(),
            repo_path: None,
            stack: Stack::Unknown,
            test_files: Vec::new(),
            retry_count: 0,
            max_iterations: request.max_iterations,
            phase: Phase::Discover,
            last_exit_code: None,
            raw_logs: String::new(),
            clean_logs: String::new(),
            failure_history: Vec::new(),
            fixes_applied: Vec::new(),
            timeline: Vec::new(),
            final_status: RunStatus::Pending,
            score: None,
            branch_name: None,
            branch_pushed: false,
            pr_url: None,
            started_at: Utc::now(),
            finished_at: None,
            sealed: false,
        }
    }

    /// Applied fixes in application order.
    pub fn fixes(&self) -> &[FixRecord] {
        &self.fixes_applied
    }

    pub fn timeline(&self) -> &[TimelineEvent] {
        &self.timeline
    }

    /// Append an applied fix. Ignored once the run is sealed.
    pub fn push_fix(&mut self, fix: FixRecord) -> bool {
        if self.sealed {
            return false;
        }
        self.fixes_applied.push(fix);
        true
    }

    /// Append a timeline event. Ignored once the run is sealed.
    pub fn record(&mut self, event: impl Into<String>, details: serde_json::Value) {
        if self.sealed {
            return;
        }
        self.timeline.push(TimelineEvent {
            timestamp: Utc::now(),
            event: event.into(),
            details,
        });
    }

    /// Push a failure count into the bounded history window.
    pub fn push_failure_count(&mut self, count: usize, window: usize) {
        self.failure_history.push(count);
        let window = window.max(2);
        if self.failure_history.len() > window {
            let excess = self.failure_history.len() - window;
            self.failure_history.drain(..excess);
        }
    }

    /// Elapsed wall-clock seconds, up to `finished_at` when sealed.
    pub fn elapsed_secs(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        let millis = (end - self.started_at).num_milliseconds().max(0);
        #[allow(clippy::cast_precision_loss)]
        let secs = millis as f64 / 1000.0;
        secs
    }

    /// Freeze the run. Further fix or timeline appends are dropped.
    pub fn seal(&mut self) {
        if self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        self.sealed = true;
    }

    pub const fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::BugCategory;

    fn request() -> HealingRequest {
        HealingRequest {
            repo_url: "https://github.com/acme/calc".to_string(),
            team_name: "Team One".to_string(),
            leader_name: "Al Ex".to_string(),
            max_iterations: 3,
            model: None,
        }
    }

    fn fix() -> FixRecord {
        FixRecord {
            path: "calc.py".to_string(),
            bug_type: BugCategory::Syntax,
            line: 6,
            description: "add missing colon".to_string(),
            commit_message: "[AI-AGENT] Fix SYNTAX in calc.py".to_string(),
        }
    }

    #[test]
    fn test_new_run_state_defaults() {
        let state = RunState::new(&request());
        assert_eq!(state.phase, Phase::Discover);
        assert_eq!(state.final_status, RunStatus::Pending);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.max_iterations, 3);
        assert!(state.fixes().is_empty());
    }

    #[test]
    fn test_sealed_state_rejects_appends() {
        let mut state = RunState::new(&request());
        assert!(state.push_fix(fix()));
        state.record("TEST_RUN", serde_json::json!({}));
        state.seal();

        assert!(!state.push_fix(fix()));
        state.record("LATE", serde_json::json!({}));
        assert_eq!(state.fixes().len(), 1);
        assert_eq!(state.timeline().len(), 1);
        assert!(state.finished_at.is_some());
    }

    #[test]
    fn test_failure_history_is_bounded() {
        let mut state = RunState::new(&request());
        for count in [5, 4, 3, 3, 2, 1] {
            state.push_failure_count(count, 3);
        }
        assert_eq!(state.failure_history, vec![3, 2, 1]);
    }

    #[test]
    fn test_stack_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Stack::Python).unwrap(), "\"PYTHON\"");
        assert_eq!(serde_json::to_string(&RunStatus::Failed).unwrap(), "\"FAILED\"");
    }
}
