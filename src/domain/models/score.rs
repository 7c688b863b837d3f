//! Score breakdown and the persisted result record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::diagnosis::FixRecord;
use super::run::{RunState, RunStatus, TimelineEvent};

/// Deterministic score of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScoreBreakdown {
    pub final_score: i64,
    pub base_score: i64,
    pub speed_bonus: i64,
    pub efficiency_penalty: i64,
}

/// Historical record of one run, written once the run is finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResultRecord {
    pub run_id: Uuid,
    pub repo_url: String,
    pub team_name: String,
    pub leader_name: String,
    pub branch_name: String,
    pub final_status: RunStatus,
    pub total_time: f64,
    pub final_score: i64,
    pub base_score: i64,
    pub speed_bonus: i64,
    pub efficiency_penalty: i64,
    pub fixes_applied: Vec<FixRecord>,
    pub timeline: Vec<TimelineEvent>,
    pub retry_count: u32,
    pub pr_url: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunResultRecord {
    pub fn from_state(state: &RunState, branch_name: String) -> Self {
        let score = state.score.unwrap_or_default();
        Self {
            run_id: state.run_id,
            repo_url: state.repo_url.clone(),
            team_name: state.team_name.clone(),
            leader_name: state.leader_name.clone(),
            branch_name,
            final_status: state.final_status,
            total_time: state.elapsed_secs(),
            final_score: score.final_score,
            base_score: score.base_score,
            speed_bonus: score.speed_bonus,
            efficiency_penalty: score.efficiency_penalty,
            fixes_applied: state.fixes().to_vec(),
            timeline: state.timeline().to_vec(),
            retry_count: state.retry_count,
            pr_url: state.pr_url.clone(),
            started_at: state.started_at,
            completed_at: state.finished_at.unwrap_or_else(Utc::now),
        }
    }
}
