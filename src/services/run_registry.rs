//! In-memory registry of run outcomes, keyed by team name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::models::RunResultRecord;

/// Lifecycle of a registered run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEntry {
    Running,
    Done(Box<RunResultRecord>),
    Error(String),
}

impl RunEntry {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }
}

/// Shared between the application service and anything reporting on runs.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    entries: Arc<RwLock<HashMap<String, RunEntry>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `team` as running. Returns `false`, leaving the entry untouched,
    /// when a run for that team is already in flight.
    pub async fn start(&self, team: &str) -> bool {
        let mut entries = self.entries.write().await;
        if matches!(entries.get(team), Some(RunEntry::Running)) {
            return false;
        }
        entries.insert(team.to_string(), RunEntry::Running);
        true
    }

    pub async fn complete(&self, record: RunResultRecord) {
        self.entries
            .write()
            .await
            .insert(record.team_name.clone(), RunEntry::Done(Box::new(record)));
    }

    pub async fn fail(&self, team: &str, message: impl Into<String>) {
        self.entries
            .write()
            .await
            .insert(team.to_string(), RunEntry::Error(message.into()));
    }

    pub async fn get(&self, team: &str) -> Option<RunEntry> {
        self.entries.read().await.get(team).cloned()
    }

    /// Number of runs still in flight.
    pub async fn running(&self) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| matches!(e, RunEntry::Running))
            .count()
    }
}
