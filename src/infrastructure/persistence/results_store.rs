//! Append-only JSON results file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::domain::models::{FixRecord, RunResultRecord, RunState};
use crate::domain::ports::TelemetrySink;

/// Stores every finalized run as one element of a JSON array.
///
/// Writes go through a temporary sibling file and a rename, so a crash
/// mid-write leaves the previous history intact.
pub struct JsonResultsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonResultsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All persisted records, oldest first. A missing file is an empty history.
    pub async fn load_all(&self) -> Result<Vec<RunResultRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))
    }

    /// Records for one team, oldest first.
    pub async fn load_for_team(&self, team_name: &str) -> Result<Vec<RunResultRecord>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.team_name.eq_ignore_ascii_case(team_name))
            .collect())
    }

    #[instrument(skip(self, record), fields(run_id = %record.run_id, team = %record.team_name))]
    pub async fn append(&self, record: &RunResultRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load_all().await?;
        records.push(record.clone());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&records).context("Failed to serialize results")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        info!(total = records.len(), path = %self.path.display(), "result persisted");
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for JsonResultsStore {
    async fn run_started(&self, state: &RunState) -> Result<()> {
        debug!(run_id = %state.run_id, team = %state.team_name, "run started");
        Ok(())
    }

    async fn fix_applied(&self, state: &RunState, fix: &FixRecord) -> Result<()> {
        debug!(
            run_id = %state.run_id,
            file = %fix.path,
            line = fix.line,
            iteration = state.retry_count,
            "fix applied"
        );
        Ok(())
    }

    async fn run_finalized(&self, record: &RunResultRecord) -> Result<()> {
        self.append(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HealingRequest;

    fn record(team: &str) -> RunResultRecord {
        let mut state = RunState::new(&HealingRequest {
            repo_url: "https://github.com/acme/calc".to_string(),
            team_name: team.to_string(),
            leader_name: "Ada".to_string(),
            max_iterations: 5,
            model: None,
        });
        state.seal();
        RunResultRecord::from_state(&state, format!("{}_ADA_AI_FIX", team.to_uppercase()))
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonResultsStore::new(dir.path().join("results.json"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonResultsStore::new(dir.path().join("nested/results.json"));

        let first = record("alpha");
        let second = record("beta");
        store.run_finalized(&first).await.unwrap();
        store.run_finalized(&second).await.unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all, vec![first, second.clone()]);
        assert_eq!(store.load_for_team("BETA").await.unwrap(), vec![second]);
        assert!(!dir.path().join("nested/results.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonResultsStore::new(&path);
        assert!(store.load_all().await.is_err());
        assert!(store.append(&record("alpha")).await.is_err());
    }
}
