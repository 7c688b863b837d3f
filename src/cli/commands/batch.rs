//! Implementation of the `ci-healer batch` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use crate::application::HealingService;
use crate::cli::output::{output, results_table, CommandOutput};
use crate::domain::models::{Config, HealingRequest, RunResultRecord};

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// YAML file with a `runs` list of {repo_url, team_name, leader_name, max_iterations?, model?}
    pub requests: PathBuf,
}

#[derive(Debug, Deserialize)]
struct BatchFile {
    runs: Vec<BatchEntry>,
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    repo_url: String,
    team_name: String,
    leader_name: String,
    max_iterations: Option<u32>,
    model: Option<String>,
}

/// Parse a batch file, filling unset iteration limits from `config`.
pub fn load_requests(path: &Path, config: &Config) -> Result<Vec<HealingRequest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: BatchFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(file
        .runs
        .into_iter()
        .map(|entry| HealingRequest {
            repo_url: entry.repo_url,
            team_name: entry.team_name,
            leader_name: entry.leader_name,
            max_iterations: entry
                .max_iterations
                .unwrap_or(config.healing.default_max_iterations),
            model: entry.model,
        })
        .collect())
}

#[derive(Debug, serde::Serialize)]
pub struct BatchOutput {
    pub completed: Vec<RunResultRecord>,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, serde::Serialize)]
pub struct BatchError {
    pub team_name: String,
    pub error: String,
}

impl CommandOutput for BatchOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        if self.completed.is_empty() {
            lines.push("No runs completed.".to_string());
        } else {
            lines.push(results_table(&self.completed));
        }
        for err in &self.errors {
            lines.push(format!("{}: {}", err.team_name, err.error));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: BatchArgs, config: &Config, json_mode: bool) -> Result<()> {
    let requests = load_requests(&args.requests, config)?;
    let teams: Vec<String> = requests.iter().map(|r| r.team_name.clone()).collect();

    let service = HealingService::from_config(config)?;
    let results = service.heal_many(requests).await;

    let mut batch = BatchOutput {
        completed: Vec::new(),
        errors: Vec::new(),
    };
    for (team_name, result) in teams.into_iter().zip(results) {
        match result {
            Ok(record) => batch.completed.push(record),
            Err(e) => batch.errors.push(BatchError {
                team_name,
                error: format!("{e:#}"),
            }),
        }
    }
    output(&batch, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_requests_applies_default_iterations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "runs:\n  - repo_url: https://github.com/acme/calc\n    team_name: Alpha\n    leader_name: Ada\n  - repo_url: https://github.com/acme/api\n    team_name: Beta\n    leader_name: Bo\n    max_iterations: 2\n    model: fast\n"
        )
        .unwrap();

        let config = Config::default();
        let requests = load_requests(file.path(), &config).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].max_iterations, config.healing.default_max_iterations);
        assert_eq!(requests[1].max_iterations, 2);
        assert_eq!(requests[1].model.as_deref(), Some("fast"));
    }
}
