//! Implementation of the `ci-healer results` command.

use anyhow::Result;
use clap::Args;

use crate::cli::output::{output, results_table, CommandOutput};
use crate::domain::models::{Config, RunResultRecord};
use crate::infrastructure::persistence::JsonResultsStore;

#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Only show runs for this team (case-insensitive)
    #[arg(short, long)]
    pub team: Option<String>,

    /// Show at most this many of the most recent runs
    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
pub struct ResultsOutput {
    pub results: Vec<RunResultRecord>,
    pub total: usize,
}

impl CommandOutput for ResultsOutput {
    fn to_human(&self) -> String {
        if self.results.is_empty() {
            return "No results found.".to_string();
        }
        format!("Found {} run(s):\n{}", self.total, results_table(&self.results))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: ResultsArgs, config: &Config, json_mode: bool) -> Result<()> {
    let store = JsonResultsStore::new(config.results.path.clone());
    let mut results = match &args.team {
        Some(team) => store.load_for_team(team).await?,
        None => store.load_all().await?,
    };
    if let Some(limit) = args.limit {
        let skip = results.len().saturating_sub(limit);
        results.drain(..skip);
    }
    let total = results.len();
    output(&ResultsOutput { results, total }, json_mode);
    Ok(())
}
