//! Implementation of the `ci-healer heal` command.

use anyhow::Result;
use clap::Args;

use crate::application::HealingService;
use crate::cli::output::{output, run_summary, CommandOutput};
use crate::domain::models::{Config, HealingRequest, RunResultRecord};

#[derive(Args, Debug)]
pub struct HealArgs {
    /// Repository URL to clone and heal
    #[arg(long)]
    pub repo: String,

    /// Team name
    #[arg(long)]
    pub team: String,

    /// Team leader name
    #[arg(long)]
    pub leader: String,

    /// Maximum test/diagnose/patch cycles (defaults to healing.default_max_iterations)
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Reasoning model override
    #[arg(long)]
    pub model: Option<String>,
}

impl HealArgs {
    pub fn into_request(self, config: &Config) -> HealingRequest {
        HealingRequest {
            repo_url: self.repo,
            team_name: self.team,
            leader_name: self.leader,
            max_iterations: self
                .max_iterations
                .unwrap_or(config.healing.default_max_iterations),
            model: self.model,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HealOutput {
    #[serde(flatten)]
    pub record: RunResultRecord,
}

impl CommandOutput for HealOutput {
    fn to_human(&self) -> String {
        run_summary(&self.record)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: HealArgs, config: &Config, json_mode: bool) -> Result<()> {
    let service = HealingService::from_config(config)?;
    let record = service.heal(args.into_request(config)).await?;
    output(&HealOutput { record }, json_mode);
    Ok(())
}
