//! Implementation of the `ci-healer branch` command.

use anyhow::Result;
use clap::Args;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::branch_name;

#[derive(Args, Debug)]
pub struct BranchArgs {
    /// Team name
    #[arg(long)]
    pub team: String,

    /// Team leader name
    #[arg(long)]
    pub leader: String,
}

#[derive(Debug, serde::Serialize)]
pub struct BranchOutput {
    pub branch: String,
}

impl CommandOutput for BranchOutput {
    fn to_human(&self) -> String {
        self.branch.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn execute(args: &BranchArgs, config: &Config, json_mode: bool) -> Result<()> {
    let branch = branch_name(&args.team, &args.leader, &config.publish.branch_suffix);
    output(&BranchOutput { branch }, json_mode);
    Ok(())
}
