//! Command-line interface.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

pub use output::{handle_error, output, CommandOutput};

#[derive(Parser, Debug)]
#[command(name = "ci-healer")]
#[command(about = "ci-healer - autonomous CI failure repair", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .ci-healer/config.yaml + local.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Heal one repository
    Heal(commands::heal::HealArgs),
    /// Heal every repository listed in a YAML request file, concurrently
    Batch(commands::batch::BatchArgs),
    /// Show persisted run results
    Results(commands::results::ResultsArgs),
    /// Print the branch name a team and leader publish to
    Branch(commands::branch::BranchArgs),
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => ConfigLoader::load_from_file(path),
            None => ConfigLoader::load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_heal() {
        let cli = Cli::try_parse_from([
            "ci-healer",
            "heal",
            "--repo",
            "https://github.com/acme/calc",
            "--team",
            "Team One",
            "--leader",
            "Ada",
            "--max-iterations",
            "3",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Heal(args) => {
                assert_eq!(args.team, "Team One");
                assert_eq!(args.max_iterations, Some(3));
                assert!(args.model.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_branch_requires_leader() {
        assert!(Cli::try_parse_from(["ci-healer", "branch", "--team", "T"]).is_err());
        assert!(Cli::try_parse_from(["ci-healer", "branch", "--team", "T", "--leader", "L"]).is_ok());
    }
}
