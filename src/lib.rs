//! ci-healer - autonomous CI failure repair
//!
//! ci-healer clones a repository, runs its tests in a sandbox, anchors each
//! failure to one source file, asks a reasoning capability for a diagnosis
//! and a patch, applies the patch behind a hallucination guard, publishes the
//! result to a deterministic branch and scores the run.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Run state, diagnosis and score models, port traits, errors
//! - **Service Layer** (`services`): The orchestration state machine and its gateways
//! - **Application Layer** (`application`): Use-case wiring and the run registry front door
//! - **Infrastructure Layer** (`infrastructure`): Git, sandbox, HTTP and filesystem adapters
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```no_run
//! use ci_healer::application::HealingService;
//! use ci_healer::domain::models::HealingRequest;
//! use ci_healer::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let service = HealingService::from_config(&config)?;
//!     let record = service
//!         .heal(HealingRequest {
//!             repo_url: "https://github.com/acme/calc".to_string(),
//!             team_name: "Team One".to_string(),
//!             leader_name: "Ada".to_string(),
//!             max_iterations: 5,
//!             model: None,
//!         })
//!         .await?;
//!     println!("{} scored {}", record.team_name, record.final_score);
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::HealingService;
pub use domain::errors::{HealError, HealResult, ReasoningError};
pub use domain::models::{
    Config, HealingRequest, Phase, RunResultRecord, RunState, RunStatus, ScoreBreakdown, Stack,
};
pub use domain::ports::{
    Discovery, GitWorkspace, PullRequestHost, ReasoningClient, Sandbox, TelemetrySink,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{next_phase, Orchestrator, OrchestratorPorts, RunRegistry};
