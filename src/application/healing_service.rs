use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use tracing::{error, info, instrument, warn};

use crate::domain::models::{Config, HealingRequest, RunResultRecord, RunState};
use crate::domain::ports::{PullRequestHost, TelemetrySink};
use crate::infrastructure::discovery::RepoDiscovery;
use crate::infrastructure::git::GitCli;
use crate::infrastructure::github::GitHubClient;
use crate::infrastructure::persistence::JsonResultsStore;
use crate::infrastructure::reasoning::HttpReasoningClient;
use crate::infrastructure::sandbox::ProcessSandbox;
use crate::services::{Orchestrator, OrchestratorPorts, RunRegistry};

/// Front door for healing runs.
///
/// Each request becomes a fresh [`RunState`] driven to completion by the
/// [`Orchestrator`] on its own task. Progress and outcomes are mirrored into
/// the shared [`RunRegistry`] keyed by team name. A failed run is still a
/// successful call: `heal` only errors when the request is rejected or the
/// run task itself dies.
pub struct HealingService {
    orchestrator: Arc<Orchestrator>,
    registry: RunRegistry,
}

impl HealingService {
    pub const fn new(orchestrator: Arc<Orchestrator>, registry: RunRegistry) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    /// Wire the production adapters described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let reasoning = HttpReasoningClient::new(&config.reasoning)
            .context("Failed to create reasoning client")?;
        let pr_host: Option<Arc<dyn PullRequestHost>> = if config.publish.github_token.is_some() {
            Some(Arc::new(
                GitHubClient::new(&config.publish).context("Failed to create GitHub client")?,
            ))
        } else {
            None
        };
        let telemetry: Arc<dyn TelemetrySink> =
            Arc::new(JsonResultsStore::new(config.results.path.clone()));

        let ports = OrchestratorPorts {
            discovery: Arc::new(RepoDiscovery::new(
                config.healing.workspace_dir.clone(),
                config.publish.github_token.clone(),
            )),
            sandbox: Arc::new(ProcessSandbox::new(config.sandbox.clone())),
            reasoning: Arc::new(reasoning),
            git: Arc::new(GitCli::new(&config.publish)),
            pr_host,
            telemetry,
        };

        Ok(Self::new(
            Arc::new(Orchestrator::new(ports, config)),
            RunRegistry::new(),
        ))
    }

    pub const fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Run one healing request to completion.
    #[instrument(skip_all, fields(team = %request.team_name))]
    pub async fn heal(&self, request: HealingRequest) -> Result<RunResultRecord> {
        if request.repo_url.trim().is_empty() || request.team_name.trim().is_empty() {
            bail!("a healing request needs a repository URL and a team name");
        }
        let team = request.team_name.clone();
        if !self.registry.start(&team).await {
            bail!("a healing run for team '{team}' is already in progress");
        }

        let state = RunState::new(&request);
        info!(run_id = %state.run_id, "healing request accepted");

        let orchestrator = Arc::clone(&self.orchestrator);
        let handle = tokio::spawn(async move {
            let state = orchestrator.run(state).await;
            orchestrator.result_record(&state)
        });

        match handle.await {
            Ok(record) => {
                self.registry.complete(record.clone()).await;
                Ok(record)
            }
            Err(e) => {
                let message = format!("healing run aborted: {e}");
                error!(error = %e, "healing run task failed");
                self.registry.fail(&team, &message).await;
                bail!(message)
            }
        }
    }

    /// Run several requests concurrently. Results keep the input order.
    pub async fn heal_many(&self, requests: Vec<HealingRequest>) -> Vec<Result<RunResultRecord>> {
        let results = join_all(requests.into_iter().map(|r| self.heal(r))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "some healing requests did not complete");
        }
        results
    }
}
