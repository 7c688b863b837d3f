//! Healing orchestrator.
//!
//! An explicit state machine over [`Phase`]. Each phase handler mutates the
//! [`RunState`] and reports a [`PhaseOutcome`]; [`next_phase`] is the pure
//! transition function. Every failure inside a handler is folded into an
//! outcome and a timeline event, so nothing crosses the orchestration
//! boundary as an error.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::anchor_resolver::{AnchorDecision, AnchorResolver};
use super::diagnosis_gateway::{DiagnosisGateway, DiagnosisRequest};
use super::log_signals::{signal_chars, LogSignalExtractor, LogSignals};
use super::patch_gateway::{PatchGateway, PatchRequest};
use super::publisher::{branch_name, Publisher};
use super::retry::RetryPolicy;
use super::scoring::ScoreCalculator;
use super::source_tree::SourceTree;
use crate::domain::errors::HealError;
use crate::domain::models::{Config, Diagnosis, Phase, RunResultRecord, RunState, RunStatus};
use crate::domain::ports::{
    Discovery, GitWorkspace, PullRequestHost, ReasoningClient, Sandbox, SandboxFailure,
    TelemetrySink,
};

/// What a phase handler observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    DiscoveryOk,
    DiscoveryFailed,
    TestsPassed,
    TestsFailed,
    /// Only the entry-point fallback ran, and the policy does not count it as a pass.
    FallbackNotAccepted,
    DiagnosisReady,
    NoSignal,
    DiagnosisUnavailable,
    PatchApplied,
    PatchRejected,
    Published,
    Scored,
}

/// Pure transition function.
///
/// `retry_count` is the value after the phase ran; a failed test cycle has
/// already been counted.
pub fn next_phase(phase: Phase, outcome: PhaseOutcome, retry_count: u32, max_iterations: u32) -> Phase {
    use PhaseOutcome as O;

    match (phase, outcome) {
        (Phase::Discover, O::DiscoveryOk) => Phase::Test,
        (Phase::Discover, _) => Phase::DiscoveryFailed,

        (Phase::Test, O::TestsPassed) => Phase::Passed,
        (Phase::Test, O::FallbackNotAccepted) => Phase::NoBugsFound,
        (Phase::Test, _) if retry_count >= max_iterations => Phase::MaxRetries,
        (Phase::Test, _) => Phase::Diagnose,

        (Phase::Diagnose, O::DiagnosisReady) => Phase::Patch,
        (Phase::Diagnose, O::NoSignal) => Phase::NoBugsFound,
        (Phase::Diagnose, _) => Phase::Test,

        (Phase::Patch, O::PatchApplied) => Phase::Publish,
        (Phase::Patch, _) => Phase::Test,

        (Phase::Publish, _) => Phase::Test,

        (Phase::DiscoveryFailed | Phase::Passed | Phase::NoBugsFound | Phase::MaxRetries, _) => {
            Phase::Score
        }
        (Phase::Score | Phase::Done, _) => Phase::Done,
    }
}

/// Upper bound on phase executions for one run.
pub const fn step_ceiling(max_iterations: u32) -> u32 {
    max_iterations.saturating_mul(4).saturating_add(6)
}

/// Tunables taken from [`Config`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub sandbox_timeout: Duration,
    pub min_signal_chars: usize,
    pub max_context_bytes: usize,
    pub failure_history_window: usize,
    pub failure_tail_lines: usize,
    pub fallback_success_passes: bool,
    pub branch_suffix: String,
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            sandbox_timeout: Duration::from_secs(config.sandbox.timeout_secs),
            min_signal_chars: config.healing.min_signal_chars,
            max_context_bytes: config.healing.max_context_bytes,
            failure_history_window: config.healing.failure_history_window,
            failure_tail_lines: config.healing.failure_tail_lines,
            fallback_success_passes: config.sandbox.fallback_success_passes,
            branch_suffix: config.publish.branch_suffix.clone(),
        }
    }
}

/// Collaborators the orchestrator drives.
#[derive(Clone)]
pub struct OrchestratorPorts {
    pub discovery: Arc<dyn Discovery>,
    pub sandbox: Arc<dyn Sandbox>,
    pub reasoning: Arc<dyn ReasoningClient>,
    pub git: Arc<dyn GitWorkspace>,
    pub pr_host: Option<Arc<dyn PullRequestHost>>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

/// Per-iteration scratch: never outlives one test → diagnose → patch cycle.
#[derive(Default)]
struct Cycle {
    signals: Option<LogSignals>,
    tree: Option<SourceTree>,
    diagnosis: Option<Diagnosis>,
}

pub struct Orchestrator {
    discovery: Arc<dyn Discovery>,
    sandbox: Arc<dyn Sandbox>,
    telemetry: Arc<dyn TelemetrySink>,
    diagnoser: DiagnosisGateway,
    patcher: PatchGateway,
    publisher: Option<Publisher>,
    extractor: LogSignalExtractor,
    anchors: AnchorResolver,
    scorer: ScoreCalculator,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(ports: OrchestratorPorts, config: &Config) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let settings = OrchestratorSettings::from(config);
        let publisher = config.publish.enabled.then(|| {
            Publisher::new(ports.git.clone(), ports.pr_host.clone(), config.publish.clone())
        });

        Self {
            discovery: ports.discovery,
            sandbox: ports.sandbox,
            telemetry: ports.telemetry,
            diagnoser: DiagnosisGateway::new(ports.reasoning.clone(), retry.clone()),
            patcher: PatchGateway::new(
                ports.reasoning,
                retry,
                config.healing.scratch_dir.clone(),
                config.publish.commit_prefix.clone(),
            ),
            publisher,
            extractor: LogSignalExtractor::new(settings.failure_tail_lines),
            anchors: AnchorResolver::default(),
            scorer: ScoreCalculator::new(config.scoring.clone()),
            settings,
        }
    }

    /// Drive one run from `Discover` to `Done`. Never fails: every problem
    /// ends up in the timeline and the final status.
    #[instrument(skip_all, fields(run_id = %state.run_id, team = %state.team_name))]
    pub async fn run(&self, mut state: RunState) -> RunState {
        info!(repo = %state.repo_url, max_iterations = state.max_iterations, "healing run started");
        if let Err(e) = self.telemetry.run_started(&state).await {
            warn!(error = %format!("{e:#}"), "telemetry run_started failed");
            state.record("TELEMETRY_FAILURE", json!({ "event": "run_started", "error": format!("{e:#}") }));
        }

        let ceiling = step_ceiling(state.max_iterations);
        let mut steps = 0u32;
        let mut cycle = Cycle::default();

        while state.phase != Phase::Done {
            steps += 1;
            if steps > ceiling && state.phase != Phase::Score {
                warn!(steps, ceiling, phase = %state.phase, "step ceiling reached, forcing score");
                state.record(
                    "STEP_CEILING_REACHED",
                    json!({ "phase": state.phase.as_str(), "steps": steps }),
                );
                state.phase = Phase::Score;
            }

            let phase = state.phase;
            debug!(phase = %phase, retry_count = state.retry_count, "executing phase");
            let outcome = match phase {
                Phase::Discover => self.discover(&mut state).await,
                Phase::Test => self.test(&mut state, &mut cycle).await,
                Phase::Diagnose => self.diagnose(&mut state, &mut cycle).await,
                Phase::Patch => self.patch(&mut state, &mut cycle).await,
                Phase::Publish => self.publish(&mut state).await,
                Phase::DiscoveryFailed | Phase::Passed | Phase::NoBugsFound | Phase::MaxRetries => {
                    self.conclude(&mut state)
                }
                Phase::Score => self.score(&mut state).await,
                Phase::Done => break,
            };

            state.phase = next_phase(phase, outcome, state.retry_count, state.max_iterations);
        }

        info!(
            status = %state.final_status,
            score = state.score.map_or(0, |s| s.final_score),
            fixes = state.fixes().len(),
            retry_count = state.retry_count,
            "healing run finished"
        );
        state
    }

    /// Persistable summary of `state`. The branch falls back to the
    /// deterministic name when publishing never ran.
    pub fn result_record(&self, state: &RunState) -> RunResultRecord {
        let branch = state.branch_name.clone().unwrap_or_else(|| {
            branch_name(&state.team_name, &state.leader_name, &self.settings.branch_suffix)
        });
        RunResultRecord::from_state(state, branch)
    }

    async fn discover(&self, state: &mut RunState) -> PhaseOutcome {
        match self.discovery.discover(&state.repo_url, &state.team_name).await {
            Ok(report) => {
                state.record(
                    "DISCOVERY",
                    json!({
                        "stack": report.stack,
                        "test_files": report.test_files.len(),
                        "workdir": report.workdir.display().to_string(),
                    }),
                );
                state.repo_path = Some(report.workdir);
                state.stack = report.stack;
                state.test_files = report.test_files;
                PhaseOutcome::DiscoveryOk
            }
            Err(e) => {
                warn!(error = %e, "discovery failed");
                state.record(e.tag(), json!({ "message": e.to_string() }));
                PhaseOutcome::DiscoveryFailed
            }
        }
    }

    async fn test(&self, state: &mut RunState, cycle: &mut Cycle) -> PhaseOutcome {
        *cycle = Cycle::default();

        let Some(workdir) = state.repo_path.clone() else {
            let err = HealError::SandboxExecution("no working directory".to_string());
            state.record(err.tag(), json!({ "message": err.to_string() }));
            state.retry_count += 1;
            return PhaseOutcome::TestsFailed;
        };

        let outcome = self
            .sandbox
            .run(state.stack, &workdir, self.settings.sandbox_timeout)
            .await;

        state.last_exit_code = Some(outcome.exit_code);
        state.raw_logs = outcome.raw_log;
        state.clean_logs = outcome.log;
        state.record(
            "TEST_RUN",
            json!({
                "exit_code": outcome.exit_code,
                "retry_count": state.retry_count,
                "fallback_used": outcome.fallback_used,
            }),
        );

        match outcome.failure {
            Some(SandboxFailure::Timeout(secs)) => {
                let err = HealError::SandboxTimeout(secs);
                state.record(err.tag(), json!({ "message": err.to_string() }));
            }
            Some(SandboxFailure::Execution(message)) => {
                let err = HealError::SandboxExecution(message);
                state.record(err.tag(), json!({ "message": err.to_string() }));
            }
            None if outcome.exit_code == 0 => {
                if outcome.fallback_used && !self.settings.fallback_success_passes {
                    info!("only the entry point ran cleanly, not counted as a pass");
                    state.record("FALLBACK_NOT_ACCEPTED", json!({}));
                    return PhaseOutcome::FallbackNotAccepted;
                }
                info!(fallback = outcome.fallback_used, "tests passed");
                state.final_status = RunStatus::Passed;
                return PhaseOutcome::TestsPassed;
            }
            None => {}
        }

        state.retry_count += 1;
        let signals = self.extractor.extract(
            &state.clean_logs,
            outcome.exit_code,
            state.repo_path.as_deref(),
        );
        state.push_failure_count(signals.failure_count(), self.settings.failure_history_window);
        info!(
            exit_code = outcome.exit_code,
            retry_count = state.retry_count,
            failures = signals.failure_count(),
            "tests failed"
        );
        cycle.signals = Some(signals);
        PhaseOutcome::TestsFailed
    }

    async fn diagnose(&self, state: &mut RunState, cycle: &mut Cycle) -> PhaseOutcome {
        if signal_chars(&state.clean_logs) < self.settings.min_signal_chars {
            let err = HealError::NoDiagnosableSignal;
            info!("log too short to diagnose");
            state.record(err.tag(), json!({ "log_chars": signal_chars(&state.clean_logs) }));
            return PhaseOutcome::NoSignal;
        }

        let Some(workdir) = state.repo_path.clone() else {
            return PhaseOutcome::DiagnosisUnavailable;
        };
        let tree = match SourceTree::scan(&workdir) {
            Ok(tree) => tree,
            Err(e) => {
                let err = HealError::Io(e);
                state.record(err.tag(), json!({ "message": err.to_string() }));
                return PhaseOutcome::DiagnosisUnavailable;
            }
        };
        let signals = cycle.signals.take().unwrap_or_else(|| {
            self.extractor.extract(
                &state.clean_logs,
                state.last_exit_code.unwrap_or(1),
                Some(&workdir),
            )
        });

        let decision = self.anchors.resolve(&signals, &tree, &state.failure_history);
        let hypotheses = self.anchors.hypotheses(&signals, &tree);
        state.record(
            "ANCHOR",
            json!({
                "anchor": decision.anchor(),
                "stuck": matches!(decision, AnchorDecision::Scan { stuck: true }),
                "hypotheses": hypotheses,
            }),
        );

        let context = self.anchors.build_context(
            &decision,
            &tree,
            &state.clean_logs,
            self.settings.max_context_bytes,
        );
        let request = DiagnosisRequest {
            signals: &signals,
            context: &context,
            already_attempted: state.fixes(),
            tree: &tree,
            model: state.model.as_deref(),
        };

        match self.diagnoser.diagnose(request).await {
            Ok(diagnosis) => {
                state.record(
                    "DIAGNOSIS",
                    json!({
                        "file": diagnosis.target_file,
                        "line": diagnosis.target_line,
                        "bug_type": diagnosis.category,
                        "expected_exceptions": diagnosis.expected_exceptions,
                    }),
                );
                cycle.diagnosis = Some(diagnosis);
                cycle.signals = Some(signals);
                cycle.tree = Some(tree);
                PhaseOutcome::DiagnosisReady
            }
            Err(e) => {
                warn!(error = %e, "diagnosis unavailable");
                state.record(e.tag(), json!({ "message": e.to_string() }));
                PhaseOutcome::DiagnosisUnavailable
            }
        }
    }

    async fn patch(&self, state: &mut RunState, cycle: &mut Cycle) -> PhaseOutcome {
        let (Some(diagnosis), Some(tree)) = (cycle.diagnosis.take(), cycle.tree.take()) else {
            return PhaseOutcome::PatchRejected;
        };
        let collection_failure = cycle
            .signals
            .as_ref()
            .is_some_and(|s| s.collection_failure);

        let result = self
            .patcher
            .patch(PatchRequest {
                diagnosis: &diagnosis,
                tree: &tree,
                raw_log: &state.raw_logs,
                collection_failure,
                run_id: state.run_id,
                iteration: state.retry_count,
                model: state.model.as_deref(),
            })
            .await;

        match result {
            Ok(fix) => {
                state.record(
                    "FIX_APPLIED",
                    json!({ "path": fix.path, "bug_type": fix.bug_type, "line": fix.line }),
                );
                if let Err(e) = self.telemetry.fix_applied(state, &fix).await {
                    warn!(error = %format!("{e:#}"), "telemetry fix_applied failed");
                    state.record(
                        "TELEMETRY_FAILURE",
                        json!({ "event": "fix_applied", "error": format!("{e:#}") }),
                    );
                }
                state.push_fix(fix);
                PhaseOutcome::PatchApplied
            }
            Err(e) => {
                warn!(error = %e, "no patch applied this iteration");
                state.record(
                    e.tag(),
                    json!({ "message": e.to_string(), "target": diagnosis.target_file }),
                );
                PhaseOutcome::PatchRejected
            }
        }
    }

    async fn publish(&self, state: &mut RunState) -> PhaseOutcome {
        let Some(publisher) = &self.publisher else {
            state.record("PUBLISH_SKIPPED", json!({}));
            return PhaseOutcome::Published;
        };

        match publisher.publish(state).await {
            Ok(outcome) => {
                if outcome.conflict_recovered {
                    state.record(
                        "PUBLISH_CONFLICT",
                        json!({ "branch": outcome.branch, "recovery": "rebase aborted, reset to remote" }),
                    );
                }
                if let Some(failure) = &outcome.failure {
                    state.record(
                        HealError::PublishFailure(failure.clone()).tag(),
                        json!({ "message": failure }),
                    );
                }
                state.record(
                    "PUBLISH",
                    json!({
                        "branch": outcome.branch,
                        "committed": outcome.committed,
                        "pushed": outcome.pushed,
                        "pr_url": outcome.pr_url,
                    }),
                );
                state.branch_name = Some(outcome.branch);
                state.branch_pushed = outcome.pushed;
                if outcome.pr_url.is_some() {
                    state.pr_url = outcome.pr_url;
                }
            }
            Err(e) => {
                warn!(error = %e, "publish aborted");
                state.branch_pushed = false;
                state.record(e.tag(), json!({ "message": e.to_string() }));
            }
        }
        PhaseOutcome::Published
    }

    /// Terminal phases: fix the final status before scoring.
    fn conclude(&self, state: &mut RunState) -> PhaseOutcome {
        state.final_status = if state.phase == Phase::Passed {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };
        state.record(state.phase.as_str(), json!({ "retry_count": state.retry_count }));
        PhaseOutcome::Scored
    }

    async fn score(&self, state: &mut RunState) -> PhaseOutcome {
        if state.final_status == RunStatus::Pending {
            state.final_status = RunStatus::Failed;
        }
        state.finished_at = Some(chrono::Utc::now());
        let score = self.scorer.score(state);
        state.score = Some(score);
        state.record(
            "SCORED",
            json!({
                "final_score": score.final_score,
                "base_score": score.base_score,
                "speed_bonus": score.speed_bonus,
                "efficiency_penalty": score.efficiency_penalty,
                "status": state.final_status,
            }),
        );

        let record = self.result_record(state);
        if let Err(e) = self.telemetry.run_finalized(&record).await {
            warn!(error = %format!("{e:#}"), "telemetry run_finalized failed");
            state.record(
                "TELEMETRY_FAILURE",
                json!({ "event": "run_finalized", "error": format!("{e:#}") }),
            );
        }

        state.seal();
        PhaseOutcome::Scored
    }
}
