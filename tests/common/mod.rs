//! Common test utilities for integration tests
//!
//! Fakes for the orchestration ports plus small repository fixtures.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use ci_healer::domain::errors::HealResult;
use ci_healer::domain::models::{Config, Stack};
use ci_healer::domain::ports::{
    Discovery, DiscoveryReport, GitWorkspace, NullTelemetry, Sandbox, SandboxOutcome,
};
use ci_healer::infrastructure::reasoning::ScriptedReasoningClient;
use ci_healer::services::OrchestratorPorts;

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Discovery double answering from a closure.
pub struct FakeDiscovery {
    answer: Box<dyn Fn() -> HealResult<DiscoveryReport> + Send + Sync>,
}

impl FakeDiscovery {
    pub fn found(workdir: &Path, stack: Stack, test_files: &[&str]) -> Self {
        let report = DiscoveryReport {
            workdir: workdir.to_path_buf(),
            stack,
            test_files: test_files.iter().map(PathBuf::from).collect(),
        };
        Self {
            answer: Box::new(move || Ok(report.clone())),
        }
    }

    pub fn failing(
        error: impl Fn() -> ci_healer::domain::errors::HealError + Send + Sync + 'static,
    ) -> Self {
        Self {
            answer: Box::new(move || Err(error())),
        }
    }
}

#[async_trait]
impl Discovery for FakeDiscovery {
    async fn discover(&self, _repo_url: &str, _team_name: &str) -> HealResult<DiscoveryReport> {
        (self.answer)()
    }
}

/// Sandbox double replaying outcomes in order. The last outcome repeats once
/// the queue is drained.
pub struct SequenceSandbox {
    outcomes: Mutex<VecDeque<SandboxOutcome>>,
    last: Mutex<Option<SandboxOutcome>>,
    runs: Mutex<u32>,
}

impl SequenceSandbox {
    pub fn new(outcomes: Vec<SandboxOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            last: Mutex::new(None),
            runs: Mutex::new(0),
        }
    }

    pub fn runs(&self) -> u32 {
        *self.runs.lock().unwrap()
    }
}

#[async_trait]
impl Sandbox for SequenceSandbox {
    async fn run(&self, _stack: Stack, _workdir: &Path, _timeout: Duration) -> SandboxOutcome {
        *self.runs.lock().unwrap() += 1;
        let next = self.outcomes.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last.clone().unwrap_or_else(|| failing("no outcome scripted", 1)),
        }
    }
}

pub fn passing(log: &str) -> SandboxOutcome {
    SandboxOutcome {
        exit_code: 0,
        log: log.to_string(),
        raw_log: log.to_string(),
        failure: None,
        fallback_used: false,
    }
}

pub fn failing(log: &str, exit_code: i32) -> SandboxOutcome {
    SandboxOutcome {
        exit_code,
        log: log.to_string(),
        raw_log: log.to_string(),
        failure: None,
        fallback_used: false,
    }
}

/// Git double that succeeds at everything and records calls in order.
#[derive(Default)]
pub struct RecordingGit {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingGit {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl GitWorkspace for RecordingGit {
    async fn checkout_or_create(&self, _repo: &Path, branch: &str) -> anyhow::Result<()> {
        self.log(format!("checkout {branch}"));
        Ok(())
    }

    async fn untrack_all(&self, _repo: &Path) -> anyhow::Result<()> {
        self.log("untrack");
        Ok(())
    }

    async fn stage_all(&self, _repo: &Path) -> anyhow::Result<()> {
        self.log("stage");
        Ok(())
    }

    async fn has_staged_changes(&self, _repo: &Path) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn commit(&self, _repo: &Path, message: &str) -> anyhow::Result<()> {
        self.log(format!("commit {message}"));
        Ok(())
    }

    async fn fetch_remote_branch(&self, _repo: &Path, _branch: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn rebase_onto_fetched(&self, _repo: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    async fn abort_rebase(&self, _repo: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reset_hard_to_fetched(&self, _repo: &Path) -> anyhow::Result<()> {
        Ok(())
    }

    async fn push(&self, _repo: &Path, branch: &str) -> anyhow::Result<()> {
        self.log(format!("push {branch}"));
        Ok(())
    }

    async fn remote_url(&self, _repo: &Path) -> anyhow::Result<Option<String>> {
        Ok(Some("https://github.com/acme/calc.git".to_string()))
    }
}

/// Config for tests: backups under `scratch`, no retry sleeps, no PR host.
pub fn test_config(scratch: &Path) -> Config {
    let mut config = Config::default();
    config.healing.scratch_dir = scratch.join("backups");
    config.healing.workspace_dir = scratch.join("workspaces");
    config.results.path = scratch.join("results.json");
    config.retry.max_retries = 0;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config.publish.github_token = None;
    config
}

pub struct Harness {
    pub sandbox: Arc<SequenceSandbox>,
    pub reasoning: Arc<ScriptedReasoningClient>,
    pub git: Arc<RecordingGit>,
    pub ports: OrchestratorPorts,
}

pub fn harness(
    discovery: FakeDiscovery,
    outcomes: Vec<SandboxOutcome>,
    reasoning: ScriptedReasoningClient,
) -> Harness {
    let sandbox = Arc::new(SequenceSandbox::new(outcomes));
    let reasoning = Arc::new(reasoning);
    let git = Arc::new(RecordingGit::default());
    let ports = OrchestratorPorts {
        discovery: Arc::new(discovery),
        sandbox: sandbox.clone(),
        reasoning: reasoning.clone(),
        git: git.clone(),
        pr_host: None,
        telemetry: Arc::new(NullTelemetry),
    };
    Harness {
        sandbox,
        reasoning,
        git,
        ports,
    }
}

pub const BROKEN_CALC: &str = "\
def add(a, b):
    return a + b


# subtraction
def subtract(a, b)
    return a - b
";

pub const FIXED_CALC: &str = "\
def add(a, b):
    return a + b


# subtraction
def subtract(a, b):
    return a - b
";

pub const CALC_TEST: &str = "\
from calc import add, subtract


def test_add():
    assert add(1, 2) == 3


def test_subtract():
    assert subtract(3, 1) == 2
";

/// Python repository with a missing colon on line 6 of `calc.py`.
pub fn broken_calc_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("calc.py"), BROKEN_CALC).unwrap();
    std::fs::write(dir.path().join("test_calc.py"), CALC_TEST).unwrap();
    dir
}

/// pytest output for the broken calc repository.
pub fn syntax_error_log(workdir: &Path) -> String {
    format!(
        "============================= test session starts ==============================\n\
         collected 0 items / 1 error\n\
         \n\
         ==================================== ERRORS ====================================\n\
         ________________________ ERROR collecting test_calc.py _________________________\n\
         {root}/test_calc.py:1: in <module>\n\
         \x20   from calc import add, subtract\n\
         E     File \"{root}/calc.py\", line 6\n\
         E       def subtract(a, b)\n\
         E                         ^\n\
         E   SyntaxError: expected ':'\n\
         =========================== short test summary info ============================\n\
         ERROR test_calc.py\n\
         !!!!!!!!!!!!!!!!!!!! Interrupted: 1 error during collection !!!!!!!!!!!!!!!!!!!!!\n\
         =============================== 1 error in 0.05s ===============================\n",
        root = workdir.display()
    )
}

pub const PASSING_LOG: &str = "\
============================= test session starts ==============================
collected 2 items

test_calc.py::test_add PASSED                                            [ 50%]
test_calc.py::test_subtract PASSED                                       [100%]

============================== 2 passed in 0.01s ===============================
";

/// `git init` with a fixed identity and one commit of everything in `dir`.
pub fn git_init_with_commit(dir: &Path) {
    git(dir, &["init", "--quiet", "--initial-branch=main"]);
    git(dir, &["config", "user.name", "Fixture"]);
    git(dir, &["config", "user.email", "fixture@example.com"]);
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", "initial"]);
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .expect("git is installed");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}
