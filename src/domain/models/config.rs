use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main configuration structure for ci-healer
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Reasoning capability (LLM endpoint) configuration
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Retry policy for reasoning calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Sandbox execution configuration
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Healing loop configuration
    #[serde(default)]
    pub healing: HealingConfig,

    /// Score policy constants
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Branch/commit/push/PR configuration
    #[serde(default)]
    pub publish: PublishConfig,

    /// Persisted results configuration
    #[serde(default)]
    pub results: ResultsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for stdout
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for rolling log files (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log rotation policy for file output
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Enable stdout logging
    #[serde(default = "default_true")]
    pub enable_stdout: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            rotation: RotationPolicy::default(),
            enable_stdout: true,
        }
    }
}

/// Reasoning capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReasoningConfig {
    /// Base URL of the messages API (for testing/proxies)
    #[serde(default = "default_reasoning_base_url")]
    pub base_url: String,

    /// API key (usually supplied through HEALER_REASONING__API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model used when a request carries no model selector
    #[serde(default = "default_reasoning_model")]
    pub model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_reasoning_timeout")]
    pub timeout_secs: u64,

    /// Maximum tokens to generate per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_reasoning_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_reasoning_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

const fn default_reasoning_timeout() -> u64 {
    120
}

const fn default_max_tokens() -> u32 {
    8192
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: default_reasoning_base_url(),
            api_key: None,
            model: default_reasoning_model(),
            timeout_secs: default_reasoning_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    2_000
}

const fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Where the sandbox runs commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Disposable container with the working tree mounted at /app
    #[default]
    Docker,
    /// Host process in its own process group (no isolation, for CI hosts without docker)
    Local,
}

/// Command template for one stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StackTemplate {
    /// Container image
    pub image: String,

    /// Shell command running the test suite
    pub test_command: String,

    /// Exit code meaning "zero tests collected"
    #[serde(default)]
    pub no_tests_exit_code: Option<i32>,

    /// Interpreter used to launch the entry point during fallback execution
    pub entrypoint_runner: String,

    /// Entry point candidates, tried in order
    #[serde(default)]
    pub entrypoint_candidates: Vec<String>,
}

impl StackTemplate {
    pub fn python() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            test_command: "([ -f requirements.txt ] && pip install -r requirements.txt --quiet) 2>&1; \
                           pip install pytest --quiet 2>&1; \
                           pytest -v --tb=short 2>&1"
                .to_string(),
            no_tests_exit_code: Some(5),
            entrypoint_runner: "python".to_string(),
            entrypoint_candidates: ["main.py", "app.py", "run.py", "src/main.py", "__main__.py"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    pub fn node() -> Self {
        Self {
            image: "node:18".to_string(),
            test_command: "npm install 2>&1 && npm test 2>&1".to_string(),
            no_tests_exit_code: None,
            entrypoint_runner: "node".to_string(),
            entrypoint_candidates: ["index.js", "src/index.js", "main.js", "app.js"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,

    /// Hard wall-clock timeout per execution in seconds
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    /// Container runtime binary
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,

    /// Prefix for container names
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    #[serde(default = "StackTemplate::python")]
    pub python: StackTemplate,

    #[serde(default = "StackTemplate::node")]
    pub node: StackTemplate,

    /// Whether a clean entry-point run counts as a pass when no tests exist
    #[serde(default = "default_true")]
    pub fallback_success_passes: bool,
}

const fn default_sandbox_timeout() -> u64 {
    300
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_container_prefix() -> String {
    "ci-healer".to_string()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            timeout_secs: default_sandbox_timeout(),
            docker_binary: default_docker_binary(),
            container_prefix: default_container_prefix(),
            python: StackTemplate::python(),
            node: StackTemplate::node(),
            fallback_success_passes: true,
        }
    }
}

/// Healing loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealingConfig {
    /// Iteration budget when a request does not specify one
    #[serde(default = "default_max_iterations")]
    pub default_max_iterations: u32,

    /// Directory receiving cloned repositories
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// Directory receiving pre-patch backups
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,

    /// Lines kept from the end of the log when no FAILURES block exists
    #[serde(default = "default_failure_tail_lines")]
    pub failure_tail_lines: usize,

    /// Minimum non-whitespace characters for a log to be diagnosable
    #[serde(default = "default_min_signal_chars")]
    pub min_signal_chars: usize,

    /// Cap on source bytes handed to the diagnosis step
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,

    /// Number of recent failure counts kept for stuck detection
    #[serde(default = "default_failure_history_window")]
    pub failure_history_window: usize,
}

const fn default_max_iterations() -> u32 {
    5
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("temp_repos")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from(".ci-healer/backups")
}

const fn default_failure_tail_lines() -> usize {
    80
}

const fn default_min_signal_chars() -> usize {
    16
}

const fn default_max_context_bytes() -> usize {
    120_000
}

const fn default_failure_history_window() -> usize {
    5
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: default_max_iterations(),
            workspace_dir: default_workspace_dir(),
            scratch_dir: default_scratch_dir(),
            failure_tail_lines: default_failure_tail_lines(),
            min_signal_chars: default_min_signal_chars(),
            max_context_bytes: default_max_context_bytes(),
            failure_history_window: default_failure_history_window(),
        }
    }
}

/// Score policy constants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ScoringConfig {
    /// Runs finishing under this many seconds earn the speed bonus
    #[serde(default = "default_speed_window")]
    pub speed_bonus_window_secs: u64,

    #[serde(default = "default_speed_bonus")]
    pub speed_bonus_points: i64,

    /// Commits beyond this count are penalized
    #[serde(default = "default_commit_threshold")]
    pub penalty_commit_threshold: usize,

    #[serde(default = "default_penalty_per_commit")]
    pub penalty_per_commit: i64,
}

const fn default_speed_window() -> u64 {
    300
}

const fn default_speed_bonus() -> i64 {
    10
}

const fn default_commit_threshold() -> usize {
    20
}

const fn default_penalty_per_commit() -> i64 {
    2
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            speed_bonus_window_secs: default_speed_window(),
            speed_bonus_points: default_speed_bonus(),
            penalty_commit_threshold: default_commit_threshold(),
            penalty_per_commit: default_penalty_per_commit(),
        }
    }
}

/// Publish configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PublishConfig {
    /// Skip branch/commit/push entirely when false
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Git remote name
    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Token used for authenticated push and PR creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,

    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,

    #[serde(default = "default_commit_prefix")]
    pub commit_prefix: String,

    #[serde(default = "default_branch_suffix")]
    pub branch_suffix: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_author_name() -> String {
    "AI Agent".to_string()
}

fn default_author_email() -> String {
    "agent@ci-healer.local".to_string()
}

fn default_commit_prefix() -> String {
    "[AI-AGENT]".to_string()
}

fn default_branch_suffix() -> String {
    "AI_FIX".to_string()
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            remote: default_remote(),
            github_api_url: default_github_api_url(),
            github_token: None,
            author_name: default_author_name(),
            author_email: default_author_email(),
            commit_prefix: default_commit_prefix(),
            branch_suffix: default_branch_suffix(),
        }
    }
}

/// Persisted results configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ResultsConfig {
    /// Append-only results file
    #[serde(default = "default_results_path")]
    pub path: PathBuf,
}

fn default_results_path() -> PathBuf {
    PathBuf::from("results.json")
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            path: default_results_path(),
        }
    }
}
