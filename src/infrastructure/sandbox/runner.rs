use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::normalize::clean_log;
use crate::domain::models::config::{SandboxConfig, SandboxMode, StackTemplate};
use crate::domain::models::Stack;
use crate::domain::ports::{Sandbox, SandboxFailure, SandboxOutcome};

/// Exit code reported when the wall-clock timeout fires.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Appended to the log of a timed-out run.
pub const TIMEOUT_MARKER: &str = "[sandbox] TIMEOUT";

/// Runner output markers meaning "there was nothing to test".
const NO_TESTS_MARKERS: &[&str] = &[
    "Error: no test specified",
    "Missing script: \"test\"",
    "No tests found",
    "no tests ran",
];

const CONTAINER_MOUNT: &str = "/app";

#[derive(Debug)]
struct Execution {
    exit_code: i32,
    output: String,
    timed_out: bool,
}

/// Runs a stack's test command in a container or a local process group.
///
/// Containers are started with `--rm` and additionally force-removed after
/// every execution, whatever the outcome.
pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub const fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Unknown stacks use the Python template.
    pub const fn template(&self, stack: Stack) -> &StackTemplate {
        match stack {
            Stack::Python | Stack::Unknown => &self.config.python,
            Stack::Node => &self.config.node,
        }
    }

    /// First fallback entry point present in `workdir`. For Node the
    /// `main` field of `package.json` wins over the fixed candidates.
    pub fn entrypoint(&self, stack: Stack, workdir: &Path) -> Option<String> {
        let template = self.template(stack);
        if stack == Stack::Node {
            if let Some(main) = package_main(workdir) {
                return Some(main);
            }
        }
        template
            .entrypoint_candidates
            .iter()
            .find(|candidate| workdir.join(candidate).is_file())
            .cloned()
    }

    fn command(&self, image: &str, workdir: &Path, script: &str, container: &str) -> Command {
        match self.config.mode {
            SandboxMode::Docker => {
                let mount = workdir
                    .canonicalize()
                    .unwrap_or_else(|_| workdir.to_path_buf());
                let mut cmd = Command::new(&self.config.docker_binary);
                cmd.args(["run", "--rm", "--name", container])
                    .arg("-v")
                    .arg(format!("{}:{CONTAINER_MOUNT}", mount.display()))
                    .args(["-w", CONTAINER_MOUNT, image, "sh", "-c", script]);
                cmd
            }
            SandboxMode::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(script).current_dir(workdir);
                cmd
            }
        }
    }

    async fn execute(
        &self,
        image: &str,
        workdir: &Path,
        script: &str,
        timeout: Duration,
    ) -> Result<Execution, String> {
        let container = format!("{}-{}", self.config.container_prefix, Uuid::new_v4().simple());
        let command = self.command(image, workdir, script, &container);

        debug!(mode = ?self.config.mode, script, "sandbox execution starting");
        let result = spawn_and_wait(command, timeout).await;

        if self.config.mode == SandboxMode::Docker {
            self.remove_container(&container).await;
        }
        result
    }

    async fn remove_container(&self, name: &str) {
        let result = Command::new(&self.config.docker_binary)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            debug!(container = name, error = %e, "container cleanup failed");
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    #[instrument(skip_all, fields(stack = %stack, workdir = %workdir.display(), mode = ?self.config.mode))]
    async fn run(&self, stack: Stack, workdir: &Path, timeout: Duration) -> SandboxOutcome {
        let template = self.template(stack);
        if stack == Stack::Unknown {
            debug!("unknown stack, using the python template");
        }

        let execution = match self
            .execute(&template.image, workdir, &template.test_command, timeout)
            .await
        {
            Ok(execution) => execution,
            Err(message) => {
                warn!(error = %message, "sandbox execution failed");
                return failed_outcome(SandboxFailure::Execution(message));
            }
        };

        if execution.timed_out {
            warn!(timeout_secs = timeout.as_secs(), "sandbox timed out");
            let raw = format!(
                "{}\n{TIMEOUT_MARKER} after {}s\n",
                execution.output,
                timeout.as_secs()
            );
            return SandboxOutcome {
                exit_code: TIMEOUT_EXIT_CODE,
                log: clean_log(&raw),
                raw_log: raw,
                failure: Some(SandboxFailure::Timeout(timeout.as_secs())),
                fallback_used: false,
            };
        }

        if is_no_tests(template, &execution) {
            if let Some(entry) = self.entrypoint(stack, workdir) {
                info!(entry = %entry, "no tests collected, running entry point");
                return self
                    .run_entrypoint(template, workdir, &entry, &execution.output, timeout)
                    .await;
            }
            debug!("no tests collected and no entry point found");
        }

        info!(exit_code = execution.exit_code, "sandbox run finished");
        SandboxOutcome {
            exit_code: execution.exit_code,
            log: clean_log(&execution.output),
            raw_log: execution.output,
            failure: None,
            fallback_used: false,
        }
    }
}

impl ProcessSandbox {
    async fn run_entrypoint(
        &self,
        template: &StackTemplate,
        workdir: &Path,
        entry: &str,
        test_output: &str,
        timeout: Duration,
    ) -> SandboxOutcome {
        let script = format!("{} {} 2>&1", template.entrypoint_runner, shell_quote(entry));
        match self.execute(&template.image, workdir, &script, timeout).await {
            Ok(execution) if execution.timed_out => {
                let raw = format!(
                    "{test_output}\n{}\n{TIMEOUT_MARKER} after {}s\n",
                    execution.output,
                    timeout.as_secs()
                );
                SandboxOutcome {
                    exit_code: TIMEOUT_EXIT_CODE,
                    log: clean_log(&raw),
                    raw_log: raw,
                    failure: Some(SandboxFailure::Timeout(timeout.as_secs())),
                    fallback_used: true,
                }
            }
            Ok(execution) => {
                let raw = format!("{test_output}\n[sandbox] entry point {entry}\n{}", execution.output);
                SandboxOutcome {
                    exit_code: execution.exit_code,
                    log: clean_log(&raw),
                    raw_log: raw,
                    failure: None,
                    fallback_used: true,
                }
            }
            Err(message) => SandboxOutcome {
                fallback_used: true,
                ..failed_outcome(SandboxFailure::Execution(message))
            },
        }
    }
}

fn is_no_tests(template: &StackTemplate, execution: &Execution) -> bool {
    !execution.timed_out
        && execution.exit_code != 0
        && (template.no_tests_exit_code == Some(execution.exit_code)
            || NO_TESTS_MARKERS.iter().any(|m| execution.output.contains(m)))
}

fn failed_outcome(failure: SandboxFailure) -> SandboxOutcome {
    let message = match &failure {
        SandboxFailure::Timeout(secs) => format!("{TIMEOUT_MARKER} after {secs}s"),
        SandboxFailure::Execution(message) => format!("[sandbox] {message}"),
    };
    SandboxOutcome {
        exit_code: -1,
        log: message.clone(),
        raw_log: message,
        failure: Some(failure),
        fallback_used: false,
    }
}

fn package_main(workdir: &Path) -> Option<String> {
    let manifest = std::fs::read_to_string(workdir.join("package.json")).ok()?;
    let value: serde_json::Value = serde_json::from_str(&manifest).ok()?;
    let main = value.get("main")?.as_str()?.trim_start_matches("./").to_string();
    workdir.join(&main).is_file().then_some(main)
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Spawn `command` in its own process group and wait at most `timeout`.
/// On timeout the whole group is killed.
async fn spawn_and_wait(mut command: Command, timeout: Duration) -> Result<Execution, String> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|e| format!("failed to spawn sandbox: {e}"))?;
    let pid = child.id();
    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    let (exit_code, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
        Ok(Err(e)) => return Err(format!("failed to wait for sandbox: {e}")),
        Err(_) => {
            kill_group(pid);
            if let Err(e) = child.kill().await {
                debug!(error = %e, "sandbox process already gone");
            }
            (TIMEOUT_EXIT_CODE, true)
        }
    };

    let mut output = collect(stdout).await;
    output.push_str(&collect(stderr).await);
    Ok(Execution {
        exit_code,
        output,
        timed_out,
    })
}

fn spawn_reader<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(e) = reader.read_to_end(&mut buf).await {
                debug!(error = %e, "sandbox output stream closed early");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Readers end when the pipes close; a surviving grandchild holding a pipe
/// must not hang the run.
async fn collect(handle: JoinHandle<String>) -> String {
    match tokio::time::timeout(Duration::from_secs(5), handle).await {
        Ok(Ok(text)) => text,
        _ => String::new(),
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pid, error = %e, "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;

    fn local_sandbox(python_cmd: &str, no_tests_exit: Option<i32>) -> ProcessSandbox {
        let mut config = SandboxConfig {
            mode: SandboxMode::Local,
            ..SandboxConfig::default()
        };
        config.python.test_command = python_cmd.to_string();
        config.python.no_tests_exit_code = no_tests_exit;
        config.python.entrypoint_runner = "sh".to_string();
        config.python.entrypoint_candidates = vec!["main.sh".to_string()];
        ProcessSandbox::new(config)
    }

    #[tokio::test]
    async fn test_local_run_captures_exit_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = local_sandbox("echo '\x1b[31mFAILED\x1b[0m tests/test_a.py::test_x'; exit 1", Some(5));

        let outcome = sandbox.run(Stack::Python, dir.path(), Duration::from_secs(10)).await;

        assert_eq!(outcome.exit_code, 1);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.log, "FAILED tests/test_a.py::test_x\n");
        assert!(outcome.raw_log.contains("\x1b[31m"));
        assert!(!outcome.passed());
    }

    #[tokio::test]
    async fn test_timeout_kills_group_and_reports_124() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = local_sandbox("echo started; sleep 30 & sleep 30", None);

        let started = Instant::now();
        let outcome = sandbox.run(Stack::Python, dir.path(), Duration::from_secs(1)).await;

        assert!(started.elapsed() < Duration::from_secs(15));
        assert_eq!(outcome.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(outcome.failure, Some(SandboxFailure::Timeout(1)));
        assert!(outcome.raw_log.contains(TIMEOUT_MARKER));
        assert!(outcome.raw_log.contains("started"));
    }

    #[tokio::test]
    async fn test_no_tests_falls_back_to_entrypoint() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.sh"), "echo entry ran\n").unwrap();
        let sandbox = local_sandbox("echo 'collected 0 items'; exit 5", Some(5));

        let outcome = sandbox.run(Stack::Python, dir.path(), Duration::from_secs(10)).await;

        assert!(outcome.fallback_used);
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.log.contains("entry ran"));
        assert!(outcome.passed());
    }

    #[tokio::test]
    async fn test_entrypoint_gets_the_full_timeout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.sh"), "sleep 2\necho entry ran\n").unwrap();
        let sandbox = local_sandbox("sleep 2; exit 5", Some(5));

        let outcome = sandbox.run(Stack::Python, dir.path(), Duration::from_secs(3)).await;

        assert!(outcome.fallback_used);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.log.contains("entry ran"));
    }

    #[tokio::test]
    async fn test_no_tests_without_entrypoint_keeps_original_code() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = local_sandbox("exit 5", Some(5));

        let outcome = sandbox.run(Stack::Python, dir.path(), Duration::from_secs(10)).await;

        assert!(!outcome.fallback_used);
        assert_eq!(outcome.exit_code, 5);
    }

    #[tokio::test]
    async fn test_unknown_stack_uses_python_template() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = local_sandbox("echo python template; exit 3", None)
            .run(Stack::Unknown, dir.path(), Duration::from_secs(10))
            .await;
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.log.contains("python template"));
    }

    #[test]
    fn test_node_entrypoint_prefers_package_main() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib/server.js"), "").unwrap();
        fs::write(dir.path().join("index.js"), "").unwrap();
        fs::write(dir.path().join("package.json"), r#"{"main": "./lib/server.js"}"#).unwrap();

        let sandbox = ProcessSandbox::new(SandboxConfig::default());
        assert_eq!(sandbox.entrypoint(Stack::Node, dir.path()), Some("lib/server.js".to_string()));

        fs::write(dir.path().join("package.json"), r#"{"name": "x"}"#).unwrap();
        assert_eq!(sandbox.entrypoint(Stack::Node, dir.path()), Some("index.js".to_string()));
    }
}
