//! Clone a repository and describe its stack and tests.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::domain::errors::{HealError, HealResult};
use crate::domain::models::Stack;
use crate::domain::ports::{Discovery, DiscoveryReport};
use crate::infrastructure::git::inject_token;
use crate::infrastructure::logging::{redact_url, scrub};
use crate::services::publisher::sanitize;

const STACK_SCAN_DEPTH: usize = 3;
const SKIPPED: &[&str] = &[".git", "node_modules", "__pycache__"];
const PYTHON_MARKERS: &[&str] = &["requirements.txt", "pyproject.toml", "setup.py"];

fn skipped(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIPPED.contains(&name))
}

/// Detect the stack, most specific marker first, at most three levels deep.
pub fn detect_stack(root: &Path) -> Stack {
    let files: Vec<String> = WalkDir::new(root)
        .max_depth(STACK_SCAN_DEPTH)
        .into_iter()
        .filter_entry(|e| !skipped(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.file_name().to_str().map(ToString::to_string))
        .collect();

    let has = |name: &str| files.iter().any(|f| f == name);
    if PYTHON_MARKERS.iter().any(|m| has(m)) || files.iter().any(|f| f.ends_with(".py")) {
        Stack::Python
    } else if has("package.json") {
        Stack::Node
    } else {
        Stack::Unknown
    }
}

fn is_test_name(stack: Stack, name: &str) -> bool {
    match stack {
        Stack::Python => {
            (name.starts_with("test_") && name.ends_with(".py")) || name.ends_with("_test.py")
        }
        Stack::Node => [".test.js", ".spec.js", ".test.ts", ".spec.ts"]
            .iter()
            .any(|suffix| name.ends_with(suffix)),
        Stack::Unknown => false,
    }
}

/// Repository-relative test files for `stack`, sorted and deduplicated.
pub fn discover_tests(root: &Path, stack: Stack) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !skipped(e))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(|n| is_test_name(stack, n)))
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Last path segment of a repository URL without `.git`.
pub fn repo_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url)
        .trim_end_matches(".git")
        .to_string()
}

/// Clones with the `git` binary into `<workspace>/<TEAM>_<repo>`.
pub struct RepoDiscovery {
    workspace_dir: PathBuf,
    token: Option<String>,
}

impl RepoDiscovery {
    pub fn new(workspace_dir: impl Into<PathBuf>, token: Option<String>) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn checkout_dir(&self, repo_url: &str, team_name: &str) -> PathBuf {
        self.workspace_dir
            .join(format!("{}_{}", sanitize(team_name), repo_name(repo_url)))
    }

    async fn clone(&self, repo_url: &str, target: &Path) -> HealResult<()> {
        if target.exists() {
            tokio::fs::remove_dir_all(target).await?;
        }
        tokio::fs::create_dir_all(&self.workspace_dir).await?;

        let url = match &self.token {
            Some(token) => inject_token(repo_url, token),
            None => repo_url.to_string(),
        };
        let output = Command::new("git")
            .arg("clone")
            .arg(&url)
            .arg(target)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(HealError::CloneFailure {
                repo: redact_url(repo_url),
                reason: scrub(String::from_utf8_lossy(&output.stderr).trim()),
            });
        }

        // Keep the plain URL in .git/config.
        if url != repo_url {
            let reset = Command::new("git")
                .current_dir(target)
                .args(["remote", "set-url", "origin", repo_url])
                .output()
                .await?;
            if !reset.status.success() {
                warn!("could not reset origin URL after authenticated clone");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Discovery for RepoDiscovery {
    #[instrument(skip(self, repo_url), fields(repo = %redact_url(repo_url)))]
    async fn discover(&self, repo_url: &str, team_name: &str) -> HealResult<DiscoveryReport> {
        let workdir = self.checkout_dir(repo_url, team_name);
        self.clone(repo_url, &workdir).await?;

        let mut entries = tokio::fs::read_dir(&workdir).await?;
        let mut has_content = false;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() != ".git" {
                has_content = true;
                break;
            }
        }
        if !has_content {
            return Err(HealError::EmptyCheckout(workdir));
        }

        let stack = detect_stack(&workdir);
        let test_files = discover_tests(&workdir, stack);
        info!(stack = %stack, tests = test_files.len(), workdir = %workdir.display(), "repository discovered");

        if stack == Stack::Python && test_files.is_empty() {
            return Err(HealError::ZeroTestGuardTripped { stack });
        }

        Ok(DiscoveryReport {
            workdir,
            stack,
            test_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_detect_stack() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_stack(dir.path()), Stack::Unknown);

        fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(detect_stack(dir.path()), Stack::Node);

        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::write(dir.path().join("src/app/calc.py"), "").unwrap();
        assert_eq!(detect_stack(dir.path()), Stack::Python);
    }

    #[test]
    fn test_detect_stack_ignores_node_modules_and_depth() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        fs::write(dir.path().join("node_modules/x/setup.py"), "").unwrap();
        fs::create_dir_all(dir.path().join("a/b/c/d")).unwrap();
        fs::write(dir.path().join("a/b/c/d/deep.py"), "").unwrap();
        assert_eq!(detect_stack(dir.path()), Stack::Node);
    }

    #[test]
    fn test_discover_tests() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tests")).unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("tests/test_calc.py"), "").unwrap();
        fs::write(dir.path().join("calc_test.py"), "").unwrap();
        fs::write(dir.path().join("calc.py"), "").unwrap();
        fs::write(dir.path().join("__pycache__/test_calc.py"), "").unwrap();

        assert_eq!(
            discover_tests(dir.path(), Stack::Python),
            vec![PathBuf::from("calc_test.py"), PathBuf::from("tests/test_calc.py")]
        );
        assert!(discover_tests(dir.path(), Stack::Node).is_empty());
    }

    #[test]
    fn test_checkout_dir() {
        let discovery = RepoDiscovery::new("/tmp/ws", None);
        assert_eq!(
            discovery.checkout_dir("https://github.com/acme/calc-app.git", "Team One"),
            PathBuf::from("/tmp/ws/TEAM_ONE_calc-app")
        );
        assert_eq!(repo_name("git@github.com:acme/calc.git"), "calc");
    }
}
