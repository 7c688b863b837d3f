//! Publisher: deterministic branch, hygiene, commit, conflict-safe push and
//! idempotent pull request.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::domain::errors::{HealError, HealResult};
use crate::domain::models::{PublishConfig, RunState};
use crate::domain::ports::{
    GitWorkspace, PullRequestHost, PullRequestOutcome, PullRequestSpec, RepoCoordinates,
};

/// Entries merged into the repository's `.gitignore`.
pub const IGNORE_ENTRIES: &[&str] = &["__pycache__/", "*.pyc", ".pytest_cache/", ".env", "node_modules/"];

/// Uppercase, map spaces and hyphens to `_`, drop everything outside `[A-Z0-9_]`.
pub fn sanitize(s: &str) -> String {
    s.trim()
        .to_uppercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Branch name for a (team, leader) pair. Pure and stable across restarts.
pub fn branch_name(team: &str, leader: &str, suffix: &str) -> String {
    format!("{}_{}_{}", sanitize(team), sanitize(leader), suffix)
}

/// Remove `__pycache__`, `.pytest_cache` and `*.pyc` below `root`.
pub fn purge_caches(root: &Path) -> usize {
    let mut removed = 0;
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != std::ffi::OsStr::new(".git"));
    let doomed: Vec<_> = walker
        .filter_map(Result::ok)
        .filter(|e| {
            let name = e.file_name().to_string_lossy();
            (e.file_type().is_dir() && (name == "__pycache__" || name == ".pytest_cache"))
                || (e.file_type().is_file() && name.ends_with(".pyc"))
        })
        .map(|e| (e.path().to_path_buf(), e.file_type().is_dir()))
        .collect();

    for (path, is_dir) in doomed {
        let result = if is_dir {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            // Already gone with its parent cache directory.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to purge cache entry"),
        }
    }
    removed
}

/// Merge [`IGNORE_ENTRIES`] into `.gitignore`, keeping existing lines.
pub fn ensure_gitignore(root: &Path) -> std::io::Result<bool> {
    let path = root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let missing: Vec<&str> = IGNORE_ENTRIES
        .iter()
        .copied()
        .filter(|entry| !existing.lines().any(|l| l.trim() == *entry))
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    for entry in missing {
        content.push_str(entry);
        content.push('\n');
    }
    std::fs::write(&path, content)?;
    Ok(true)
}

/// Result of one publish step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub branch: String,
    pub committed: bool,
    pub pushed: bool,
    pub pr_url: Option<String>,
    /// Rebase failed and the branch was reset to the remote tip.
    pub conflict_recovered: bool,
    /// Push or PR failure, recorded without aborting the loop.
    pub failure: Option<String>,
}

pub struct Publisher {
    git: Arc<dyn GitWorkspace>,
    host: Option<Arc<dyn PullRequestHost>>,
    config: PublishConfig,
}

impl Publisher {
    pub fn new(
        git: Arc<dyn GitWorkspace>,
        host: Option<Arc<dyn PullRequestHost>>,
        config: PublishConfig,
    ) -> Self {
        Self { git, host, config }
    }

    pub fn branch_for(&self, team: &str, leader: &str) -> String {
        branch_name(team, leader, &self.config.branch_suffix)
    }

    /// Publish the run's working tree.
    ///
    /// Checkout and commit failures abort with `PublishFailure`. Push and PR
    /// failures are reported through [`PublishOutcome::failure`].
    #[instrument(skip_all, fields(team = %state.team_name, run_id = %state.run_id))]
    pub async fn publish(&self, state: &RunState) -> HealResult<PublishOutcome> {
        let repo = state
            .repo_path
            .as_deref()
            .ok_or_else(|| HealError::PublishFailure("no checkout to publish".to_string()))?;
        let branch = self.branch_for(&state.team_name, &state.leader_name);
        let mut outcome = PublishOutcome {
            branch: branch.clone(),
            pr_url: state.pr_url.clone(),
            ..PublishOutcome::default()
        };

        self.git
            .checkout_or_create(repo, &branch)
            .await
            .map_err(|e| HealError::PublishFailure(format!("checkout of {branch} failed: {e:#}")))?;

        let purged = purge_caches(repo);
        ensure_gitignore(repo)?;
        debug!(purged, "workspace hygiene done");

        outcome.committed = self.commit(repo, state).await?;

        match self.sync_with_remote(repo, &branch).await {
            Ok(recovered) => outcome.conflict_recovered = recovered,
            Err(e) => {
                let message = format!("sync with remote failed: {e:#}");
                warn!(branch = %branch, error = %message, "publish incomplete");
                outcome.failure = Some(message);
                return Ok(outcome);
            }
        }

        if let Err(e) = self.git.push(repo, &branch).await {
            let message = format!("push of {branch} failed: {e:#}");
            warn!(branch = %branch, error = %message, "push failed, continuing");
            outcome.failure = Some(message);
            return Ok(outcome);
        }
        outcome.pushed = true;
        info!(branch = %branch, committed = outcome.committed, "branch pushed");

        if outcome.pr_url.is_none() {
            match self.open_pull_request(repo, &branch, state).await {
                Ok(url) => outcome.pr_url = url,
                Err(e) => {
                    warn!(branch = %branch, error = %format!("{e:#}"), "pull request not opened");
                    outcome.failure = Some(format!("pull request failed: {e:#}"));
                }
            }
        }

        Ok(outcome)
    }

    async fn commit(&self, repo: &Path, state: &RunState) -> HealResult<bool> {
        let fail = |e: anyhow::Error| HealError::PublishFailure(format!("commit failed: {e:#}"));

        self.git.untrack_all(repo).await.map_err(fail)?;
        self.git.stage_all(repo).await.map_err(fail)?;
        if !self.git.has_staged_changes(repo).await.map_err(fail)? {
            debug!("working tree clean, no commit");
            return Ok(false);
        }

        let prefix = &self.config.commit_prefix;
        let message = state.fixes().last().map_or_else(
            || format!("{prefix} Apply automated fixes"),
            |fix| {
                if fix.commit_message.starts_with(prefix.as_str()) {
                    fix.commit_message.clone()
                } else {
                    format!("{prefix} {}", fix.commit_message)
                }
            },
        );
        self.git.commit(repo, &message).await.map_err(fail)?;
        info!(message = %message, "committed");
        Ok(true)
    }

    /// Rebase onto the remote branch when it exists. On rebase failure abort
    /// and hard-reset to the fetched tip. Returns whether recovery ran.
    async fn sync_with_remote(&self, repo: &Path, branch: &str) -> anyhow::Result<bool> {
        if !self.git.fetch_remote_branch(repo, branch).await? {
            debug!(branch, "remote branch absent, first push");
            return Ok(false);
        }

        let Err(rebase_err) = self.git.rebase_onto_fetched(repo).await else {
            return Ok(false);
        };

        let conflict = HealError::PublishConflict(format!("{rebase_err:#}"));
        warn!(branch, error = %conflict, "rebase failed, resetting to remote tip");
        if let Err(e) = self.git.abort_rebase(repo).await {
            debug!(error = %format!("{e:#}"), "rebase abort reported an error");
        }
        self.git.reset_hard_to_fetched(repo).await?;
        Ok(true)
    }

    async fn open_pull_request(
        &self,
        repo: &Path,
        branch: &str,
        state: &RunState,
    ) -> anyhow::Result<Option<String>> {
        let Some(host) = &self.host else {
            debug!("no pull request host configured");
            return Ok(None);
        };
        let remote = self
            .git
            .remote_url(repo)
            .await?
            .ok_or_else(|| anyhow::anyhow!("repository has no remote URL"))?;
        let coords = RepoCoordinates::from_remote_url(&remote)
            .ok_or_else(|| anyhow::anyhow!("cannot parse owner/repo from remote URL"))?;

        let base = match host.default_branch(&coords).await {
            Ok(base) => base,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "default branch lookup failed, using main");
                "main".to_string()
            }
        };

        let spec = PullRequestSpec {
            coords,
            head: branch.to_string(),
            base,
            title: format!("{} Autonomous CI/CD Fix — {branch}", self.config.commit_prefix),
            body: format!(
                "## AI-Agent Auto-Fix\n\n\
                 This pull request was opened automatically by ci-healer.\n\n\
                 **Branch:** `{branch}`\n\
                 **Fixes Applied:** {}\n\n\
                 All changes were committed with the `{}` prefix.",
                state.fixes().len(),
                self.config.commit_prefix
            ),
        };

        let outcome = host.open_pull_request(&spec).await?;
        match &outcome {
            PullRequestOutcome::Created(url) => info!(url = %url, "pull request opened"),
            PullRequestOutcome::AlreadyExists(url) => {
                info!(url = ?url, "pull request already exists");
            }
        }
        Ok(outcome.url().map(ToString::to_string))
    }
}
