//! Version-control ports - local git workspace and pull-request host.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Git operations the publisher needs, scoped to one working tree.
#[async_trait]
pub trait GitWorkspace: Send + Sync {
    /// Check out `branch`, creating it from HEAD when it does not exist.
    async fn checkout_or_create(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Drop every path from the index so ignore rules apply on re-staging.
    async fn untrack_all(&self, repo: &Path) -> Result<()>;

    async fn stage_all(&self, repo: &Path) -> Result<()>;

    async fn has_staged_changes(&self, repo: &Path) -> Result<bool>;

    async fn commit(&self, repo: &Path, message: &str) -> Result<()>;

    /// Fetch `branch` from the remote. `Ok(false)` when the remote has no such branch.
    async fn fetch_remote_branch(&self, repo: &Path, branch: &str) -> Result<bool>;

    /// Rebase the current branch onto the last fetched tip.
    async fn rebase_onto_fetched(&self, repo: &Path) -> Result<()>;

    async fn abort_rebase(&self, repo: &Path) -> Result<()>;

    /// Hard-reset the current branch to the last fetched tip.
    async fn reset_hard_to_fetched(&self, repo: &Path) -> Result<()>;

    async fn push(&self, repo: &Path, branch: &str) -> Result<()>;

    /// URL of the configured remote, without credentials.
    async fn remote_url(&self, repo: &Path) -> Result<Option<String>>;
}

/// Owner/name pair of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoCoordinates {
    pub owner: String,
    pub repo: String,
}

impl RepoCoordinates {
    /// Parse `https://host/owner/repo(.git)`, `git@host:owner/repo.git` and
    /// credential-bearing HTTPS forms.
    pub fn from_remote_url(url: &str) -> Option<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let path = if let Some(rest) = trimmed.strip_prefix("git@") {
            rest.split_once(':').map(|(_, path)| path)?
        } else {
            let without_scheme = trimmed.split_once("://").map_or(trimmed, |(_, rest)| rest);
            let without_auth = without_scheme
                .rsplit_once('@')
                .map_or(without_scheme, |(_, rest)| rest);
            without_auth.split_once('/').map(|(_, path)| path)?
        };

        let mut parts = path.rsplit('/');
        let repo = parts.next()?.trim_end_matches(".git");
        let owner = parts.next()?;
        if owner.is_empty() || repo.is_empty() {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

/// Pull request to open, keyed by (owner, repo, head, base).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSpec {
    pub coords: RepoCoordinates,
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestOutcome {
    Created(String),
    /// The host already has a PR for this head/base. Carries its URL when known.
    AlreadyExists(Option<String>),
}

impl PullRequestOutcome {
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Created(url) => Some(url),
            Self::AlreadyExists(url) => url.as_deref(),
        }
    }
}

#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// Default branch of the repository, used as PR base.
    async fn default_branch(&self, coords: &RepoCoordinates) -> Result<String>;

    /// Open a PR. "Already exists" answers are success, not failure.
    async fn open_pull_request(&self, spec: &PullRequestSpec) -> Result<PullRequestOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_from_https_url() {
        let coords = RepoCoordinates::from_remote_url("https://github.com/acme/calc.git").unwrap();
        assert_eq!(coords.owner, "acme");
        assert_eq!(coords.repo, "calc");
    }

    #[test]
    fn test_coordinates_from_token_url() {
        let coords =
            RepoCoordinates::from_remote_url("https://ghp_secret@github.com/acme/calc").unwrap();
        assert_eq!(coords.owner, "acme");
        assert_eq!(coords.repo, "calc");
    }

    #[test]
    fn test_coordinates_from_ssh_url() {
        let coords = RepoCoordinates::from_remote_url("git@github.com:acme/calc.git").unwrap();
        assert_eq!(coords.owner, "acme");
        assert_eq!(coords.repo, "calc");
    }

    #[test]
    fn test_coordinates_reject_local_paths() {
        assert!(RepoCoordinates::from_remote_url("calc").is_none());
    }
}
