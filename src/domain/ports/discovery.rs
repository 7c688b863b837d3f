//! Discovery port - clone a repository and describe its test surface.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::HealResult;
use crate::domain::models::Stack;

/// What discovery learned about a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub workdir: PathBuf,
    pub stack: Stack,
    pub test_files: Vec<PathBuf>,
}

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Clone `repo_url` for `team_name` and inspect it.
    ///
    /// Fails with `CloneFailure`, `EmptyCheckout` or `ZeroTestGuardTripped`.
    async fn discover(&self, repo_url: &str, team_name: &str) -> HealResult<DiscoveryReport>;
}
