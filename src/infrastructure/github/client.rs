//! GitHub REST client for pull requests.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::config::PublishConfig;
use crate::domain::ports::{PullRequestHost, PullRequestOutcome, PullRequestSpec, RepoCoordinates};

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestInfo {
    html_url: String,
}

pub struct GitHubClient {
    http_client: ReqwestClient,
    api_url: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(config: &PublishConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("ci-healer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
            token: config.github_token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// URL of the open PR for `head` into `base`, if the host lists one.
    async fn existing_pull_request(&self, spec: &PullRequestSpec) -> Result<Option<String>> {
        let url = format!(
            "{}/repos/{}/{}/pulls",
            self.api_url, spec.coords.owner, spec.coords.repo
        );
        let head = format!("{}:{}", spec.coords.owner, spec.head);
        let response = self
            .authorized(self.http_client.get(url))
            .query(&[("head", head.as_str()), ("base", spec.base.as_str()), ("state", "open")])
            .send()
            .await
            .context("Failed to list pull requests")?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "pull request listing failed");
            return Ok(None);
        }
        let pulls: Vec<PullRequestInfo> = response
            .json()
            .await
            .context("Failed to parse pull request list")?;
        Ok(pulls.into_iter().next().map(|pr| pr.html_url))
    }
}

#[async_trait]
impl PullRequestHost for GitHubClient {
    #[instrument(skip(self), fields(owner = %coords.owner, repo = %coords.repo))]
    async fn default_branch(&self, coords: &RepoCoordinates) -> Result<String> {
        let url = format!("{}/repos/{}/{}", self.api_url, coords.owner, coords.repo);
        let response = self
            .authorized(self.http_client.get(url))
            .send()
            .await
            .context("Failed to query repository")?;
        let status = response.status();
        if !status.is_success() {
            bail!("repository lookup returned {status}");
        }
        let info: RepoInfo = response
            .json()
            .await
            .context("Failed to parse repository info")?;
        Ok(info.default_branch)
    }

    #[instrument(skip(self, spec), fields(owner = %spec.coords.owner, repo = %spec.coords.repo, head = %spec.head, base = %spec.base))]
    async fn open_pull_request(&self, spec: &PullRequestSpec) -> Result<PullRequestOutcome> {
        let url = format!(
            "{}/repos/{}/{}/pulls",
            self.api_url, spec.coords.owner, spec.coords.repo
        );
        let response = self
            .authorized(self.http_client.post(url))
            .json(&json!({
                "title": spec.title,
                "head": spec.head,
                "base": spec.base,
                "body": spec.body,
            }))
            .send()
            .await
            .context("Failed to create pull request")?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let pr: PullRequestInfo = response
                    .json()
                    .await
                    .context("Failed to parse created pull request")?;
                info!(url = %pr.html_url, "pull request created");
                Ok(PullRequestOutcome::Created(pr.html_url))
            }
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                let existing = match self.existing_pull_request(spec).await {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "could not resolve existing pull request");
                        None
                    }
                };
                info!(url = ?existing, "pull request already exists");
                Ok(PullRequestOutcome::AlreadyExists(existing))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("pull request creation returned {status}: {body}")
            }
        }
    }
}
