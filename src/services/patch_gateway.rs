//! Patch gateway.
//!
//! Guards the diagnosed target against hallucination, asks the reasoning
//! capability for a full-file replacement, backs up the original bytes and
//! writes the new content. Every successful call yields exactly one
//! [`FixRecord`]; every failure leaves the working tree untouched.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::retry::RetryPolicy;
use super::source_tree::{is_test_file, SourceTree};
use crate::domain::errors::{HealError, HealResult};
use crate::domain::models::{Diagnosis, FixRecord};
use crate::domain::ports::ReasoningClient;

/// Inputs of one patch call.
#[derive(Debug, Clone, Copy)]
pub struct PatchRequest<'a> {
    pub diagnosis: &'a Diagnosis,
    pub tree: &'a SourceTree,
    /// Raw sandbox log of the failing cycle.
    pub raw_log: &'a str,
    /// The suite failed to load; the guard is bypassed.
    pub collection_failure: bool,
    pub run_id: Uuid,
    pub iteration: u32,
    pub model: Option<&'a str>,
}

/// Strip a surrounding markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().is_some_and(|l| l.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim_start().starts_with("```")) {
        lines.pop();
    }
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

/// Hallucination guard: the target must match the anchor by path suffix or
/// appear as a path in the raw log, unless the suite failed to load.
pub fn check_target(
    target: &str,
    anchor: Option<&str>,
    raw_log: &str,
    collection_failure: bool,
) -> HealResult<()> {
    if collection_failure {
        return Ok(());
    }
    let matches_anchor = anchor.is_some_and(|anchor| {
        !anchor.is_empty()
            && (target == anchor
                || target.ends_with(&format!("/{anchor}"))
                || anchor.ends_with(&format!("/{target}")))
    });
    if matches_anchor || mentions_path(raw_log, target) {
        return Ok(());
    }
    Err(HealError::HallucinatedTarget {
        target: target.to_string(),
        anchor: anchor.map(ToString::to_string),
    })
}

/// True when `target` occurs in `log` bounded by path-component edges, so
/// `app.py` matches `src/app.py:3` but not `src/webapp.py`.
pub fn mentions_path(log: &str, target: &str) -> bool {
    if target.is_empty() {
        return false;
    }
    let is_name_char = |c: char| c.is_alphanumeric() || matches!(c, '_' | '-');
    log.match_indices(target).any(|(start, _)| {
        let before = log[..start].chars().next_back();
        let after = log[start + target.len()..].chars().next();
        !before.is_some_and(|c| is_name_char(c) || c == '.')
            && !after.is_some_and(|c| is_name_char(c) || c == '/')
    })
}

/// Repository-relative form of `target`. Absolute paths and any `..`
/// component are refused before the tree is touched.
pub fn confine(target: &str) -> HealResult<String> {
    let normalized = target.trim().replace('\\', "/");
    let relative = normalized.trim_start_matches("./");
    let escapes = relative.is_empty()
        || relative.starts_with('/')
        || Path::new(relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(HealError::PatchRejected(format!(
            "target {target} is outside the checkout"
        )));
    }
    Ok(relative.to_string())
}

fn extract_content(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.as_str(),
        serde_json::Value::Object(map) => ["file_content", "fixed_code", "code", "content"]
            .iter()
            .find_map(|key| map.get(*key).and_then(serde_json::Value::as_str))?,
        _ => return None,
    };
    Some(strip_code_fences(text))
}

pub struct PatchGateway {
    client: Arc<dyn ReasoningClient>,
    retry: RetryPolicy,
    scratch_dir: PathBuf,
    commit_prefix: String,
}

impl PatchGateway {
    pub fn new(
        client: Arc<dyn ReasoningClient>,
        retry: RetryPolicy,
        scratch_dir: impl Into<PathBuf>,
        commit_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            scratch_dir: scratch_dir.into(),
            commit_prefix: commit_prefix.into(),
        }
    }

    /// Generate and apply a patch for `request.diagnosis`.
    #[instrument(skip_all, fields(target = %request.diagnosis.target_file, iteration = request.iteration))]
    pub async fn patch(&self, request: PatchRequest<'_>) -> HealResult<FixRecord> {
        let diagnosis = request.diagnosis;
        check_target(
            &diagnosis.target_file,
            diagnosis.anchor_file.as_deref(),
            request.raw_log,
            request.collection_failure,
        )
        .inspect_err(|e| warn!(error = %e, "patch refused"))?;

        let target = confine(&diagnosis.target_file)
            .inspect_err(|e| warn!(error = %e, "patch refused"))?;
        let path = locate(request.tree, &target)?;
        if path != target {
            check_target(
                &path,
                diagnosis.anchor_file.as_deref(),
                request.raw_log,
                request.collection_failure,
            )
            .inspect_err(|e| warn!(error = %e, resolved = %path, "resolved target refused"))?;
        }
        if is_test_file(&path) {
            return Err(HealError::PatchRejected(format!(
                "refusing to patch test file {path}"
            )));
        }

        let absolute = request.tree.root().join(&path);
        let original_bytes = tokio::fs::read(&absolute).await?;
        let original = String::from_utf8_lossy(&original_bytes).into_owned();

        let prompt = build_prompt(diagnosis, &path, &original);
        let value = self
            .retry
            .execute(|| self.client.generate(&prompt, request.model))
            .await?;

        let content = extract_content(&value).ok_or_else(|| {
            HealError::PatchRejected("reply carried no file content".to_string())
        })?;
        if content.trim().is_empty() {
            return Err(HealError::PatchRejected("empty replacement".to_string()));
        }
        if content.trim_end() == original.trim_end() {
            return Err(HealError::PatchRejected("replacement is identical".to_string()));
        }

        let backup = self.backup_path(request.run_id, request.iteration, &path);
        if let Some(parent) = backup.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&backup, &original_bytes).await?;
        tokio::fs::write(&absolute, content.as_bytes()).await?;

        info!(path = %path, backup = %backup.display(), "patch applied");

        Ok(FixRecord {
            commit_message: format!("{} Fix {} in {}", self.commit_prefix, diagnosis.category, path),
            path,
            bug_type: diagnosis.category,
            line: diagnosis.target_line,
            description: diagnosis.description.clone(),
        })
    }

    /// `<scratch_dir>/<run_id>/iter-<n>/<path>.orig`
    pub fn backup_path(&self, run_id: Uuid, iteration: u32, path: &str) -> PathBuf {
        self.scratch_dir
            .join(run_id.to_string())
            .join(format!("iter-{iteration}"))
            .join(format!("{path}.orig"))
    }
}

/// Exact path first, then a basename search across the tree. Only files the
/// scan listed are ever returned.
fn locate(tree: &SourceTree, target: &str) -> HealResult<String> {
    if tree.contains(target) {
        return Ok(target.to_string());
    }
    tree.find_by_basename(target)
        .map(|found| {
            info!(target, resolved = found, "resolved target by basename");
            found.to_string()
        })
        .ok_or_else(|| HealError::PatchRejected(format!("target {target} not found in checkout")))
}

fn build_prompt(diagnosis: &Diagnosis, path: &str, original: &str) -> String {
    let mut prompt = format!(
        "You are fixing one bug in a source file.\n\
         File: {path}\n\
         Bug type: {}\n\
         Line: {}\n\
         Description: {}\n",
        diagnosis.category, diagnosis.target_line, diagnosis.description
    );
    if !diagnosis.expected_exceptions.is_empty() {
        prompt.push_str(&format!(
            "The tests expect {} to be raised. Raise it explicitly; do not return a sentinel.\n",
            diagnosis.expected_exceptions.join(", ")
        ));
    }
    prompt.push_str(&format!(
        "\nOriginal code:\n{original}\n\n\
         Return the FULL updated file, changing only what the fix needs.\n\
         Respond with JSON only: {{\"file_content\": \"<entire file>\"}}\n"
    ));
    prompt
}
