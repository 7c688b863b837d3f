//! Diagnosis gateway.
//!
//! Wraps the reasoning capability: renders a bounded prompt from the log
//! signals, the anchored context and the already-attempted fixes, then
//! post-processes the reply into a [`Diagnosis`] that never targets a test
//! file and never carries line 0.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::anchor_resolver::{tested_symbol_candidates, DiagnosisContext};
use super::log_signals::{normalize_path, LogSignals};
use super::retry::RetryPolicy;
use super::source_tree::{definition_line, is_test_file, SourceTree};
use crate::domain::errors::{HealError, HealResult};
use crate::domain::models::{BugCategory, Diagnosis, FixRecord};
use crate::domain::ports::ReasoningClient;

/// Inputs of one diagnosis call.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisRequest<'a> {
    pub signals: &'a LogSignals,
    pub context: &'a DiagnosisContext,
    pub already_attempted: &'a [FixRecord],
    pub tree: &'a SourceTree,
    pub model: Option<&'a str>,
}

/// Reply shape. Field aliases cover the spellings models actually produce.
#[derive(Debug, Default, Deserialize)]
struct RawDiagnosis {
    #[serde(default, alias = "target_file", alias = "path")]
    file: Option<String>,
    #[serde(default, alias = "target_line", alias = "line_number")]
    line: Option<serde_json::Value>,
    #[serde(default, alias = "category", alias = "type")]
    bug_type: Option<String>,
    #[serde(default, alias = "fix_description")]
    description: Option<String>,
}

fn parse_line(value: Option<&serde_json::Value>) -> Option<u32> {
    match value? {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub struct DiagnosisGateway {
    client: Arc<dyn ReasoningClient>,
    retry: RetryPolicy,
}

impl DiagnosisGateway {
    pub fn new(client: Arc<dyn ReasoningClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    /// Diagnose the current failure.
    ///
    /// Fails with `ReasoningUnavailable` when the capability errors after
    /// retries, replies with an unusable shape, or only names test files.
    #[instrument(skip_all, fields(anchor = ?request.context.anchor_path(), attempted = request.already_attempted.len()))]
    pub async fn diagnose(&self, request: DiagnosisRequest<'_>) -> HealResult<Diagnosis> {
        let prompt = build_prompt(&request);
        let value = self
            .retry
            .execute(|| self.client.generate(&prompt, request.model))
            .await?;

        let raw: RawDiagnosis = serde_json::from_value(value).map_err(|e| {
            HealError::ReasoningUnavailable(format!("unusable diagnosis shape: {e}"))
        })?;
        debug!(?raw, "raw diagnosis");

        let diagnosis = post_process(raw, &request)?;
        info!(
            file = %diagnosis.target_file,
            line = diagnosis.target_line,
            category = %diagnosis.category,
            "diagnosis ready"
        );
        Ok(diagnosis)
    }
}

fn post_process(raw: RawDiagnosis, request: &DiagnosisRequest<'_>) -> HealResult<Diagnosis> {
    let anchor = request
        .context
        .anchor_path()
        .filter(|a| !is_test_file(a))
        .map(ToString::to_string);

    let mut target = raw
        .file
        .as_deref()
        .map(|f| normalize_path(f, Some(request.tree.root())))
        .filter(|f| !f.is_empty());

    if target.as_deref().is_some_and(is_test_file) {
        warn!(target = ?target, anchor = ?anchor, "diagnosis named a test file, retargeting");
        target = anchor.clone();
    }
    let target = target.or_else(|| anchor.clone()).ok_or_else(|| {
        HealError::ReasoningUnavailable("diagnosis named no fixable source file".to_string())
    })?;

    let mut category = raw
        .bug_type
        .as_deref()
        .and_then(BugCategory::from_str)
        .unwrap_or(BugCategory::Logic);
    let expected_exceptions = request.signals.expected_exceptions.clone();
    if !expected_exceptions.is_empty() && category != BugCategory::Logic {
        debug!(from = %category, ?expected_exceptions, "expected exceptions force LOGIC category");
        category = BugCategory::Logic;
    }

    let target_line = parse_line(raw.line.as_ref())
        .filter(|l| *l > 0)
        .unwrap_or_else(|| fallback_line(request, &target));

    Ok(Diagnosis {
        target_file: target,
        target_line,
        category,
        description: raw
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("Fix {category} failure")),
        expected_exceptions,
        anchor_file: anchor,
    })
}

/// Deterministic line lookup: the definition of the symbol a failing test
/// exercises, inside the target file. Line 1 when nothing matches.
fn fallback_line(request: &DiagnosisRequest<'_>, target: &str) -> u32 {
    let Ok(content) = request.tree.read(target) else {
        return 1;
    };
    request
        .signals
        .failing_tests
        .iter()
        .flat_map(|t| tested_symbol_candidates(&t.name))
        .find_map(|symbol| definition_line(&content, &symbol))
        .unwrap_or(1)
}

fn build_prompt(request: &DiagnosisRequest<'_>) -> String {
    let signals = request.signals;
    let mut prompt = String::from(
        "You are diagnosing a failing CI run. Identify the ROOT CAUSE source file and line.\n\
         Rules:\n\
         1. Only consider the failure block, lint block and files given below.\n\
         2. Never name a test file (test_*.py, *_test.py, *.test.js, *.spec.*) as the target.\n\
         3. Line numbers are 1-based. Never return line 0.\n\
         4. bug_type is exactly one of: LINTING, SYNTAX, LOGIC, TYPE_ERROR, IMPORT, INDENTATION, MARKER_CLEANUP.\n\
         5. Do not repeat a fix listed under ALREADY ATTEMPTED.\n\n",
    );

    if let Some(anchor) = request.context.anchor_path() {
        prompt.push_str(&format!("Most likely responsible file: {anchor}\n\n"));
    }
    if !signals.lint_block.is_empty() {
        prompt.push_str(&format!("LINT ERRORS:\n{}\n\n", signals.lint_block));
    }
    prompt.push_str(&format!("FAILURES:\n{}\n\n", signals.failure_block));
    if !signals.expected_exceptions.is_empty() {
        prompt.push_str(&format!(
            "The failing tests expect these exceptions to be raised: {}. \
             The fix must raise them, not silence the check.\n\n",
            signals.expected_exceptions.join(", ")
        ));
    }

    prompt.push_str("ALREADY ATTEMPTED:\n");
    if request.already_attempted.is_empty() {
        prompt.push_str("(none)\n");
    }
    for fix in request.already_attempted {
        prompt.push_str(&format!(
            "- {} line {}: {} {}\n",
            fix.path, fix.line, fix.bug_type, fix.description
        ));
    }

    prompt.push_str(&format!("\nSOURCE FILES:\n{}\n", request.context.render()));
    prompt.push_str(
        "Respond with JSON only:\n\
         {\"file\": \"src/utils.py\", \"line\": 15, \"bug_type\": \"LINTING\", \"description\": \"Remove unused import 'os'\"}\n",
    );
    prompt
}
