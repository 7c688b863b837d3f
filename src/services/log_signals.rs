//! Log signal extraction.
//!
//! Pulls deterministic sub-sections out of raw sandbox output: the lint-error
//! block, the test-failure block, expected-exception hints, failing test ids,
//! pytest counters and traceback file mentions. Everything here is a pure
//! function of the log text.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Lint code prefixes treated as actionable (pyflakes / pycodestyle fatal classes).
const KNOWN_LINT_PREFIXES: &[&str] = &["E1", "E9", "F4", "F63", "F7", "F8"];

/// Prefix of the sandbox mount point inside containers.
pub const MOUNT_PREFIX: &str = "/app/";

static LINT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<path>[^\s:]+):(?P<line>\d+):(?P<col>\d+):\s+(?P<code>[A-Z]+\d+)\s+(?P<msg>.+)$")
        .expect("lint pattern is a valid literal")
});

static PYTEST_RAISES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pytest\.raises\(\s*(?P<name>[A-Za-z_][\w.]*)")
        .expect("raises pattern is a valid literal")
});

static DID_NOT_RAISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DID NOT RAISE\s*(?:<class\s*'(?P<cls>[\w.]+)'>|(?P<bare>[A-Za-z_][\w.]*))")
        .expect("did-not-raise pattern is a valid literal")
});

static EXPECTS_EXCEPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)expects? (?:exception|error)\s+(?P<name>[A-Za-z_][\w.]*)")
        .expect("expects pattern is a valid literal")
});

static COUNTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<n>\d+) (?P<kind>passed|failed|errors?|skipped)\b")
        .expect("counter pattern is a valid literal")
});

static COLLECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"collected (?P<n>\d+) items?").expect("collected pattern is a valid literal")
});

static FAILED_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:FAILED|ERROR) (?P<file>[^\s:]+)::(?P<name>[^\s\[]+)")
        .expect("failed-prefix pattern is a valid literal")
});

static FAILED_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>[^\s:]+)::(?P<name>[^\s\[]+)(?:\[[^\]]*\])? (?:FAILED|ERROR)")
        .expect("failed-suffix pattern is a valid literal")
});

static PY_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"File "(?P<path>[^"]+)", line (?P<line>\d+)"#)
        .expect("python frame pattern is a valid literal")
});

static SHORT_FRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<path>[\w./\\-]+\.(?:py|js|ts|mjs|cjs)):(?P<line>\d+)")
        .expect("short frame pattern is a valid literal")
});

/// One lint finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LintFinding {
    pub path: String,
    pub line: u32,
    pub code: String,
    pub message: String,
}

/// A failing test id as reported by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailingTest {
    /// Repository-relative test file path.
    pub file: String,
    /// Test function name, without parametrization suffix or class prefix.
    pub name: String,
}

/// pytest summary counters. `None` when the log does not mention them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: Option<u32>,
    pub failed: Option<u32>,
    pub errors: Option<u32>,
    pub collected: Option<u32>,
}

impl TestCounts {
    /// Failed plus errored tests, when either counter is present.
    pub fn failures(&self) -> Option<u32> {
        match (self.failed, self.errors) {
            (None, None) => None,
            (failed, errors) => Some(failed.unwrap_or(0) + errors.unwrap_or(0)),
        }
    }

    /// Percentage of passed tests, rounded down. `None` when no denominator
    /// can be derived.
    pub fn passed_percentage(&self) -> Option<i64> {
        let passed = self.passed.unwrap_or(0);
        let total = self
            .collected
            .filter(|c| *c > 0)
            .or_else(|| {
                let sum = passed + self.failures().unwrap_or(0);
                (sum > 0).then_some(sum)
            })?;
        if self.passed.is_none() && self.failures().is_none() {
            return None;
        }
        Some(i64::from(passed.min(total)) * 100 / i64::from(total))
    }
}

/// Every signal extracted from one sandbox log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSignals {
    pub lint_findings: Vec<LintFinding>,
    /// Lint findings rendered one per line, in log order.
    pub lint_block: String,
    pub failure_block: String,
    /// Sorted, deduplicated exception class names.
    pub expected_exceptions: Vec<String>,
    pub failing_tests: Vec<FailingTest>,
    pub counts: TestCounts,
    /// Repository-relative files mentioned in tracebacks, in log order.
    pub traceback_files: Vec<String>,
    /// True when the suite failed to even load.
    pub collection_failure: bool,
}

impl LogSignals {
    /// Failure count used for stuck detection: counters when present, else
    /// the number of distinct failing tests, else 1 for any non-empty failure.
    pub fn failure_count(&self) -> usize {
        if let Some(n) = self.counts.failures() {
            return n as usize;
        }
        if !self.failing_tests.is_empty() {
            return self.failing_tests.len();
        }
        usize::from(!self.lint_findings.is_empty() || self.collection_failure)
    }
}

/// Extracts [`LogSignals`] from raw sandbox output.
#[derive(Debug, Clone)]
pub struct LogSignalExtractor {
    tail_lines: usize,
}

impl Default for LogSignalExtractor {
    fn default() -> Self {
        Self::new(80)
    }
}

impl LogSignalExtractor {
    pub const fn new(tail_lines: usize) -> Self {
        Self { tail_lines }
    }

    /// Extract every signal. `workdir` is the host checkout, stripped from
    /// paths along with the container mount prefix.
    pub fn extract(&self, log: &str, exit_code: i32, workdir: Option<&Path>) -> LogSignals {
        let lint_findings = lint_findings(log, workdir);
        let lint_block = lint_findings
            .iter()
            .map(|f| format!("{}:{}: {} {}", f.path, f.line, f.code, f.message))
            .collect::<Vec<_>>()
            .join("\n");

        LogSignals {
            lint_block,
            lint_findings,
            failure_block: failure_block(log, self.tail_lines),
            expected_exceptions: expected_exceptions(log),
            failing_tests: failing_tests(log, workdir),
            counts: test_counts(log),
            traceback_files: traceback_files(log, workdir),
            collection_failure: is_collection_failure(log, exit_code),
        }
    }
}

/// Strip the container mount prefix and the host workdir prefix so a path
/// becomes repository-relative.
pub fn normalize_path(path: &str, workdir: Option<&Path>) -> String {
    let mut p = path.trim().replace('\\', "/");
    if let Some(workdir) = workdir {
        let prefix = workdir.to_string_lossy().replace('\\', "/");
        let prefix = prefix.trim_end_matches('/');
        if !prefix.is_empty() {
            if let Some(rest) = p.strip_prefix(prefix) {
                p = rest.to_string();
            }
        }
    }
    if let Some(rest) = p.strip_prefix(MOUNT_PREFIX) {
        p = rest.to_string();
    }
    p.trim_start_matches("./").trim_start_matches('/').to_string()
}

/// Lines of the form `<path>:<line>:<col>: <code> <message>` whose code
/// belongs to a known fatal lint class.
pub fn lint_findings(log: &str, workdir: Option<&Path>) -> Vec<LintFinding> {
    log.lines()
        .filter_map(|line| LINT_LINE.captures(line.trim()))
        .filter(|caps| {
            let code = &caps["code"];
            KNOWN_LINT_PREFIXES.iter().any(|p| code.starts_with(p))
        })
        .filter_map(|caps| {
            Some(LintFinding {
                path: normalize_path(&caps["path"], workdir),
                line: caps["line"].parse().ok()?,
                code: caps["code"].to_string(),
                message: caps["msg"].trim().to_string(),
            })
        })
        .collect()
}

fn is_failures_header(line: &str) -> bool {
    let t = line.trim();
    (t.starts_with('=') && (t.contains(" FAILURES ") || t.contains(" ERRORS ")))
        || t == "FAILURES"
        || t.contains("_ FAILURES _")
}

fn is_summary_footer(line: &str) -> bool {
    line.contains("short test summary info")
}

/// Content between the FAILURES/ERRORS header and the short-summary footer.
/// Falls back to the last `tail_lines` lines when no header is present.
pub fn failure_block(log: &str, tail_lines: usize) -> String {
    let lines: Vec<&str> = log.lines().collect();
    if let Some(start) = lines.iter().position(|l| is_failures_header(l)) {
        let end = lines[start..]
            .iter()
            .position(|l| is_summary_footer(l))
            .map_or(lines.len(), |offset| start + offset);
        return lines[start..end].join("\n");
    }

    let from = lines.len().saturating_sub(tail_lines);
    lines[from..].join("\n")
}

fn strip_module(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).to_string()
}

/// Exception class names implied by negative-test assertions, sorted and
/// deduplicated.
pub fn expected_exceptions(log: &str) -> Vec<String> {
    let mut names = BTreeSet::new();

    for caps in PYTEST_RAISES.captures_iter(log) {
        names.insert(strip_module(&caps["name"]));
    }
    for caps in DID_NOT_RAISE.captures_iter(log) {
        if let Some(m) = caps.name("cls").or_else(|| caps.name("bare")) {
            names.insert(strip_module(m.as_str()));
        }
    }
    for caps in EXPECTS_EXCEPTION.captures_iter(log) {
        names.insert(strip_module(&caps["name"]));
    }

    names.into_iter().filter(|n| !n.is_empty()).collect()
}

/// pytest counters from the last summary line that mentions them.
pub fn test_counts(log: &str) -> TestCounts {
    let mut counts = TestCounts {
        collected: COLLECTED
            .captures_iter(log)
            .last()
            .and_then(|c| c["n"].parse().ok()),
        ..TestCounts::default()
    };

    let summary = log
        .lines()
        .rev()
        .find(|l| l.contains(" passed") || l.contains(" failed") || l.contains(" error"));
    if let Some(line) = summary {
        for caps in COUNTER.captures_iter(line) {
            let n = caps["n"].parse().ok();
            match &caps["kind"] {
                "passed" => counts.passed = n,
                "failed" => counts.failed = n,
                "error" | "errors" => counts.errors = n,
                _ => {}
            }
        }
    }
    counts
}

fn strip_test_name(name: &str) -> String {
    name.rsplit("::").next().unwrap_or(name).to_string()
}

/// Failing test ids from both the short summary (`FAILED file::name`) and
/// verbose progress lines (`file::name FAILED`). Deduplicated, in log order.
pub fn failing_tests(log: &str, workdir: Option<&Path>) -> Vec<FailingTest> {
    let mut seen = BTreeSet::new();
    let mut tests = Vec::new();
    for line in log.lines() {
        let line = line.trim();
        let caps = FAILED_PREFIX
            .captures(line)
            .or_else(|| FAILED_SUFFIX.captures(line));
        if let Some(caps) = caps {
            let test = FailingTest {
                file: normalize_path(&caps["file"], workdir),
                name: strip_test_name(&caps["name"]),
            };
            if seen.insert(test.clone()) {
                tests.push(test);
            }
        }
    }
    tests
}

/// Files mentioned in traceback frames (`File "x", line N` and `x:N:` forms),
/// repository-relative, deduplicated keeping the last occurrence order.
pub fn traceback_files(log: &str, workdir: Option<&Path>) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in log.lines() {
        let path = PY_FRAME
            .captures(line)
            .map(|c| c["path"].to_string())
            .or_else(|| SHORT_FRAME.captures(line).map(|c| c["path"].to_string()));
        if let Some(path) = path {
            let rel = normalize_path(&path, workdir);
            if rel.is_empty() || is_external_path(&rel) {
                continue;
            }
            files.retain(|f| f != &rel);
            files.push(rel);
        }
    }
    files
}

fn is_external_path(path: &str) -> bool {
    path.starts_with("usr/")
        || path.contains("site-packages/")
        || path.contains("dist-packages/")
        || path.contains("node_modules/")
        || path.starts_with('<')
}

/// The suite failed to load: pytest's interrupted exit code or an explicit
/// collection error marker.
pub fn is_collection_failure(log: &str, exit_code: i32) -> bool {
    exit_code == 2
        || log.contains("errors during collection")
        || log.contains("ERROR collecting")
}

/// Count of non-whitespace characters, used for the "too short to diagnose" guard.
pub fn signal_chars(log: &str) -> usize {
    log.chars().filter(|c| !c.is_whitespace()).count()
}
