//! Root-cause anchoring.
//!
//! Turns the signals of one failing test cycle into at most one source file
//! that the diagnosis step is narrowed to. Resolvers are an ordered list tried
//! with early exit: import-based, then definition-based, then traceback-based.
//! A run whose failure count stops decreasing is considered stuck; anchoring
//! is then disabled and the whole tree becomes the context.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::log_signals::LogSignals;
use super::source_tree::{definition_line, is_test_file, numbered, SourceTree};
use crate::domain::models::{Anchor, AnchorKind};

static PY_FROM_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*from\s+(?P<module>[\w.]+)\s+import\s+(?P<names>[\w\s,*()]+)")
        .expect("from-import pattern is a valid literal")
});

static PY_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*import\s+(?P<modules>[\w.]+(?:\s*,\s*[\w.]+)*)")
        .expect("import pattern is a valid literal")
});

static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:require\(\s*|from\s+)['"](?P<module>\.{1,2}/[^'"]+)['"]"#)
        .expect("js import pattern is a valid literal")
});

const IMPORT_ERROR_MARKERS: &[&str] = &[
    "ModuleNotFoundError",
    "ImportError",
    "No module named",
    "Cannot find module",
];

/// One resolver: derives a hypothesis from the signals and the tree.
pub type ResolverFn = fn(&LogSignals, &SourceTree) -> Option<String>;

/// Outcome of anchoring for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorDecision {
    Anchored(Anchor),
    /// No anchor: full-tree context. `stuck` is true when anchoring was
    /// disabled by stuck detection rather than by lack of hypotheses.
    Scan { stuck: bool },
}

impl AnchorDecision {
    pub fn anchor(&self) -> Option<&Anchor> {
        match self {
            Self::Anchored(anchor) => Some(anchor),
            Self::Scan { .. } => None,
        }
    }
}

/// Bounded context handed to diagnosis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosisContext {
    /// `(path, numbered content)` pairs.
    pub files: Vec<(String, String)>,
    pub anchor: Option<Anchor>,
    pub stuck: bool,
}

impl DiagnosisContext {
    /// All files rendered as `--- FILE: path ---` sections.
    pub fn render(&self) -> String {
        self.files
            .iter()
            .map(|(path, content)| format!("--- FILE: {path} ---\n{content}\n"))
            .collect()
    }

    pub fn anchor_path(&self) -> Option<&str> {
        self.anchor.as_ref().map(|a| a.path.as_str())
    }
}

/// True when the latest failure count did not improve on the previous one.
pub fn is_stuck(history: &[usize]) -> bool {
    match history {
        [.., previous, last] => last >= previous && *last > 0,
        _ => false,
    }
}

/// Ordered resolver list.
#[derive(Debug, Clone)]
pub struct AnchorResolver {
    resolvers: Vec<(AnchorKind, ResolverFn)>,
}

impl Default for AnchorResolver {
    fn default() -> Self {
        Self {
            resolvers: vec![
                (AnchorKind::Import, resolve_import as ResolverFn),
                (AnchorKind::Definition, resolve_definition as ResolverFn),
                (AnchorKind::Traceback, resolve_traceback as ResolverFn),
            ],
        }
    }
}

impl AnchorResolver {
    pub fn with_resolvers(resolvers: Vec<(AnchorKind, ResolverFn)>) -> Self {
        Self { resolvers }
    }

    /// Every hypothesis, in precedence order.
    pub fn hypotheses(&self, signals: &LogSignals, tree: &SourceTree) -> Vec<Anchor> {
        self.resolvers
            .iter()
            .filter_map(|(kind, resolve)| resolve(signals, tree).map(|path| Anchor::new(*kind, path)))
            .collect()
    }

    /// First hypothesis in precedence order, unless the run is stuck.
    pub fn resolve(
        &self,
        signals: &LogSignals,
        tree: &SourceTree,
        failure_history: &[usize],
    ) -> AnchorDecision {
        if is_stuck(failure_history) {
            debug!(?failure_history, "failure count not decreasing, anchoring disabled");
            return AnchorDecision::Scan { stuck: true };
        }

        self.resolvers
            .iter()
            .find_map(|(kind, resolve)| resolve(signals, tree).map(|path| Anchor::new(*kind, path)))
            .map_or(AnchorDecision::Scan { stuck: false }, AnchorDecision::Anchored)
    }

    /// Context for `decision`: the anchored file (plus config files when the
    /// log shows import problems), or every source file up to `max_bytes`.
    pub fn build_context(
        &self,
        decision: &AnchorDecision,
        tree: &SourceTree,
        log: &str,
        max_bytes: usize,
    ) -> DiagnosisContext {
        let mut files = Vec::new();
        let mut used = 0usize;
        let mut push = |path: &str, files: &mut Vec<(String, String)>| {
            if let Ok(content) = tree.read(path) {
                let rendered = numbered(&content);
                if used + rendered.len() > max_bytes && !files.is_empty() {
                    return false;
                }
                used += rendered.len();
                files.push((path.to_string(), rendered));
            }
            true
        };

        match decision {
            AnchorDecision::Anchored(anchor) => {
                push(&anchor.path, &mut files);
                if IMPORT_ERROR_MARKERS.iter().any(|m| log.contains(m)) {
                    for config in tree.config_files() {
                        push(config, &mut files);
                    }
                }
            }
            AnchorDecision::Scan { .. } => {
                for config in tree.config_files() {
                    push(config, &mut files);
                }
                for source in tree.source_files() {
                    if !push(source, &mut files) {
                        break;
                    }
                }
            }
        }

        DiagnosisContext {
            files,
            anchor: decision.anchor().cloned(),
            stuck: matches!(decision, AnchorDecision::Scan { stuck: true }),
        }
    }
}

/// Modules referenced by import statements in `content`, in source order.
/// For `from pkg import name` both `pkg.name` and `pkg` are yielded.
pub fn imported_modules(content: &str) -> Vec<String> {
    let mut modules = Vec::new();
    for line in content.lines() {
        if let Some(caps) = PY_FROM_IMPORT.captures(line) {
            let module = caps["module"].to_string();
            for name in caps["names"].split(',') {
                let name = name.trim().trim_matches(|c| c == '(' || c == ')').trim();
                let name = name.split_whitespace().next().unwrap_or("");
                if !name.is_empty() && name != "*" {
                    modules.push(format!("{module}.{name}"));
                }
            }
            modules.push(module);
        } else if let Some(caps) = PY_IMPORT.captures(line) {
            modules.extend(caps["modules"].split(',').map(|m| m.trim().to_string()));
        }
        for caps in JS_IMPORT.captures_iter(line) {
            modules.push(caps["module"].to_string());
        }
    }
    modules
}

fn failing_test_sources(signals: &LogSignals, tree: &SourceTree) -> Vec<(String, String)> {
    signals
        .failing_tests
        .iter()
        .filter_map(|test| {
            let path = if tree.contains(&test.file) {
                test.file.clone()
            } else {
                tree.find_by_suffix(&test.file)?.to_string()
            };
            Some((path, test.name.clone()))
        })
        .collect()
}

/// Symbols a test named `test_foo_bar` may exercise: `foo_bar`, then `foo`.
pub fn tested_symbol_candidates(test_name: &str) -> Vec<String> {
    let Some(stem) = test_name.strip_prefix("test_") else {
        return Vec::new();
    };
    let mut candidates = vec![stem.to_string()];
    let mut current = stem;
    while let Some((head, _)) = current.rsplit_once('_') {
        if head.is_empty() {
            break;
        }
        candidates.push(head.to_string());
        current = head;
    }
    candidates
}

/// File of the module imported by the first failing test. When the test
/// imports several source modules, the one defining the tested symbol wins.
pub fn resolve_import(signals: &LogSignals, tree: &SourceTree) -> Option<String> {
    for (test_path, test_name) in failing_test_sources(signals, tree) {
        let Ok(content) = tree.read(&test_path) else {
            continue;
        };

        let mut files: Vec<&str> = Vec::new();
        for module in imported_modules(&content) {
            if let Some(file) = tree.module_file(&module) {
                if !is_test_file(file) && !files.contains(&file) {
                    files.push(file);
                }
            }
        }

        let symbols = tested_symbol_candidates(&test_name);
        let defining = files.iter().find(|file| {
            tree.read(file).is_ok_and(|src| {
                symbols
                    .iter()
                    .any(|s| definition_line(&src, s).is_some())
            })
        });
        if let Some(file) = defining.or_else(|| files.first()) {
            return Some((*file).to_string());
        }
    }
    None
}

/// File defining the function or class a failing test is named after
/// (`test_foo` → `def foo`/`class foo`), trying shorter prefixes of the name.
pub fn resolve_definition(signals: &LogSignals, tree: &SourceTree) -> Option<String> {
    signals.failing_tests.iter().find_map(|test| {
        tested_symbol_candidates(&test.name)
            .iter()
            .find_map(|symbol| tree.find_definition(symbol).map(|(file, _)| file.to_string()))
    })
}

/// Last traceback file that is a non-test file of the tree.
pub fn resolve_traceback(signals: &LogSignals, tree: &SourceTree) -> Option<String> {
    signals.traceback_files.iter().rev().find_map(|file| {
        if is_test_file(file) {
            return None;
        }
        if tree.contains(file) {
            return Some(file.clone());
        }
        tree.find_by_suffix(file)
            .filter(|f| !is_test_file(f))
            .map(ToString::to_string)
    })
}
