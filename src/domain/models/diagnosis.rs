//! Diagnosis, fix audit records and anchor hypotheses.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bug category assigned to a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BugCategory {
    Linting,
    Syntax,
    Logic,
    TypeError,
    Import,
    Indentation,
    MarkerCleanup,
}

impl BugCategory {
    pub const ALL: [Self; 7] = [
        Self::Linting,
        Self::Syntax,
        Self::Logic,
        Self::TypeError,
        Self::Import,
        Self::Indentation,
        Self::MarkerCleanup,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Linting => "LINTING",
            Self::Syntax => "SYNTAX",
            Self::Logic => "LOGIC",
            Self::TypeError => "TYPE_ERROR",
            Self::Import => "IMPORT",
            Self::Indentation => "INDENTATION",
            Self::MarkerCleanup => "MARKER_CLEANUP",
        }
    }

    /// Lenient parse of a category label as produced by the reasoning step.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "LINTING" | "LINT" => Some(Self::Linting),
            "SYNTAX" | "SYNTAX_ERROR" => Some(Self::Syntax),
            "LOGIC" | "LOGIC_ERROR" | "ASSERTION" => Some(Self::Logic),
            "TYPE_ERROR" | "TYPEERROR" | "TYPE" => Some(Self::TypeError),
            "IMPORT" | "IMPORT_ERROR" | "IMPORTERROR" => Some(Self::Import),
            "INDENTATION" | "INDENTATION_ERROR" | "INDENTATIONERROR" => Some(Self::Indentation),
            "MARKER_CLEANUP" | "MARKER" | "CONFLICT_MARKER" => Some(Self::MarkerCleanup),
            _ => None,
        }
    }
}

impl fmt::Display for BugCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured output of one diagnosis step. Lives for a single iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Repository-relative path of the file to fix.
    pub target_file: String,
    /// 1-based line number, never 0 after post-processing.
    pub target_line: u32,
    pub category: BugCategory,
    pub description: String,
    /// Exceptions the failing tests expect to be raised.
    #[serde(default)]
    pub expected_exceptions: Vec<String>,
    /// Anchor file the context was narrowed to, if any.
    #[serde(default)]
    pub anchor_file: Option<String>,
}

/// Audit entry for one applied patch. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRecord {
    pub path: String,
    pub bug_type: BugCategory,
    pub line: u32,
    pub description: String,
    pub commit_message: String,
}

/// Source of an anchor hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    /// Module imported by the failing test.
    Import,
    /// File defining the function or class the failing test is named after.
    Definition,
    /// Last source-tree file in a traceback.
    Traceback,
}

impl AnchorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Import => "import",
            Self::Definition => "definition",
            Self::Traceback => "traceback",
        }
    }
}

/// Hypothesis about which source file is responsible for a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub kind: AnchorKind,
    /// Repository-relative path.
    pub path: String,
}

impl Anchor {
    pub fn new(kind: AnchorKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trips_through_labels() {
        for category in BugCategory::ALL {
            assert_eq!(BugCategory::from_str(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_category_lenient_parse() {
        assert_eq!(BugCategory::from_str("type error"), Some(BugCategory::TypeError));
        assert_eq!(BugCategory::from_str("lint"), Some(BugCategory::Linting));
        assert_eq!(BugCategory::from_str("ImportError"), Some(BugCategory::Import));
        assert_eq!(BugCategory::from_str("nonsense"), None);
    }

    #[test]
    fn test_fix_record_serializes_bug_type_label() {
        let fix = FixRecord {
            path: "calc.py".into(),
            bug_type: BugCategory::Syntax,
            line: 6,
            description: "missing colon".into(),
            commit_message: "[AI-AGENT] Fix SYNTAX in calc.py".into(),
        };
        let json = serde_json::to_value(&fix).unwrap();
        assert_eq!(json["bug_type"], "SYNTAX");
    }
}
