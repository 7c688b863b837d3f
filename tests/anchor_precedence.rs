//! Anchor resolution and the hallucination guard on realistic checkouts.

use std::fs;

use ci_healer::domain::errors::HealError;
use ci_healer::domain::models::{Anchor, AnchorKind};
use ci_healer::services::anchor_resolver::{resolve_definition, resolve_traceback, ResolverFn};
use ci_healer::services::patch_gateway::check_target;
use ci_healer::services::{AnchorDecision, AnchorResolver, LogSignalExtractor, SourceTree};

const SALARY_LOG: &str = "\
collected 1 item

test_salary.py::test_calculate_salary FAILED                             [100%]

=================================== FAILURES ===================================
____________________________ test_calculate_salary _____________________________

    def test_calculate_salary():
>       assert multiply(40, 25) == 1000

test_salary.py:5:
_ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _ _
  File \"/app/math_ops.py\", line 4, in multiply
    return scale(a) * b
  File \"/app/utils.py\", line 2, in scale
    return value - 0
E       assert 999 == 1000
=========================== short test summary info ============================
FAILED test_salary.py::test_calculate_salary - assert 999 == 1000
============================== 1 failed in 0.03s ===============================
";

fn salary_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(
        root.join("math_ops.py"),
        "from utils import scale\n\n\ndef multiply(a, b):\n    return scale(a) * b - 1\n",
    )
    .unwrap();
    fs::write(
        root.join("payroll.py"),
        "def calculate_salary(hours, rate):\n    return hours * rate\n",
    )
    .unwrap();
    fs::write(root.join("utils.py"), "def scale(value):\n    return value - 0\n").unwrap();
    fs::write(
        root.join("test_salary.py"),
        "from math_ops import multiply\n\n\ndef test_calculate_salary():\n    assert multiply(40, 25) == 1000\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_import_anchor_beats_definition_and_traceback() {
    let repo = salary_repo();
    let tree = SourceTree::scan(repo.path()).unwrap();
    let signals = LogSignalExtractor::default().extract(SALARY_LOG, 1, Some(repo.path()));

    assert_eq!(signals.traceback_files.last().map(String::as_str), Some("utils.py"));

    let resolver = AnchorResolver::default();
    assert_eq!(
        resolver.hypotheses(&signals, &tree),
        vec![
            Anchor::new(AnchorKind::Import, "math_ops.py"),
            Anchor::new(AnchorKind::Definition, "payroll.py"),
            Anchor::new(AnchorKind::Traceback, "utils.py"),
        ]
    );
    assert_eq!(
        resolver.resolve(&signals, &tree, &[]),
        AnchorDecision::Anchored(Anchor::new(AnchorKind::Import, "math_ops.py"))
    );
}

#[test]
fn test_definition_beats_traceback_without_import_resolver() {
    let repo = salary_repo();
    let tree = SourceTree::scan(repo.path()).unwrap();
    let signals = LogSignalExtractor::default().extract(SALARY_LOG, 1, Some(repo.path()));

    let resolver = AnchorResolver::with_resolvers(vec![
        (AnchorKind::Definition, resolve_definition as ResolverFn),
        (AnchorKind::Traceback, resolve_traceback as ResolverFn),
    ]);
    assert_eq!(
        resolver.resolve(&signals, &tree, &[]).anchor(),
        Some(&Anchor::new(AnchorKind::Definition, "payroll.py"))
    );
}

#[test]
fn test_stuck_run_widens_to_full_tree() {
    let repo = salary_repo();
    let tree = SourceTree::scan(repo.path()).unwrap();
    let signals = LogSignalExtractor::default().extract(SALARY_LOG, 1, Some(repo.path()));
    let resolver = AnchorResolver::default();

    let decision = resolver.resolve(&signals, &tree, &[2, 1, 1]);
    assert_eq!(decision, AnchorDecision::Scan { stuck: true });

    let context = resolver.build_context(&decision, &tree, SALARY_LOG, 100_000);
    let paths: Vec<&str> = context.files.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, vec!["math_ops.py", "payroll.py", "utils.py"]);
    assert!(context.stuck);
    assert!(context.anchor_path().is_none());

    // An improving run keeps its anchor.
    assert!(resolver.resolve(&signals, &tree, &[2, 1]).anchor().is_some());
}

#[test]
fn test_guard_rejects_target_outside_anchor_and_log() {
    let log = "FAILED tests/test_app.py::test_total - assert 0 == 3\nsrc/app.py:3: AssertionError\n";
    let err = check_target("src/boss.py", Some("src/app.py"), log, false).unwrap_err();
    assert!(matches!(err, HealError::HallucinatedTarget { .. }));
    assert_eq!(err.tag(), "HALLUCINATED_TARGET");

    assert!(check_target("src/app.py", Some("src/app.py"), log, false).is_ok());
    assert!(check_target("app.py", Some("src/app.py"), "", false).is_ok());
    assert!(check_target("src/boss.py", Some("src/app.py"), log, true).is_ok());
}
