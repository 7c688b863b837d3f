//! Publishing through the real `git` binary against a local bare remote.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use ci_healer::domain::models::config::PublishConfig;
use ci_healer::domain::models::{BugCategory, FixRecord, HealingRequest, RunState};
use ci_healer::infrastructure::git::GitCli;
use ci_healer::services::Publisher;

use common::{git, git_init_with_commit};

const BRANCH: &str = "TEAM_ONE_AL_EX_AI_FIX";

struct Fixture {
    _root: tempfile::TempDir,
    remote: std::path::PathBuf,
    work: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let remote = root.path().join("remote.git");
    let work = root.path().join("work");
    fs::create_dir_all(&remote).unwrap();
    fs::create_dir_all(&work).unwrap();
    git(&remote, &["init", "--quiet", "--bare"]);

    fs::write(work.join("calc.py"), "def add(a, b):\n    return a - b\n").unwrap();
    git_init_with_commit(&work);
    git(&work, &["remote", "add", "origin", remote.to_str().unwrap()]);
    git(&work, &["push", "--quiet", "origin", "main"]);

    Fixture {
        _root: root,
        remote,
        work,
    }
}

fn config() -> PublishConfig {
    PublishConfig {
        github_token: None,
        ..PublishConfig::default()
    }
}

fn publisher() -> Publisher {
    let config = config();
    Publisher::new(Arc::new(GitCli::new(&config)), None, config)
}

fn state_with_fix(work: &Path) -> RunState {
    let mut state = RunState::new(&HealingRequest {
        repo_url: "https://github.com/acme/calc".to_string(),
        team_name: "Team One".to_string(),
        leader_name: "Al Ex".to_string(),
        max_iterations: 5,
        model: None,
    });
    state.repo_path = Some(work.to_path_buf());
    state.push_fix(FixRecord {
        path: "calc.py".to_string(),
        bug_type: BugCategory::Logic,
        line: 2,
        description: "use addition".to_string(),
        commit_message: "[AI-AGENT] Fix LOGIC in calc.py".to_string(),
    });
    state
}

#[tokio::test]
async fn test_publish_commits_fix_and_pushes_branch() {
    let fx = fixture();
    fs::write(fx.work.join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
    fs::create_dir_all(fx.work.join("__pycache__")).unwrap();
    fs::write(fx.work.join("__pycache__/calc.cpython-312.pyc"), "bytecode").unwrap();

    let outcome = publisher().publish(&state_with_fix(&fx.work)).await.unwrap();

    assert_eq!(outcome.branch, BRANCH);
    assert!(outcome.committed);
    assert!(outcome.pushed);
    assert!(!outcome.conflict_recovered);
    assert!(outcome.failure.is_none());
    assert!(outcome.pr_url.is_none());

    let subject = git(&fx.remote, &["log", "-1", "--format=%s", BRANCH]);
    assert_eq!(subject.trim(), "[AI-AGENT] Fix LOGIC in calc.py");
    let files = git(&fx.remote, &["ls-tree", "-r", "--name-only", BRANCH]);
    assert!(files.lines().any(|f| f == ".gitignore"));
    assert!(files.lines().any(|f| f == "calc.py"));
    assert!(!files.contains("__pycache__"));
    assert!(!fx.work.join("__pycache__").exists());

    // Nothing changed since: no empty commit, push still succeeds.
    let again = publisher().publish(&state_with_fix(&fx.work)).await.unwrap();
    assert!(!again.committed);
    assert!(again.pushed);
    let count = git(&fx.remote, &["rev-list", "--count", BRANCH]);
    assert_eq!(count.trim(), "2");
}

#[tokio::test]
async fn test_conflicting_remote_branch_is_recovered_by_reset() {
    let fx = fixture();
    fs::write(fx.work.join("calc.py"), "def add(a, b):\n    return a + b\n").unwrap();
    publisher().publish(&state_with_fix(&fx.work)).await.unwrap();

    // Someone else pushes a conflicting change to the same branch.
    let other = fx.work.parent().unwrap().join("other");
    git(
        fx.work.parent().unwrap(),
        &["clone", "--quiet", "--branch", BRANCH, fx.remote.to_str().unwrap(), "other"],
    );
    git(&other, &["config", "user.name", "Other"]);
    git(&other, &["config", "user.email", "other@example.com"]);
    fs::write(other.join("calc.py"), "def add(a, b):\n    return b + a\n").unwrap();
    git(&other, &["commit", "--quiet", "-am", "competing fix"]);
    git(&other, &["push", "--quiet", "origin", BRANCH]);

    fs::write(fx.work.join("calc.py"), "def add(a, b):\n    return sum((a, b))\n").unwrap();
    let outcome = publisher().publish(&state_with_fix(&fx.work)).await.unwrap();

    assert!(outcome.committed);
    assert!(outcome.conflict_recovered);
    assert!(outcome.pushed);
    assert!(outcome.failure.is_none());

    let status = git(&fx.work, &["status", "--porcelain"]);
    assert!(status.trim().is_empty(), "tree left dirty: {status}");
    assert!(!fx.work.join(".git/rebase-merge").exists());
    let local = git(&fx.work, &["rev-parse", "HEAD"]);
    let remote = git(&fx.remote, &["rev-parse", BRANCH]);
    assert_eq!(local, remote);
}
