//! Repository discovery adapter

pub mod repo_discovery;

pub use repo_discovery::{detect_stack, discover_tests, RepoDiscovery};
