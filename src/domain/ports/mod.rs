//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that infrastructure adapters must implement:
//! - Discovery: clone a repository and detect its stack and tests
//! - Sandbox: isolated, time-bounded test execution
//! - ReasoningClient: the external structured-output capability
//! - GitWorkspace / PullRequestHost: publishing
//! - TelemetrySink: run lifecycle reporting

pub mod discovery;
pub mod reasoning;
pub mod sandbox;
pub mod telemetry;
pub mod version_control;

pub use discovery::{Discovery, DiscoveryReport};
pub use reasoning::ReasoningClient;
pub use sandbox::{Sandbox, SandboxFailure, SandboxOutcome};
pub use telemetry::{NullTelemetry, TelemetrySink};
pub use version_control::{
    GitWorkspace, PullRequestHost, PullRequestOutcome, PullRequestSpec, RepoCoordinates,
};
