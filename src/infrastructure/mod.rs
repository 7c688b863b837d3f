//! Infrastructure layer module
//!
//! This module contains all infrastructure adapters and external integrations:
//! - Repository discovery (git clone, stack and test detection)
//! - Sandbox runner (docker or local process groups)
//! - Reasoning client (messages-style HTTP API)
//! - Git and GitHub publishing
//! - Results persistence
//! - Configuration management
//! - Logging infrastructure
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod discovery;
pub mod git;
pub mod github;
pub mod logging;
pub mod persistence;
pub mod reasoning;
pub mod sandbox;
