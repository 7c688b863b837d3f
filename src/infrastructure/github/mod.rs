//! GitHub pull-request host adapter

pub mod client;

pub use client::GitHubClient;
