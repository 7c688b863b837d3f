//! Local git workspace adapter

pub mod cli;

pub use cli::{inject_token, GitCli};
