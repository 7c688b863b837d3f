//! CLI command implementations.

pub mod batch;
pub mod branch;
pub mod heal;
pub mod results;
