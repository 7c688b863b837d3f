//! Domain layer for the healing engine
//!
//! This module contains the run model, the error taxonomy and the port
//! traits that infrastructure adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{HealError, HealResult, ReasoningError};
