//! Telemetry port - run lifecycle events for external reporting.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::models::{FixRecord, RunResultRecord, RunState};

/// Receives run lifecycle events. Failures are logged by the caller and never
/// abort a healing run.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn run_started(&self, state: &RunState) -> Result<()>;

    async fn fix_applied(&self, state: &RunState, fix: &FixRecord) -> Result<()>;

    async fn run_finalized(&self, record: &RunResultRecord) -> Result<()>;
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetry;

#[async_trait]
impl TelemetrySink for NullTelemetry {
    async fn run_started(&self, _state: &RunState) -> Result<()> {
        Ok(())
    }

    async fn fix_applied(&self, _state: &RunState, _fix: &FixRecord) -> Result<()> {
        Ok(())
    }

    async fn run_finalized(&self, _record: &RunResultRecord) -> Result<()> {
        Ok(())
    }
}
