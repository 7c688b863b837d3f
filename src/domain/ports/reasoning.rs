//! Reasoning port - interface to the external structured-output capability.

use async_trait::async_trait;

use crate::domain::errors::ReasoningError;

/// Bounded text in, structured JSON out.
///
/// Implementations classify every failure into a [`ReasoningError`]; callers
/// decide about retries. A deterministic implementation can stand in for the
/// real endpoint in tests.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send `prompt` and return the parsed JSON reply.
    ///
    /// `model` selects the backing model; `None` uses the implementation's
    /// default.
    async fn generate(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<serde_json::Value, ReasoningError>;
}
