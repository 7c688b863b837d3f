//! HTTP client for the reasoning capability.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, StatusCode};
use tracing::{debug, instrument, warn};

use super::types::{MessageRequest, MessageResponse};
use crate::domain::errors::ReasoningError;
use crate::domain::models::config::ReasoningConfig;
use crate::domain::ports::ReasoningClient;

/// Messages-style HTTP reasoning client.
///
/// One request per `generate` call. Retries live in the gateways'
/// `RetryPolicy`, not here.
pub struct HttpReasoningClient {
    http_client: ReqwestClient,
    api_key: Option<String>,
    base_url: String,
    default_model: String,
    max_tokens: u32,
}

impl HttpReasoningClient {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            default_model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    async fn send_request(&self, request: &MessageRequest) -> Result<MessageResponse, ReasoningError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ReasoningError::Unauthorized("no API key configured".to_string()))?;

        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasoningError::Timeout
                } else {
                    ReasoningError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(error_from_status(status, body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ReasoningError::Network(e.to_string()))?;
        serde_json::from_str(&body)
            .map_err(|e| ReasoningError::Malformed(format!("unexpected response envelope: {e}")))
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    #[instrument(skip_all, fields(model = tracing::field::Empty, prompt_chars = prompt.len()))]
    async fn generate(
        &self,
        prompt: &str,
        model: Option<&str>,
    ) -> Result<serde_json::Value, ReasoningError> {
        let model = model.unwrap_or(&self.default_model);
        tracing::Span::current().record("model", model);

        let request = MessageRequest::user(model, prompt, self.max_tokens);
        let response = self.send_request(&request).await.inspect_err(|e| {
            warn!(error = %e, transient = e.is_transient(), "reasoning request failed");
        })?;
        debug!(id = %response.id, stop_reason = ?response.stop_reason, "reasoning reply received");

        parse_json_reply(&response.text())
    }
}

/// Map a non-success status to a [`ReasoningError`].
pub fn error_from_status(status: StatusCode, body: String) -> ReasoningError {
    match status.as_u16() {
        429 if body.to_lowercase().contains("quota") => ReasoningError::QuotaExceeded(body),
        429 => ReasoningError::RateLimited,
        400 => ReasoningError::InvalidRequest(body),
        401 | 403 => ReasoningError::Unauthorized(body),
        408 => ReasoningError::Timeout,
        code @ (500..=599) => ReasoningError::ServerError { status: code, body },
        code => ReasoningError::InvalidRequest(format!("unexpected status {code}: {body}")),
    }
}

/// Parse a reply as JSON.
///
/// Markdown fences are stripped; when the text carries prose around a JSON
/// object, the outermost `{...}` span is tried. A top-level array yields
/// its first element.
pub fn parse_json_reply(text: &str) -> Result<serde_json::Value, ReasoningError> {
    let body = strip_fences(text);
    let value = serde_json::from_str::<serde_json::Value>(body)
        .or_else(|first_err| {
            match (body.find('{'), body.rfind('}')) {
                (Some(start), Some(end)) if end > start => {
                    serde_json::from_str(&body[start..=end])
                }
                _ => Err(first_err),
            }
        })
        .map_err(|e| ReasoningError::Malformed(format!("reply is not JSON: {e}")))?;

    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| ReasoningError::Malformed("empty JSON array".to_string())),
        other => Ok(other),
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_and_fenced() {
        assert_eq!(parse_json_reply(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert_eq!(
            parse_json_reply("```json\n{\"a\": 1}\n```").unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_parse_array_takes_first() {
        assert_eq!(
            parse_json_reply(r#"[{"file": "a.py"}, {"file": "b.py"}]"#).unwrap(),
            json!({"file": "a.py"})
        );
        assert!(matches!(
            parse_json_reply("[]").unwrap_err(),
            ReasoningError::Malformed(_)
        ));
    }

    #[test]
    fn test_parse_object_inside_prose() {
        assert_eq!(
            parse_json_reply("Here you go: {\"line\": 6} hope it helps").unwrap(),
            json!({"line": 6})
        );
        assert!(matches!(
            parse_json_reply("no json here").unwrap_err(),
            ReasoningError::Malformed(_)
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            error_from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ReasoningError::RateLimited
        ));
        assert!(matches!(
            error_from_status(StatusCode::TOO_MANY_REQUESTS, "Daily quota exhausted".into()),
            ReasoningError::QuotaExceeded(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::from_u16(529).unwrap(), "overloaded".into()),
            ReasoningError::ServerError { status: 529, .. }
        ));
        assert!(matches!(
            error_from_status(StatusCode::UNAUTHORIZED, String::new()),
            ReasoningError::Unauthorized(_)
        ));
        assert!(matches!(
            error_from_status(StatusCode::BAD_REQUEST, String::new()),
            ReasoningError::InvalidRequest(_)
        ));
    }
}
