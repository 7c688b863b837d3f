//! Deterministic reasoning client backed by a queue of canned replies.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::ReasoningError;
use crate::domain::ports::ReasoningClient;

/// Replies are handed out in order; an exhausted queue answers `Malformed`.
/// Prompts are kept so tests can assert on what was asked.
#[derive(Debug, Default)]
pub struct ScriptedReasoningClient {
    replies: Mutex<VecDeque<Result<serde_json::Value, ReasoningError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedReasoningClient {
    pub fn new(replies: Vec<Result<serde_json::Value, ReasoningError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Result<serde_json::Value, ReasoningError>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoningClient {
    async fn generate(
        &self,
        prompt: &str,
        _model: Option<&str>,
    ) -> Result<serde_json::Value, ReasoningError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.replies
            .lock()
            .map_err(|_| ReasoningError::Malformed("script lock poisoned".to_string()))?
            .pop_front()
            .unwrap_or_else(|| Err(ReasoningError::Malformed("script exhausted".to_string())))
    }
}
