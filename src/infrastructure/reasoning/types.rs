/// Request and response types for the messages API
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub model: String,

    pub messages: Vec<Message>,

    pub max_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Diagnosis and patching want deterministic replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl MessageRequest {
    pub fn user(model: impl Into<String>, prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.into(),
            }],
            max_tokens,
            system: Some(SYSTEM_PROMPT.to_string()),
            temperature: Some(0.0),
        }
    }
}

const SYSTEM_PROMPT: &str =
    "You are an automated CI repair engine. Reply with a single JSON object and nothing else.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub content: Vec<ContentBlock>,

    #[serde(default)]
    pub stop_reason: Option<String>,
}

impl MessageResponse {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_skips_non_text_blocks() {
        let response: MessageResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "{\"a\":"},
                {"type": "tool_use", "id": "t", "name": "x", "input": {}},
                {"type": "text", "text": " 1}"}
            ],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        assert_eq!(response.text(), "{\"a\": 1}");
    }

    #[test]
    fn test_user_request_shape() {
        let request = MessageRequest::user("model-x", "diagnose", 512);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 512);
        assert_eq!(value["temperature"], 0.0);
    }
}
