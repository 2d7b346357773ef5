/// OpenAI API types for intent parsing and reply generation
use mailpilot_domain::ProviderError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenAI API error types
#[derive(Debug, thiserror::Error)]
pub enum OpenAIError {
    /// Network-level error (connection failed, reset, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// OpenAI API returned an error response
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded - should retry after delay
    #[error("Rate limit exceeded (retry after {0}s)")]
    RateLimit(u64),

    /// Authentication failed (invalid API key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Response envelope doesn't match expected schema
    #[error("Invalid response schema: {0}")]
    InvalidSchema(String),

    /// Request timeout
    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<OpenAIError> for ProviderError {
    /// A rejected API key is an operator problem, not a mailbox credential
    /// problem, so it stays transient and never flags the mailbox.
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::Timeout(after) => Self::Timeout(after),
            OpenAIError::Api { status, .. } if status < 500 => Self::Malformed(err.to_string()),
            OpenAIError::InvalidSchema(_) => Self::Malformed(err.to_string()),
            OpenAIError::Network(_)
            | OpenAIError::Api { .. }
            | OpenAIError::RateLimit(_)
            | OpenAIError::Authentication(_) => Self::Transient(err.to_string()),
        }
    }
}

/// Internal types for OpenAI Chat Completions API
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchema>,
}

/// JSON schema wrapper used by OpenAI when `response_format = "json_schema"`.
#[derive(Debug, Serialize)]
pub(crate) struct JsonSchema {
    pub name: String,
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Response from OpenAI Chat Completions API
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Message {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Usage {
    pub total_tokens: i32,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

/// Intent document the model is constrained to produce
#[derive(Debug, Deserialize)]
pub(crate) struct LLMIntentResponse {
    pub is_scheduling: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub duration_minutes: i64,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub requested_windows: Vec<LLMWindow>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LLMWindow {
    pub start: String,
    pub end: String,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mailpilot_domain::ErrorClass;

    use super::*;

    #[test]
    fn deserializes_intent_with_optional_fields() {
        let json = r#"{
            "is_scheduling": true,
            "summary": "Intro call",
            "requested_windows": [{"start": "2025-03-04T14:00:00Z", "end": "2025-03-04T16:00:00Z"}]
        }"#;

        let intent: LLMIntentResponse = serde_json::from_str(json).expect("should deserialize");

        assert!(intent.is_scheduling);
        assert_eq!(intent.requested_windows.len(), 1);
        assert_eq!(intent.duration_minutes, 0);
        assert!(intent.timezone.is_none());
        assert!(intent.participants.is_empty());
    }

    #[test]
    fn error_classes_never_blame_the_mailbox() {
        let auth: ProviderError = OpenAIError::Authentication("bad key".into()).into();
        assert_eq!(auth.class(), ErrorClass::Transient);

        let bad_request: ProviderError =
            OpenAIError::Api { status: 400, message: "context length".into() }.into();
        assert_eq!(bad_request.class(), ErrorClass::PermanentMessage);

        let outage: ProviderError = OpenAIError::Api { status: 502, message: String::new() }.into();
        assert!(outage.is_retryable());

        let timeout: ProviderError = OpenAIError::Timeout(Duration::from_secs(30)).into();
        assert!(matches!(timeout, ProviderError::Timeout(_)));
    }
}
