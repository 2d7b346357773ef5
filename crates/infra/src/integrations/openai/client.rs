/// OpenAI API client for scheduling intent extraction and reply prose
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mailpilot_core::CompletionService;
use mailpilot_domain::{
    IntentParse, OpenAiConfig, ParsedIntent, PromptVariant, ProviderError, ProviderResult,
    RawMessage, ReplyKind, ReplyRequest, TimeWindow,
};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, info, warn};

use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, JsonSchema, LLMIntentResponse,
    OpenAIError, ResponseFormat,
};
use crate::http::HttpClient;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const INTENT_MAX_TOKENS: u32 = 1_000;
const REPLY_MAX_TOKENS: u32 = 600;
const STANDARD_TEMPERATURE: f32 = 0.2;
const REPLY_TEMPERATURE: f32 = 0.5;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
/// Bodies beyond this are truncated before prompting.
const MAX_BODY_CHARS: usize = 8_000;

const INTENT_SYSTEM_PROMPT: &str = "You are a scheduling assistant copied on email threads. \
Decide whether the latest message asks to schedule a meeting. If it does, extract every time \
window the sender proposes, most preferred first, as RFC 3339 timestamps with an explicit UTC \
offset. Resolve relative dates (\"next Tuesday\", \"tomorrow afternoon\") against the reference \
time given. Use the sender's timezone when stated, otherwise the default timezone given. \
List participant email addresses that should attend. If no duration is stated use 30 minutes.";

const STRICT_SUFFIX: &str = "\n\nSTRICT MODE: your previous answer could not be used. Reply with \
a single JSON object matching the schema exactly. Every start and end MUST be a complete RFC 3339 \
timestamp such as 2025-03-04T14:00:00-05:00, and end MUST be after start. Do not add commentary.";

const REPLY_SYSTEM_PROMPT: &str = "You write short, polite email replies on behalf of a busy \
professional's scheduling assistant. Write plain text only, no subject line, no signature block \
beyond \"Best regards\". Never mention specific dates or times yourself: put the literal \
placeholder exactly once where the time list belongs and it will be filled in.";

/// OpenAI API client implementing the completion capability
pub struct OpenAIClient {
    http_client: HttpClient,
    api_key: String,
    model: String,
    api_url: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key (required)
    /// * `http_client` - HTTP client with retry logic
    pub fn new(api_key: String, http_client: HttpClient) -> Self {
        Self {
            http_client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            api_url: OPENAI_API_URL.to_string(),
        }
    }

    /// Build a client from the `openai` config section
    pub fn from_config(config: &OpenAiConfig, http_client: HttpClient) -> Self {
        Self::new(config.api_key.clone(), http_client)
            .with_model(config.model.clone())
            .with_api_url(config.api_url.clone())
    }

    /// Create a new client with custom model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different endpoint (proxies, tests)
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn intent_request(
        &self,
        message: &RawMessage,
        variant: PromptVariant,
        reference_time: DateTime<Utc>,
        default_timezone: &str,
    ) -> ChatCompletionRequest {
        let system = match variant {
            PromptVariant::Standard => INTENT_SYSTEM_PROMPT.to_string(),
            PromptVariant::Strict => format!("{INTENT_SYSTEM_PROMPT}{STRICT_SUFFIX}"),
        };
        let temperature = match variant {
            PromptVariant::Standard => STANDARD_TEMPERATURE,
            PromptVariant::Strict => 0.0,
        };

        let prompt = format!(
            "Reference time: {}\nDefault timezone: {}\n\nFrom: {}\nTo: {}\nCc: {}\nSubject: {}\n\n{}",
            reference_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            default_timezone,
            message.from,
            message.to.join(", "),
            message.cc.join(", "),
            message.subject,
            truncate_chars(&message.body, MAX_BODY_CHARS),
        );

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system },
                ChatMessage { role: "user".to_string(), content: prompt },
            ],
            max_tokens: INTENT_MAX_TOKENS,
            temperature,
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: Some(JsonSchema {
                    name: "scheduling_intent".to_string(),
                    schema: intent_schema(),
                    strict: Some(true),
                }),
            },
        }
    }

    fn reply_request(&self, request: &ReplyRequest) -> ChatCompletionRequest {
        let goal = match request.kind {
            ReplyKind::ConfirmSlot => "Confirm the meeting at the time listed.",
            ReplyKind::ProposeAlternatives => {
                "Explain the requested times do not work and offer the listed alternatives."
            }
            ReplyKind::RequestMoreOptions => {
                "Explain none of the requested times work and ask for a few more options."
            }
        };

        let prompt = format!(
            "Goal: {goal}\nPlaceholder: {placeholder}\nTimes that will replace it ({count}):\n{slots}\n\n\
             Meeting: {summary}\nReplying to: {sender}\nSubject: {subject}\n\nOriginal message:\n{body}",
            placeholder = request.placeholder,
            count = request.slot_lines.len(),
            slots = request.slot_lines.join("\n"),
            summary = request.intent_summary,
            sender = request.sender,
            subject = request.subject,
            body = truncate_chars(&request.original_body, MAX_BODY_CHARS),
        );

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: REPLY_SYSTEM_PROMPT.to_string() },
                ChatMessage { role: "user".to_string(), content: prompt },
            ],
            max_tokens: REPLY_MAX_TOKENS,
            temperature: REPLY_TEMPERATURE,
            response_format: ResponseFormat { format_type: "text".to_string(), json_schema: None },
        }
    }

    /// Call OpenAI Chat Completions API and return the first choice's text
    async fn call_api(&self, payload: &ChatCompletionRequest) -> Result<String, OpenAIError> {
        let request_builder = self
            .http_client
            .request(Method::POST, &self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(payload);

        // Execute with retry (handled by HttpClient)
        let response = self.http_client.send(request_builder).await.map_err(|err| match err {
            ProviderError::Timeout(after) => OpenAIError::Timeout(after),
            other => OpenAIError::Network(other.to_string()),
        })?;

        let status = response.status();
        debug!(status = status.as_u16(), "Received OpenAI API response");

        if !status.is_success() {
            return Err(handle_error_status(status.as_u16(), response).await);
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| OpenAIError::InvalidSchema(format!("Failed to parse response: {e}")))?;

        if let Some(usage) = &chat_response.usage {
            debug!(
                model = %self.model,
                tokens = usage.total_tokens,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "OpenAI token usage"
            );
        }

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| OpenAIError::InvalidSchema("Response contained no content".to_string()))
    }
}

#[async_trait]
impl CompletionService for OpenAIClient {
    async fn parse_intent(
        &self,
        message: &RawMessage,
        variant: PromptVariant,
        reference_time: DateTime<Utc>,
        default_timezone: &str,
    ) -> ProviderResult<IntentParse> {
        let payload = self.intent_request(message, variant, reference_time, default_timezone);
        let content = self.call_api(&payload).await?;
        let parsed = interpret_intent(&content);

        match &parsed {
            IntentParse::Scheduling(intent) => info!(
                message_id = %message.id,
                windows = intent.requested_windows.len(),
                ?variant,
                "OpenAI found scheduling intent"
            ),
            IntentParse::NotScheduling { reason } => {
                info!(message_id = %message.id, reason = %reason, "OpenAI found no scheduling intent");
            }
            IntentParse::Malformed { .. } => {
                warn!(message_id = %message.id, ?variant, "OpenAI intent output was malformed");
            }
        }

        Ok(parsed)
    }

    async fn generate_reply(&self, request: &ReplyRequest) -> ProviderResult<String> {
        let payload = self.reply_request(request);
        let content = self.call_api(&payload).await?;
        let text = content.trim();
        if text.is_empty() {
            return Err(OpenAIError::InvalidSchema("Reply text was empty".to_string()).into());
        }
        Ok(text.to_string())
    }
}

/// Handle HTTP error status codes
async fn handle_error_status(status: u16, response: reqwest::Response) -> OpenAIError {
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok());
    let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

    match status {
        401 | 403 => OpenAIError::Authentication(format!("Invalid API key ({status})")),
        429 => OpenAIError::RateLimit(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
        _ => OpenAIError::Api { status, message },
    }
}

/// Turn the model's JSON document into a parse result. Anything unusable is
/// `Malformed` so the caller can retry with the strict prompt.
fn interpret_intent(content: &str) -> IntentParse {
    let malformed = || IntentParse::Malformed { raw: content.to_string() };

    let Ok(doc) = serde_json::from_str::<LLMIntentResponse>(content) else {
        return malformed();
    };

    if !doc.is_scheduling {
        let reason = if doc.reason.trim().is_empty() {
            "no scheduling request found".to_string()
        } else {
            doc.reason
        };
        return IntentParse::NotScheduling { reason };
    }

    let mut windows = Vec::with_capacity(doc.requested_windows.len());
    for window in &doc.requested_windows {
        let (Some(start), Some(end)) = (parse_instant(&window.start), parse_instant(&window.end)) else {
            return malformed();
        };
        let window = TimeWindow::new(start, end);
        if !window.is_empty() {
            windows.push(window);
        }
    }

    IntentParse::Scheduling(ParsedIntent {
        summary: doc.summary,
        requested_windows: windows,
        participants: doc.participants,
        duration_minutes: u32::try_from(doc.duration_minutes.max(0)).unwrap_or(u32::MAX),
        timezone: doc.timezone.filter(|tz| !tz.trim().is_empty()),
    })
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok().map(|at| at.with_timezone(&Utc))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn intent_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "is_scheduling": { "type": "boolean" },
            "reason": { "type": "string" },
            "summary": { "type": "string" },
            "duration_minutes": { "type": "integer" },
            "timezone": { "type": ["string", "null"] },
            "participants": {
                "type": "array",
                "items": { "type": "string" }
            },
            "requested_windows": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "start": { "type": "string" },
                        "end": { "type": "string" }
                    },
                    "required": ["start", "end"],
                    "additionalProperties": false
                }
            }
        },
        "required": [
            "is_scheduling", "reason", "summary", "duration_minutes",
            "timezone", "participants", "requested_windows"
        ],
        "additionalProperties": false
    })
}
