/// OpenAI integration for scheduling intent extraction and reply drafting
///
/// # Architecture
///
/// - **Client**: `OpenAIClient` - implements `CompletionService` over the
///   Chat Completions API
/// - **Types**: Request/response types and the intent document schema
/// - **Error Handling**: `OpenAIError`, converted to `ProviderError` at the
///   port boundary
///
/// # API Integration
///
/// - Model: `gpt-4o-mini` (configurable via `openai.model`)
/// - Intent parsing uses a strict `json_schema` response format; output that
///   still does not fit comes back as `IntentParse::Malformed` so the
///   pipeline can retry once with the strict prompt
/// - Reply generation returns plain text containing the slot placeholder
///
/// # Error Handling
///
/// - **Network errors and 5xx**: Retried by `HttpClient`, then transient
/// - **Rate limits (429)**: Transient, honouring `Retry-After` in the message
/// - **Invalid API key**: Transient; never flags the mailbox
/// - **Other 4xx**: Permanent for the message
pub mod client;
/// Request and response bodies.
pub mod types;

pub use client::OpenAIClient;
pub use types::OpenAIError;
