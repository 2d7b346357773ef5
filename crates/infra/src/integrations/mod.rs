//! External service integrations

pub mod google;
/// OpenAI chat completions adapter.
pub mod openai;
