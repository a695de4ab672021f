//! Bridges rig's `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::message::{AssistantContent, Message};
use rig::completion::{CompletionError, CompletionModel};

use crate::error::LlmError;

use super::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Wraps a rig completion model so the collaborators can call it.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "rig".to_string(),
        }
    }

    /// Name used in error messages.
    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = provider.to_string();
        self
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let Some((history, prompt)) = split_messages(&request.messages) else {
            return Err(LlmError::Rejected {
                provider: self.provider.clone(),
                reason: "request carries no user or assistant message".to_string(),
            });
        };

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = request.system_text() {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_completion_error(&self.provider, e))?;

        let content = response_text(&response.choice);
        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "response contained no text".to_string(),
            });
        }

        tracing::debug!(
            provider = %self.provider,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );

        Ok(CompletionResponse {
            content,
            input_tokens: saturate(response.usage.input_tokens),
            output_tokens: saturate(response.usage.output_tokens),
        })
    }
}

/// Split chat messages into rig history plus the final prompt message.
///
/// System messages travel separately as the preamble.
fn split_messages(messages: &[ChatMessage]) -> Option<(Vec<Message>, Message)> {
    let mut history: Vec<Message> = messages
        .iter()
        .filter_map(|m| match m.role {
            Role::System => None,
            Role::User => Some(Message::user(m.content.clone())),
            Role::Assistant => Some(Message::assistant(m.content.clone())),
        })
        .collect();
    let prompt = history.pop()?;
    Some((history, prompt))
}

fn response_text(choice: &OneOrMany<AssistantContent>) -> String {
    choice
        .iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

fn saturate(tokens: u64) -> u32 {
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

/// Map a rig error onto [`LlmError`], keeping retryable failures transient.
fn map_completion_error(provider: &str, error: CompletionError) -> LlmError {
    match error {
        CompletionError::HttpError(e) => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: e.to_string(),
        },
        CompletionError::JsonError(e) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: e.to_string(),
        },
        CompletionError::ResponseError(reason) => LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason,
        },
        CompletionError::ProviderError(message) => classify_provider_error(provider, message),
        other => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Providers report failures as text; sort them by what the body says.
fn classify_provider_error(provider: &str, message: String) -> LlmError {
    let lower = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["rate limit", "rate_limit", "too many requests", "429"]) {
        LlmError::RateLimited {
            provider: provider.to_string(),
        }
    } else if has(&["authentication", "unauthorized", "invalid api key", "invalid x-api-key"]) {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else if has(&[
        "overloaded",
        "internal server error",
        "service unavailable",
        "bad gateway",
        "timed out",
        "timeout",
    ]) {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: message,
        }
    } else {
        LlmError::Rejected {
            provider: provider.to_string(),
            reason: message,
        }
    }
}
