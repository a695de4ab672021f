//! LLM integration for convo-flow.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//! - **Mistral**: Direct API access via rig-core
//!
//! rig-core handles the HTTP transport and [`RigAdapter`] bridges rig's
//! `CompletionModel` trait to our [`LlmProvider`] trait, which the
//! collaborator implementations in `crate::collab::llm` build on.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
    Mistral,
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "mistral" => Ok(Self::Mistral),
            other => Err(ConfigError::InvalidValue {
                key: "FLOW_LLM_BACKEND".to_string(),
                message: format!(
                    "unknown backend '{other}' (expected anthropic, openai or mistral)"
                ),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Read the provider configuration from the environment.
    ///
    /// - `FLOW_LLM_BACKEND`: `anthropic` (default), `openai` or `mistral`
    /// - `ANTHROPIC_API_KEY` / `OPENAI_API_KEY` / `MISTRAL_API_KEY`: key for the chosen backend
    /// - `FLOW_MODEL`: model name (backend-specific default)
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = std::env::var("FLOW_LLM_BACKEND")
            .unwrap_or_else(|_| "anthropic".to_string())
            .parse()?;

        let (key_var, default_model) = match backend {
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-sonnet-4-20250514"),
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o-mini"),
            LlmBackend::Mistral => ("MISTRAL_API_KEY", "mistral-small-latest"),
        };
        let api_key =
            std::env::var(key_var).map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;

        Ok(Self {
            backend,
            api_key: secrecy::SecretString::from(api_key),
            model: std::env::var("FLOW_MODEL").unwrap_or_else(|_| default_model.to_string()),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
        LlmBackend::Mistral => create_mistral_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model).with_provider("anthropic")))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model).with_provider("openai")))
}

fn create_mistral_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::mistral;

    let client: rig::client::Client<mistral::client::MistralExt> =
        mistral::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "mistral".to_string(),
                reason: format!("Failed to create Mistral client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Mistral (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model).with_provider("mistral")))
}
