//! Error types for convo-flow.

use uuid::Uuid;

use crate::session::SessionStatus;

/// Top-level error type for the flow engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid flow: {0}")]
    InvalidFlow(#[from] InvalidFlowError),

    #[error("Flow load error: {0}")]
    Load(#[from] LoadError),

    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    #[error("{0}")]
    Turn(#[from] TurnError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl Error {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Turn(e) => e.is_transient(),
            Self::Llm(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<InactiveSessionError> for Error {
    fn from(e: InactiveSessionError) -> Self {
        Self::Turn(TurnError::Inactive(e))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Violations of the flow graph invariants, detected when a definition is built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFlowError {
    #[error("flow id must not be empty")]
    EmptyFlowId,

    #[error("flow id {flow_id} must not contain path separators or '..'")]
    UnsafeFlowId { flow_id: String },

    #[error("flow {flow_id} has no stages")]
    NoStages { flow_id: String },

    #[error("flow {flow_id} is already registered")]
    DuplicateFlow { flow_id: String },

    #[error("flow {flow_id}: initial stage {stage_id} does not exist")]
    MissingInitialStage { flow_id: String, stage_id: String },

    #[error("flow {flow_id}: stage {stage_id} lists unknown next stage {target}")]
    DanglingNextStage {
        flow_id: String,
        stage_id: String,
        target: String,
    },

    #[error("flow {flow_id}: stage {stage_id} lists next stage {target} more than once")]
    DuplicateNextStage {
        flow_id: String,
        stage_id: String,
        target: String,
    },

    #[error("flow {flow_id}: stage {stage_id} must allow at least one turn")]
    NonPositiveMaxTurns { flow_id: String, stage_id: String },

    #[error("flow {flow_id}: stage key {key} collides with stage id {stage_id}")]
    StageIdCollision {
        flow_id: String,
        key: String,
        stage_id: String,
    },

    #[error("flow {flow_id}: a stage has an empty id")]
    EmptyStageId { flow_id: String },

    #[error("flow {flow_id}: stage {stage_id} has an empty system instruction")]
    EmptySystemInstruction { flow_id: String, stage_id: String },
}

/// Unknown flow or session identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("Flow {0} not found")]
    Flow(String),

    #[error("Session {0} not found")]
    Session(Uuid),
}

/// A turn (or termination) was requested on a session that is no longer active.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Session {session_id} is {status}; no further turns are accepted")]
pub struct InactiveSessionError {
    pub session_id: Uuid,
    pub status: SessionStatus,
}

/// Failures of the utterance generator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// Network, timeout or rate limiting; a fresh attempt may succeed.
    #[error("transient generation failure: {0}")]
    Transient(String),

    /// Malformed response or rejected request; retrying will not help.
    #[error("permanent generation failure: {0}")]
    Permanent(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Failures of the completion evaluator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("transient evaluation failure: {0}")]
    Transient(String),

    #[error("permanent evaluation failure: {0}")]
    Permanent(String),
}

impl EvaluationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Everything a single `advance` call can fail with.
///
/// Whatever the variant, the session is left exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Inactive(#[from] InactiveSessionError),

    #[error("Generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Session {session_id} belongs to flow {expected}, not {actual}")]
    FlowMismatch {
        session_id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Stage {stage_id} does not exist in flow {flow_id}")]
    UnknownStage { flow_id: String, stage_id: String },
}

impl TurnError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Generation(e) => e.is_transient(),
            Self::Evaluation(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Errors raised while reading or writing flow files.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed flow file {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Flow file {path} is invalid: {source}")]
    Invalid {
        path: String,
        #[source]
        source: InvalidFlowError,
    },

    #[error("Flow file {path} declares flow {declared}, expected {expected}")]
    IdMismatch {
        path: String,
        declared: String,
        expected: String,
    },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Provider {provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

impl LlmError {
    /// Transport failures, overloads and rate limits are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed { .. } | Self::RateLimited { .. } => true,
            Self::Rejected { .. } | Self::InvalidResponse { .. } | Self::AuthFailed { .. } => false,
        }
    }
}

impl From<LlmError> for GenerationError {
    fn from(e: LlmError) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

impl From<LlmError> for EvaluationError {
    fn from(e: LlmError) -> Self {
        if e.is_transient() {
            Self::Transient(e.to_string())
        } else {
            Self::Permanent(e.to_string())
        }
    }
}

/// Result type alias for the flow engine.
pub type Result<T> = std::result::Result<T, Error>;
