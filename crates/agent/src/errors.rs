use thiserror::Error;

use orderly_core::errors::{ApplicationError, DomainError};
use orderly_db::repositories::RepositoryError;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Inputs to a write were unusable; nothing was persisted.
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// The store rejected a write. The message is the store's own.
    #[error("{0}")]
    Persistence(String),
    #[error("decision step failed: {0}")]
    Decision(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("malformed arguments for `{action}`: {message}")]
    MalformedArguments { action: String, message: String },
    #[error("run exceeded {max_iterations} decision iterations")]
    LoopExceeded { max_iterations: u32 },
    #[error("run was cancelled")]
    Cancelled,
    #[error("run exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u128 },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    WriteOnceViolation(DomainError),
    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

impl AgentError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "precondition",
            Self::Persistence(_) => "persistence",
            Self::Decision(_) => "decision",
            Self::UnknownAction(_) => "unknown_action",
            Self::MalformedArguments { .. } => "malformed_arguments",
            Self::LoopExceeded { .. } => "loop_exceeded",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Unauthorized(_) => "unauthorized",
            Self::WriteOnceViolation(_) => "write_once_violation",
            Self::Prompt(_) => "prompt",
        }
    }
}

impl From<RepositoryError> for AgentError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Invariant(message) => Self::Precondition(message),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Failures caused by the instruction or the model's choices are domain errors;
/// the model endpoint, the store and the clock are integration failures.
impl From<AgentError> for ApplicationError {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::Precondition(message) => {
                ApplicationError::Domain(DomainError::InvariantViolation(message))
            }
            AgentError::UnknownAction(_)
            | AgentError::MalformedArguments { .. }
            | AgentError::LoopExceeded { .. } => {
                ApplicationError::Domain(DomainError::InvariantViolation(error.to_string()))
            }
            AgentError::WriteOnceViolation(domain) => ApplicationError::Domain(domain),
            AgentError::Persistence(message) => ApplicationError::Persistence(message),
            AgentError::Unauthorized(message) => ApplicationError::Unauthorized(message),
            AgentError::Prompt(message) => ApplicationError::Configuration(message),
            AgentError::Decision(_) | AgentError::Cancelled | AgentError::DeadlineExceeded { .. } => {
                ApplicationError::Integration(error.to_string())
            }
        }
    }
}
