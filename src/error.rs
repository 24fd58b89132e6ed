//! # Core Error Types
//!
//! Structured error handling for the task document engine using thiserror.
//! Every rejected mutation surfaces as one of these variants; execution
//! failures inside stage handlers are captured as [`TaskFailure`] data on the
//! owning document instead of propagating to unrelated callers.

use crate::state_machine::states::{FailureKind, TaskFailure, TaskStage};
use thiserror::Error;

/// Error taxonomy for document mutation, locking, and orchestration.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed or illegal patch, or a missing required field. The document
    /// is left unchanged.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Patch against a document that already reached a terminal stage.
    /// Distinguished from `Validation` so stale handler completions can
    /// detect it structurally and no-op.
    #[error("cannot patch a task in terminal stage {stage}")]
    TerminalStage { stage: TaskStage },

    /// A concurrent patch won the per-document race; the caller must refetch
    /// and retry.
    #[error("state conflict on document {id}: {message}")]
    StateConflict { id: String, message: String },

    /// The entity lock is already held by another task.
    #[error("entity {entity_id} is locked by task {holder_task_id}")]
    EntityBusy {
        entity_id: String,
        holder_task_id: String,
    },

    /// A domain action raised an error; recorded on the owning document.
    #[error("execution failure: {failure}")]
    ExecutionFailure { failure: TaskFailure },

    /// A bounded polling loop exhausted its attempt budget.
    #[error("timeout: {operation} exceeded {attempts} polling attempts")]
    Timeout { operation: String, attempts: u32 },

    /// Document missing from the store (or already expired).
    #[error("document not found: {id}")]
    NotFound { id: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn terminal_stage(stage: TaskStage) -> Self {
        Self::TerminalStage { stage }
    }

    pub fn state_conflict(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StateConflict {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn entity_busy(entity_id: impl Into<String>, holder_task_id: impl Into<String>) -> Self {
        Self::EntityBusy {
            entity_id: entity_id.into(),
            holder_task_id: holder_task_id.into(),
        }
    }

    pub fn execution_failure(failure: TaskFailure) -> Self {
        Self::ExecutionFailure { failure }
    }

    pub fn timeout(operation: impl Into<String>, attempts: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            attempts,
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the error is the terminal-stage rejection a stale handler
    /// completion runs into after losing a race; such completions no-op.
    pub fn is_terminal_rejection(&self) -> bool {
        matches!(self, Self::TerminalStage { .. })
    }
}

/// Conversion used when a stage handler's error is captured and written to
/// the owning document's `failure` field.
impl From<CoreError> for TaskFailure {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::ExecutionFailure { failure } => failure,
            CoreError::Timeout { .. } => Self::with_kind(message, FailureKind::Timeout),
            CoreError::EntityBusy { .. } => Self::with_kind(message, FailureKind::EntityBusy),
            _ => Self::internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
