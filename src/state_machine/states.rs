use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle stage of a task document.
///
/// Stages are ordered: `Created < Started < {Finished, Failed, Cancelled}`.
/// The three terminal stages are mutually exclusive absorbing states; no
/// patch is accepted once a document is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    /// Initial stage when the document is created
    Created,
    /// Task is currently being executed
    Started,
    /// Task completed successfully
    Finished,
    /// Task failed with an error
    Failed,
    /// Task was cancelled
    Cancelled,
}

impl TaskStage {
    /// Position in the stage partial order; terminal stages share the top
    /// ordinal so no terminal can "regress" to another.
    pub fn ordinal(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Started => 1,
            Self::Finished | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Check if this is a terminal stage (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// Check if this is an active stage (task is being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started)
    }
}

impl Default for TaskStage {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "started" => Ok(Self::Started),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task stage: {s}")),
        }
    }
}

/// Classification of a recorded task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A domain action raised an error
    Execution,
    /// A polling bound was exceeded
    Timeout,
    /// A child task was cancelled under the parent
    Cancelled,
    /// A required entity lock was held by another task
    EntityBusy,
    /// Engine-internal error (serialization, store)
    Internal,
}

impl Default for FailureKind {
    fn default() -> Self {
        Self::Execution
    }
}

/// Structured failure payload written to a document when it moves to
/// [`TaskStage::Failed`]. Carried verbatim from child to parent when a
/// workflow aggregates child outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub message: String,
    #[serde(default)]
    pub kind: FailureKind,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: FailureKind::Execution,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::with_kind(message, FailureKind::Timeout)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(message, FailureKind::Internal)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Bitmask configuring non-functional document behavior without changing the
/// document schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlFlags(pub u32);

impl ControlFlags {
    pub const NONE: Self = Self(0);

    /// Suppress all stage-handler dispatch for this document; it exists
    /// purely as a state container (nested workflows, inspection in tests).
    pub const OPERATION_PROCESSING_DISABLED: Self = Self(1);

    pub fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn with(self, flags: Self) -> Self {
        Self(self.0 | flags.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_terminal_check() {
        assert!(TaskStage::Finished.is_terminal());
        assert!(TaskStage::Failed.is_terminal());
        assert!(TaskStage::Cancelled.is_terminal());
        assert!(!TaskStage::Created.is_terminal());
        assert!(!TaskStage::Started.is_terminal());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(TaskStage::Created.ordinal() < TaskStage::Started.ordinal());
        assert!(TaskStage::Started.ordinal() < TaskStage::Finished.ordinal());
        // Terminal stages are mutually exclusive, not ordered among themselves.
        assert_eq!(TaskStage::Failed.ordinal(), TaskStage::Cancelled.ordinal());
    }

    #[test]
    fn test_stage_string_conversion() {
        assert_eq!(TaskStage::Started.to_string(), "started");
        assert_eq!("finished".parse::<TaskStage>().unwrap(), TaskStage::Finished);
        assert!("bogus".parse::<TaskStage>().is_err());
    }

    #[test]
    fn test_stage_serde() {
        let json = serde_json::to_string(&TaskStage::Started).unwrap();
        assert_eq!(json, "\"started\"");
        let parsed: TaskStage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStage::Started);
    }

    #[test]
    fn test_control_flags() {
        let flags = ControlFlags::NONE.with(ControlFlags::OPERATION_PROCESSING_DISABLED);
        assert!(flags.contains(ControlFlags::OPERATION_PROCESSING_DISABLED));
        assert!(!ControlFlags::NONE.contains(ControlFlags::OPERATION_PROCESSING_DISABLED));
    }
}
