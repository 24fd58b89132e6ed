// Task document state machine: lifecycle stages, the typed document
// envelope, and the single validated mutation gate shared by every task and
// workflow kind.

pub mod document;
pub mod states;
pub mod task_state_machine;

// Re-export main types for convenient access
pub use document::{
    DocumentId, NewTask, NoSubStage, SubStageSpec, TaskDocument, TaskEnvelope, TaskPatch,
    TaskPayload,
};
pub use states::{ControlFlags, FailureKind, TaskFailure, TaskStage};
pub use task_state_machine::{PatchOrigin, StageHandler, TaskStateMachine};
