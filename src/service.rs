//! # Task Service Facade
//!
//! The surface exposed to external callers for one task kind: create and
//! read are open; patching is restricted to trusted internal origins (the
//! scheduler channel and the task's own self-patches). A gateway layer in
//! front of this facade maps transport requests onto these calls; that
//! layer is outside this crate.

use crate::error::{CoreError, Result};
use crate::state_machine::document::{DocumentId, NewTask, TaskDocument, TaskPatch, TaskPayload};
use crate::state_machine::task_state_machine::{PatchOrigin, TaskStateMachine};
use std::sync::Arc;

pub struct TaskService<P: TaskPayload> {
    machine: Arc<TaskStateMachine<P>>,
}

impl<P: TaskPayload> TaskService<P> {
    pub fn new(machine: Arc<TaskStateMachine<P>>) -> Self {
        Self { machine }
    }

    /// Create a task document and return its id.
    pub async fn create_task(&self, initial: NewTask<P>) -> Result<DocumentId> {
        Ok(self.machine.create(initial).await?.id)
    }

    /// Read a task document's current state.
    pub async fn get_task(&self, task_id: &str) -> Result<TaskDocument<P>> {
        self.machine.get(task_id).await
    }

    /// Patch a task document. General callers may only create and read;
    /// an `External` origin is rejected before the gate is even consulted.
    pub async fn patch_task(
        &self,
        task_id: &str,
        patch: TaskPatch<P>,
        origin: PatchOrigin,
    ) -> Result<TaskDocument<P>> {
        if origin == PatchOrigin::External {
            return Err(CoreError::validation(
                "external callers may only create and read tasks",
            ));
        }
        self.machine.patch(task_id, patch, origin).await
    }
}
