//! # Self-Patch Driver
//!
//! The mechanism by which a task advances its own stage after an
//! asynchronous operation completes. Patches are built minimally (only the
//! fields that changed) and submitted through the same
//! [`TaskStateMachine::patch`] gate as every other mutation, tagged with a
//! self origin. Submission is a direct in-process call, no network round
//! trip. A handler that observes the document is already terminal (stale
//! dispatch after a race) simply no-ops instead of attempting an invalid
//! patch.

use crate::error::Result;
use crate::state_machine::document::{DocumentId, TaskDocument, TaskPatch, TaskPayload};
use crate::state_machine::states::{TaskFailure, TaskStage};
use crate::state_machine::task_state_machine::{PatchOrigin, TaskStateMachine};
use std::sync::Arc;
use tracing::{debug, error};

/// Cloneable handle bound to one task document, handed to its stage handler.
pub struct SelfPatchDriver<P: TaskPayload> {
    machine: Arc<TaskStateMachine<P>>,
    task_id: DocumentId,
    self_progression_disabled: bool,
}

impl<P: TaskPayload> Clone for SelfPatchDriver<P> {
    fn clone(&self) -> Self {
        Self {
            machine: Arc::clone(&self.machine),
            task_id: self.task_id.clone(),
            self_progression_disabled: self.self_progression_disabled,
        }
    }
}

impl<P: TaskPayload> SelfPatchDriver<P> {
    pub(crate) fn new(
        machine: Arc<TaskStateMachine<P>>,
        task_id: DocumentId,
        self_progression_disabled: bool,
    ) -> Self {
        Self {
            machine,
            task_id,
            self_progression_disabled,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Submit a self-originated patch through the validation gate. Returns
    /// `Ok(None)` when the document turned terminal in the meantime; the
    /// stale completion is harmless and discarded.
    pub async fn submit(&self, patch: TaskPatch<P>) -> Result<Option<TaskDocument<P>>> {
        match self
            .machine
            .patch(&self.task_id, patch, PatchOrigin::SelfDriven)
            .await
        {
            Ok(doc) => Ok(Some(doc)),
            Err(err) if err.is_terminal_rejection() => {
                debug!(task_id = %self.task_id, "document already terminal, dropping stale self-patch");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Advance to the next sub-stage within `Started`. Suppressed when the
    /// document was created with self-progression disabled.
    pub async fn advance(&self, sub_stage: P::SubStage) -> Result<Option<TaskDocument<P>>> {
        self.progress(TaskPatch::sub_stage(sub_stage)).await
    }

    /// Advance to a sub-stage while also merging payload fields, in one
    /// validated patch.
    pub async fn advance_with(
        &self,
        sub_stage: P::SubStage,
        payload: P::Patch,
    ) -> Result<Option<TaskDocument<P>>> {
        self.progress(TaskPatch::sub_stage(sub_stage).with_payload(payload))
            .await
    }

    /// Record payload progress without changing stage or sub-stage.
    pub async fn record(&self, payload: P::Patch) -> Result<Option<TaskDocument<P>>> {
        self.progress(TaskPatch::payload(payload)).await
    }

    /// Move the document to `Finished`.
    pub async fn finish(&self) -> Result<Option<TaskDocument<P>>> {
        self.progress(TaskPatch::stage(TaskStage::Finished)).await
    }

    /// Move the document to `Finished` while merging final payload fields
    /// (result ids, counters) in the same validated patch.
    pub async fn finish_with(&self, payload: P::Patch) -> Result<Option<TaskDocument<P>>> {
        self.progress(TaskPatch::stage(TaskStage::Finished).with_payload(payload))
            .await
    }

    /// Move the document to `Failed` with a structured failure payload.
    /// Infallible: an error while recording the failure is logged, not
    /// propagated, so this can be called from failsafe paths. Not
    /// suppressed by the self-progression flag.
    pub async fn fail(&self, failure: TaskFailure) {
        if let Err(err) = self.submit(TaskPatch::failed(failure)).await {
            error!(
                task_id = %self.task_id,
                error = %err,
                "failed to record task failure"
            );
        }
    }

    async fn progress(&self, patch: TaskPatch<P>) -> Result<Option<TaskDocument<P>>> {
        if self.self_progression_disabled {
            debug!(task_id = %self.task_id, "self-progression disabled, skipping stage progress patch");
            return Ok(None);
        }
        self.submit(patch).await
    }
}
