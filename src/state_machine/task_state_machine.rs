//! # Task State Machine
//!
//! Generic lifecycle and patch-validation logic shared by every task and
//! workflow document kind. [`TaskStateMachine::patch`] is the single gate
//! through which every mutation passes: external callers, schedulers, and
//! the task's own self-patches all go through the same validation, so the
//! lifecycle invariants hold no matter who originates a change.

use crate::error::{CoreError, Result};
use crate::self_patch::SelfPatchDriver;
use crate::state_machine::document::{
    DocumentId, NewTask, SubStageSpec, TaskDocument, TaskPatch, TaskPayload,
};
use crate::state_machine::states::{TaskFailure, TaskStage};
use crate::store::{DocumentStore, StoredDocument};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Who originated a patch. Schedulers may only kick a task off once;
/// subsequent progress must be self-driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOrigin {
    /// General caller through the service facade
    External,
    /// A task-scheduler trigger channel
    Scheduler,
    /// The task itself, via its self-patch driver
    SelfDriven,
}

/// Domain logic bound to a `(stage, sub_stage)` of one task kind. Handlers
/// run asynchronously, outside the patch call; on completion they advance
/// the document through the supplied driver. A returned error is captured
/// and converted into a patch moving the task to `Failed`; this layer
/// performs no implicit retry.
#[async_trait]
pub trait StageHandler<P: TaskPayload>: Send + Sync + 'static {
    async fn handle(&self, doc: TaskDocument<P>, driver: SelfPatchDriver<P>) -> Result<()>;
}

/// State machine for one task document kind.
pub struct TaskStateMachine<P: TaskPayload> {
    store: Arc<dyn DocumentStore>,
    handler: Option<Arc<dyn StageHandler<P>>>,
    default_task_ttl: Duration,
    /// Back-reference handed to self-patch drivers at dispatch time.
    self_ref: std::sync::Weak<Self>,
}

impl<P: TaskPayload> TaskStateMachine<P> {
    /// Machine without a stage handler; documents of this kind are pure
    /// state containers unless patched by an external driver.
    pub fn new(store: Arc<dyn DocumentStore>, default_task_ttl: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            handler: None,
            default_task_ttl,
            self_ref: weak.clone(),
        })
    }

    pub fn with_handler(
        store: Arc<dyn DocumentStore>,
        default_task_ttl: Duration,
        handler: Arc<dyn StageHandler<P>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            handler: Some(handler),
            default_task_ttl,
            self_ref: weak.clone(),
        })
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn next_document_id() -> DocumentId {
        format!("{}/{}", P::KIND, Uuid::new_v4())
    }

    /// Create a task document: fills `stage = Created` and the default
    /// expiration when absent, validates required fields, persists, and,
    /// when the document was created directly in `Started`, dispatches its
    /// stage handler.
    pub async fn create(&self, new: NewTask<P>) -> Result<TaskDocument<P>> {
        let now = crate::store::now_micros();
        let expiration_time_micros = if new.expiration_time_micros > 0 {
            if new.expiration_time_micros <= now {
                return Err(CoreError::validation(
                    "expiration_time_micros must be greater than creation time",
                ));
            }
            new.expiration_time_micros
        } else {
            now + self.default_task_ttl.as_micros() as i64
        };

        let mut doc = TaskDocument {
            id: Self::next_document_id(),
            version: 0,
            stage: new.stage.unwrap_or_default(),
            sub_stage: new.sub_stage,
            control_flags: new.control_flags,
            is_self_progression_disabled: new.is_self_progression_disabled,
            expiration_time_micros,
            failure: None,
            payload: new.payload,
        };
        doc.payload.validate_create()?;

        let stored = self
            .store
            .create(
                StoredDocument::new(doc.id.clone(), P::KIND, doc.to_body()?)
                    .with_expiration(doc.expiration_time_micros),
            )
            .await?;
        doc.version = stored.version;

        info!(
            task_id = %doc.id,
            kind = P::KIND,
            stage = %doc.stage,
            "task document created"
        );

        // Mirrors start-time progression: a document created directly in
        // Started begins processing unless self-progression is disabled.
        if doc.stage == TaskStage::Started && !doc.is_self_progression_disabled {
            self.dispatch(&doc);
        }

        Ok(doc)
    }

    /// Typed read of a task document.
    pub async fn get(&self, id: &str) -> Result<TaskDocument<P>> {
        let stored = self.store.get(id).await?;
        TaskDocument::from_stored(&stored)
    }

    /// The single mutation gate. Validates the patch against the current
    /// document, merges the mutable fields, persists with a version check,
    /// and dispatches the stage handler when the document lands in
    /// `Started`. A lost per-document race surfaces as `StateConflict` and
    /// leaves the stored document untouched.
    pub async fn patch(
        &self,
        id: &str,
        patch: TaskPatch<P>,
        origin: PatchOrigin,
    ) -> Result<TaskDocument<P>> {
        let current = self.get(id).await?;
        Self::validate_patch(&current, &patch, origin)?;

        let mut updated = current.clone();
        if let Some(stage) = patch.stage {
            if stage != updated.stage {
                info!(task_id = %id, from = %updated.stage, to = %stage, "moving to stage");
            }
            updated.stage = stage;
        }
        if let Some(sub_stage) = patch.sub_stage {
            if Some(sub_stage) != updated.sub_stage {
                debug!(task_id = %id, sub_stage = ?sub_stage, "moving to sub-stage");
            }
            updated.sub_stage = Some(sub_stage);
        }
        if let Some(failure) = &patch.failure {
            warn!(task_id = %id, failure = %failure, "recording task failure");
            updated.failure = Some(failure.clone());
        }
        updated.payload.apply_patch(&patch.payload)?;

        let stored = self
            .store
            .update(id, current.version, updated.to_body()?)
            .await?;
        updated.version = stored.version;

        if updated.stage == TaskStage::Started {
            self.dispatch(&updated);
        }

        Ok(updated)
    }

    /// Patch validation, steps applied in order; any rejection leaves the
    /// document unchanged.
    fn validate_patch(
        current: &TaskDocument<P>,
        patch: &TaskPatch<P>,
        origin: PatchOrigin,
    ) -> Result<()> {
        if current.stage.is_terminal() {
            return Err(CoreError::terminal_stage(current.stage));
        }

        if origin == PatchOrigin::Scheduler && current.stage != TaskStage::Created {
            return Err(CoreError::validation(format!(
                "task is in stage {}, not created; ignoring scheduler patch",
                current.stage
            )));
        }

        if let Some(next) = patch.stage {
            if next.ordinal() < current.stage.ordinal() {
                return Err(CoreError::validation(format!(
                    "cannot revert to {next} from {}",
                    current.stage
                )));
            }
        }

        if let Some(next_sub) = patch.sub_stage {
            // Re-sending the current sub-stage is not a transition.
            if Some(next_sub) != current.sub_stage
                && !P::SubStage::edge_allowed(current.sub_stage, next_sub)
            {
                return Err(CoreError::validation(format!(
                    "illegal sub-stage transition {:?} -> {:?}",
                    current.sub_stage, next_sub
                )));
            }
        }

        Ok(())
    }

    /// Dispatch the bound stage handler for a document that landed in
    /// `Started`. Runs on a worker task; a handler error becomes a
    /// self-patch to `Failed` carrying a structured failure payload.
    fn dispatch(&self, doc: &TaskDocument<P>) {
        if doc.processing_disabled() {
            debug!(task_id = %doc.id, "operation processing disabled, skipping dispatch");
            return;
        }
        let Some(handler) = self.handler.clone() else {
            return;
        };
        let Some(machine) = self.self_ref.upgrade() else {
            // Machine is being torn down; nothing left to drive.
            return;
        };

        let driver = SelfPatchDriver::new(
            machine,
            doc.id.clone(),
            doc.is_self_progression_disabled,
        );
        let doc = doc.clone();
        tokio::spawn(async move {
            let failsafe = driver.clone();
            let task_id = doc.id.clone();
            if let Err(err) = handler.handle(doc, driver).await {
                error!(task_id = %task_id, error = %err, "stage handler failed");
                failsafe.fail(TaskFailure::from(err)).await;
            }
        });
    }
}
