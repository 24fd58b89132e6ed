//! # Workflow Orchestration
//!
//! Composes ordered/fan-out pipelines of child task documents: entering a
//! phase fans out K children, then polls them at a configured interval until
//! every child is terminal or the attempt bound is exhausted. Aggregation is
//! strict: the first `Failed` or `Cancelled` child fails the parent with
//! that child's failure carried verbatim, and exceeding the poll bound is a
//! `Timeout` treated identically to a child failure.

pub mod provision;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::state_machine::document::{DocumentId, NewTask, TaskEnvelope, TaskPayload};
use crate::state_machine::states::{FailureKind, TaskFailure, TaskStage};
use crate::state_machine::task_state_machine::TaskStateMachine;
use crate::store::DocumentStore;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub use provision::{ProvisionPatch, ProvisionPhase, ProvisionWorkflow, ProvisionWorkflowHandler};

/// Polls fanned-out children to completion and aggregates their outcomes.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    store: Arc<dyn DocumentStore>,
    child_poll_interval: Duration,
    max_poll_attempts: u32,
}

impl WorkflowOrchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, config: &CoreConfig) -> Self {
        Self {
            store,
            child_poll_interval: config.child_poll_interval,
            max_poll_attempts: config.max_poll_attempts,
        }
    }

    /// Create K child documents directly in `Started`, dispatching each
    /// independently, and return their ids in order.
    pub async fn fan_out<P: TaskPayload>(
        machine: &Arc<TaskStateMachine<P>>,
        payloads: Vec<P>,
    ) -> Result<Vec<DocumentId>> {
        let creations = payloads
            .into_iter()
            .map(|payload| machine.create(NewTask::started(payload)));
        let docs = try_join_all(creations).await?;
        Ok(docs.into_iter().map(|doc| doc.id).collect())
    }

    /// Poll `child_ids` until every child is terminal.
    ///
    /// Returns `Ok(())` only when every child reached `Finished`. The first
    /// `Failed` or `Cancelled` child short-circuits with its failure; an
    /// exhausted attempt budget yields `Timeout`. Never blocks indefinitely.
    #[instrument(skip(self), fields(children = child_ids.len()))]
    pub async fn await_children(&self, child_ids: &[DocumentId]) -> Result<()> {
        for attempt in 0..self.max_poll_attempts {
            let mut all_finished = true;

            for id in child_ids {
                let envelope = match self.store.get(id).await {
                    Ok(stored) => TaskEnvelope::from_stored(&stored)?,
                    Err(CoreError::NotFound { .. }) => {
                        return Err(CoreError::execution_failure(TaskFailure::internal(
                            format!("child task {id} disappeared from the store"),
                        )))
                    }
                    Err(err) => return Err(err),
                };

                match envelope.stage {
                    TaskStage::Finished => {}
                    TaskStage::Failed => {
                        let failure = envelope.failure.unwrap_or_else(|| {
                            TaskFailure::new(format!("child task {id} failed"))
                        });
                        return Err(CoreError::execution_failure(failure));
                    }
                    TaskStage::Cancelled => {
                        let failure = envelope.failure.unwrap_or_else(|| {
                            TaskFailure::with_kind(
                                format!("child task {id} was cancelled"),
                                FailureKind::Cancelled,
                            )
                        });
                        return Err(CoreError::execution_failure(failure));
                    }
                    TaskStage::Created | TaskStage::Started => {
                        all_finished = false;
                    }
                }
            }

            if all_finished {
                debug!(attempt, "all child tasks finished");
                return Ok(());
            }
            tokio::time::sleep(self.child_poll_interval).await;
        }

        Err(CoreError::timeout(
            "child task polling",
            self.max_poll_attempts,
        ))
    }
}
