//! # Entity Lock Cleaner
//!
//! Reconciliation sweep that deletes locks orphaned by tasks that reached a
//! terminal stage without releasing them. A task's terminal patch and its
//! lock release are not one transaction, so a crash in between leaves the
//! lock behind; the sweep restores consistency eventually and idempotently
//! rather than enforcing it synchronously. Each run processes a bounded page
//! of locks and reports how many orphans it observed and removed.
//!
//! The cleaner is itself modeled as a self-progressing task document, so its
//! runs are persisted, queryable, and subject to the same lifecycle rules as
//! every other task.

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::locks::{EntityLockDocument, ENTITY_LOCK_KIND};
use crate::self_patch::SelfPatchDriver;
use crate::state_machine::document::{
    NewTask, NoSubStage, TaskDocument, TaskEnvelope, TaskPayload,
};
use crate::state_machine::task_state_machine::{StageHandler, TaskStateMachine};
use crate::store::DocumentStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Task payload for one cleaner run: the two sweep counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCleanerTask {
    /// Orphaned locks observed this run (capped by the page limit).
    #[serde(default)]
    pub unreleased_entity_locks: u64,
    /// Orphaned locks actually removed this run.
    #[serde(default)]
    pub deleted_entity_locks: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LockCleanerPatch {
    pub unreleased_entity_locks: Option<u64>,
    pub deleted_entity_locks: Option<u64>,
}

impl TaskPayload for LockCleanerTask {
    const KIND: &'static str = "entity-lock-cleaners";
    type SubStage = NoSubStage;
    type Patch = LockCleanerPatch;

    fn validate_create(&self) -> Result<()> {
        Ok(())
    }

    fn apply_patch(&mut self, patch: &Self::Patch) -> Result<()> {
        if let Some(unreleased) = patch.unreleased_entity_locks {
            self.unreleased_entity_locks = unreleased;
        }
        if let Some(deleted) = patch.deleted_entity_locks {
            self.deleted_entity_locks = deleted;
        }
        Ok(())
    }
}

/// Counts reported by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub unreleased_entity_locks: u64,
    pub deleted_entity_locks: u64,
}

/// One bounded reconciliation pass: query up to `page_limit` locks, look up
/// each owning task, delete the locks whose owner is missing or terminal.
pub async fn sweep_orphaned_locks(
    store: &Arc<dyn DocumentStore>,
    page_limit: usize,
) -> Result<SweepStats> {
    let locks = store.query(ENTITY_LOCK_KIND, &[], page_limit).await?;
    let mut stats = SweepStats::default();

    for stored in locks {
        let lock: EntityLockDocument = serde_json::from_value(stored.body)?;
        let orphaned = match store.get(&lock.task_id).await {
            Ok(owner) => TaskEnvelope::from_stored(&owner)?.stage.is_terminal(),
            Err(CoreError::NotFound { .. }) => true,
            Err(err) => return Err(err),
        };
        if !orphaned {
            continue;
        }

        stats.unreleased_entity_locks += 1;
        match store.delete(&stored.id).await {
            Ok(()) => stats.deleted_entity_locks += 1,
            // A late release beat us to it; the goal state holds either way.
            Err(CoreError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
    }

    info!(
        unreleased_entity_locks = stats.unreleased_entity_locks,
        deleted_entity_locks = stats.deleted_entity_locks,
        "entity lock sweep complete"
    );
    Ok(stats)
}

/// Stage handler backing a cleaner task: run the sweep, then record the
/// counters and finish in a single self-patch.
pub struct LockCleanerHandler {
    store: Arc<dyn DocumentStore>,
    page_limit: usize,
}

#[async_trait]
impl StageHandler<LockCleanerTask> for LockCleanerHandler {
    async fn handle(
        &self,
        _doc: TaskDocument<LockCleanerTask>,
        driver: SelfPatchDriver<LockCleanerTask>,
    ) -> Result<()> {
        let stats = sweep_orphaned_locks(&self.store, self.page_limit).await?;
        driver
            .finish_with(LockCleanerPatch {
                unreleased_entity_locks: Some(stats.unreleased_entity_locks),
                deleted_entity_locks: Some(stats.deleted_entity_locks),
            })
            .await?;
        Ok(())
    }
}

/// Periodic (or on-demand) lock reconciliation.
pub struct EntityLockCleaner {
    machine: Arc<TaskStateMachine<LockCleanerTask>>,
    interval: Duration,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl EntityLockCleaner {
    pub fn new(store: Arc<dyn DocumentStore>, config: &CoreConfig) -> Self {
        let handler: Arc<dyn StageHandler<LockCleanerTask>> = Arc::new(LockCleanerHandler {
            store: Arc::clone(&store),
            page_limit: config.lock_page_limit,
        });
        let machine = TaskStateMachine::with_handler(store, config.default_task_ttl, handler);
        Self {
            machine,
            interval: config.lock_cleaner_interval,
            poll_interval: config.child_poll_interval,
            max_poll_attempts: config.max_poll_attempts,
        }
    }

    /// State machine for cleaner task documents, e.g. for inspecting past
    /// runs.
    pub fn machine(&self) -> &Arc<TaskStateMachine<LockCleanerTask>> {
        &self.machine
    }

    /// Single-shot sweep: creates one cleaner task, waits for it to reach a
    /// terminal stage, and returns the finished document with its counters.
    pub async fn run_once(&self) -> Result<TaskDocument<LockCleanerTask>> {
        let doc = self
            .machine
            .create(NewTask::started(LockCleanerTask::default()))
            .await?;

        for _ in 0..self.max_poll_attempts {
            let current = self.machine.get(&doc.id).await?;
            if current.stage.is_terminal() {
                return Ok(current);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(CoreError::timeout(
            "entity lock cleaner run",
            self.max_poll_attempts,
        ))
    }

    /// Self-rescheduling mode: start a new sweep task every interval until
    /// the returned handle is aborted.
    pub fn spawn_periodic(&self) -> tokio::task::JoinHandle<()> {
        let machine = Arc::clone(&self.machine);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = machine
                    .create(NewTask::started(LockCleanerTask::default()))
                    .await
                {
                    error!(error = %err, "failed to schedule entity lock sweep");
                }
            }
        })
    }
}
