//! # Entity Locks
//!
//! Mutual-exclusion records tying a shared entity to the task currently
//! allowed to mutate it. A lock is a create/delete-only document; no patch
//! operation exists for it. Acquisition is non-blocking and fail-fast: the
//! store's create-is-unique-per-id semantics make exactly one concurrent
//! create succeed; everyone else observes [`CoreError::EntityBusy`] and
//! decides for themselves whether to retry, back off, or fail their task.

pub mod cleaner;

use crate::error::{CoreError, Result};
use crate::store::{now_micros, DocumentStore, StoredDocument};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

pub use cleaner::{sweep_orphaned_locks, EntityLockCleaner, LockCleanerTask, SweepStats};

/// Store kind (and id prefix) for entity lock documents.
pub const ENTITY_LOCK_KIND: &str = "entity-locks";

/// A live lock binding `entity_id` to its owning task. At most one exists
/// per entity id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityLockDocument {
    pub entity_id: String,
    pub task_id: String,
    pub created_time_micros: i64,
}

/// Derives the lock document id from the entity id; uniqueness of the id is
/// what makes acquisition atomic.
pub fn lock_document_id(entity_id: &str) -> String {
    format!("{ENTITY_LOCK_KIND}/{entity_id}")
}

/// Atomic acquire/release of entity locks.
#[derive(Clone)]
pub struct EntityLockManager {
    store: Arc<dyn DocumentStore>,
}

impl EntityLockManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Attempt to acquire the lock on `entity_id` for `task_id`. Exactly one
    /// concurrent caller succeeds; the rest receive `EntityBusy` naming the
    /// current holder. No queueing, no blocking.
    pub async fn acquire(&self, entity_id: &str, task_id: &str) -> Result<EntityLockDocument> {
        let lock = EntityLockDocument {
            entity_id: entity_id.to_string(),
            task_id: task_id.to_string(),
            created_time_micros: now_micros(),
        };
        let doc = StoredDocument::new(
            lock_document_id(entity_id),
            ENTITY_LOCK_KIND,
            serde_json::to_value(&lock)?,
        );

        match self.store.create(doc).await {
            Ok(_) => {
                info!(entity_id, task_id, "entity lock acquired");
                Ok(lock)
            }
            Err(CoreError::StateConflict { .. }) => {
                let holder = self
                    .holder(entity_id)
                    .await
                    .unwrap_or_else(|| "unknown".to_string());
                debug!(entity_id, task_id, holder = %holder, "entity lock busy");
                Err(CoreError::entity_busy(entity_id, holder))
            }
            Err(err) => Err(err),
        }
    }

    /// Release the lock on `entity_id`. Idempotent: a crash between "action
    /// completed" and "release sent" can cause a duplicate or late release,
    /// so deleting an already-absent lock is not an error.
    pub async fn release(&self, entity_id: &str) -> Result<()> {
        match self.store.delete(&lock_document_id(entity_id)).await {
            Ok(()) => {
                info!(entity_id, "entity lock released");
                Ok(())
            }
            Err(CoreError::NotFound { .. }) => {
                debug!(entity_id, "entity lock already released");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Current lock on `entity_id`, if any.
    pub async fn get(&self, entity_id: &str) -> Result<Option<EntityLockDocument>> {
        match self.store.get(&lock_document_id(entity_id)).await {
            Ok(stored) => Ok(Some(serde_json::from_value(stored.body)?)),
            Err(CoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn holder(&self, entity_id: &str) -> Option<String> {
        self.get(entity_id).await.ok().flatten().map(|l| l.task_id)
    }
}
