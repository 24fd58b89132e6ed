//! # Image Copy Task
//!
//! Copies an image from a source image store to a destination image store.
//! The image and source store are fixed at creation; the destination may be
//! repointed by patch while the task is still live. The handler holds the
//! entity lock on the image for the duration of the copy so replication and
//! deletion cannot race.

use crate::actions::{ActionRequest, DomainAction};
use crate::error::{CoreError, Result};
use crate::locks::EntityLockManager;
use crate::self_patch::SelfPatchDriver;
use crate::state_machine::document::{require_field, NoSubStage, TaskDocument, TaskPayload};
use crate::state_machine::task_state_machine::StageHandler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageCopyTask {
    /// Image to be copied. Immutable.
    pub image: String,
    /// The store where the image is currently available. Immutable.
    pub source_data_store: String,
    /// The store where the image will be copied to.
    pub destination_data_store: String,
}

/// Mutable-field subset of [`ImageCopyTask`]; `image` and
/// `source_data_store` deliberately have no patch fields.
#[derive(Debug, Clone, Default)]
pub struct ImageCopyPatch {
    pub destination_data_store: Option<String>,
}

impl TaskPayload for ImageCopyTask {
    const KIND: &'static str = "image-copy-tasks";
    type SubStage = NoSubStage;
    type Patch = ImageCopyPatch;

    fn validate_create(&self) -> Result<()> {
        require_field(&self.image, "image")?;
        require_field(&self.source_data_store, "source_data_store")?;
        require_field(&self.destination_data_store, "destination_data_store")?;
        Ok(())
    }

    fn apply_patch(&mut self, patch: &Self::Patch) -> Result<()> {
        if let Some(destination) = &patch.destination_data_store {
            self.destination_data_store = destination.clone();
        }
        Ok(())
    }
}

/// Stage handler: lock the image, run the copy action, release, finish.
pub struct ImageCopyHandler {
    actions: Arc<dyn DomainAction>,
    locks: EntityLockManager,
}

impl ImageCopyHandler {
    pub fn new(actions: Arc<dyn DomainAction>, locks: EntityLockManager) -> Self {
        Self { actions, locks }
    }
}

#[async_trait]
impl StageHandler<ImageCopyTask> for ImageCopyHandler {
    async fn handle(
        &self,
        doc: TaskDocument<ImageCopyTask>,
        driver: SelfPatchDriver<ImageCopyTask>,
    ) -> Result<()> {
        // Fail fast when another task holds the image; whoever created this
        // task decides whether to retry.
        self.locks.acquire(&doc.payload.image, &doc.id).await?;

        let result = self
            .actions
            .submit(ActionRequest::CopyImage {
                image: doc.payload.image.clone(),
                source_data_store: doc.payload.source_data_store.clone(),
                destination_data_store: doc.payload.destination_data_store.clone(),
            })
            .await;

        // Release before reporting the outcome either way; a duplicate or
        // late release is harmless and the cleaner covers the crash window.
        // A release error must not displace the copy outcome, so it is
        // logged and the lock is left to the sweep.
        if let Err(err) = self.locks.release(&doc.payload.image).await {
            warn!(
                task_id = %doc.id,
                image = %doc.payload.image,
                error = %err,
                "entity lock release failed"
            );
        }

        match result {
            Ok(_) => {
                info!(
                    task_id = %doc.id,
                    image = %doc.payload.image,
                    destination = %doc.payload.destination_data_store,
                    "image copy complete"
                );
                driver.finish().await?;
                Ok(())
            }
            Err(failure) => Err(CoreError::execution_failure(failure)),
        }
    }
}
