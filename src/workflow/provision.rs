//! # Provisioning Workflow
//!
//! Two-phase pipeline: replicate the image to the target store
//! (`UploadImage`), then fan out K VM-create children (`CreateVms`). The
//! parent document only ever advances through its own self-patch driver;
//! each handler invocation performs one step and returns, so re-dispatch
//! after a crash or a progress patch resumes where the document says it is
//! rather than where an in-memory continuation happened to be.

use crate::error::Result;
use crate::self_patch::SelfPatchDriver;
use crate::state_machine::document::{
    require_field, NewTask, SubStageSpec, TaskDocument, TaskPayload,
};
use crate::state_machine::task_state_machine::{StageHandler, TaskStateMachine};
use crate::tasks::{ImageCopyTask, VmCreateTask};
use crate::workflow::WorkflowOrchestrator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Ordered phases of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionPhase {
    UploadImage,
    CreateVms,
}

impl SubStageSpec for ProvisionPhase {
    fn edge_allowed(from: Option<Self>, to: Self) -> bool {
        matches!(
            (from, to),
            (None, Self::UploadImage) | (Some(Self::UploadImage), Self::CreateVms)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionWorkflow {
    /// Image to replicate and boot from. Immutable.
    pub image: String,
    /// Store where the image currently lives. Immutable.
    pub source_image_store: String,
    /// Store the image is replicated to before VM creation. Immutable.
    pub destination_image_store: String,
    /// Flavor for every VM in the batch. Immutable.
    pub vm_flavor: String,
    /// Number of VMs to create. Immutable.
    pub vm_count: u32,
    /// Children fanned out for the phase currently in flight.
    #[serde(default)]
    pub child_task_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionPatch {
    pub child_task_ids: Option<Vec<String>>,
}

impl TaskPayload for ProvisionWorkflow {
    const KIND: &'static str = "provision-workflows";
    type SubStage = ProvisionPhase;
    type Patch = ProvisionPatch;

    fn validate_create(&self) -> Result<()> {
        require_field(&self.image, "image")?;
        require_field(&self.source_image_store, "source_image_store")?;
        require_field(&self.destination_image_store, "destination_image_store")?;
        require_field(&self.vm_flavor, "vm_flavor")?;
        if self.vm_count == 0 {
            return Err(crate::error::CoreError::validation(
                "vm_count must be at least 1",
            ));
        }
        Ok(())
    }

    fn apply_patch(&mut self, patch: &Self::Patch) -> Result<()> {
        if let Some(child_task_ids) = &patch.child_task_ids {
            self.child_task_ids = child_task_ids.clone();
        }
        Ok(())
    }
}

/// Stage handler driving the parent workflow document. Each phase is
/// re-entrant: fanning out records the child ids before waiting on them, so
/// a repeated dispatch polls the existing children instead of creating a
/// duplicate batch.
pub struct ProvisionWorkflowHandler {
    image_copy: Arc<TaskStateMachine<ImageCopyTask>>,
    vm_create: Arc<TaskStateMachine<VmCreateTask>>,
    orchestrator: WorkflowOrchestrator,
}

impl ProvisionWorkflowHandler {
    pub fn new(
        image_copy: Arc<TaskStateMachine<ImageCopyTask>>,
        vm_create: Arc<TaskStateMachine<VmCreateTask>>,
        orchestrator: WorkflowOrchestrator,
    ) -> Self {
        Self {
            image_copy,
            vm_create,
            orchestrator,
        }
    }

    async fn handle_upload_image(
        &self,
        doc: &TaskDocument<ProvisionWorkflow>,
        driver: &SelfPatchDriver<ProvisionWorkflow>,
    ) -> Result<()> {
        if doc.payload.child_task_ids.is_empty() {
            let child = self
                .image_copy
                .create(NewTask::started(ImageCopyTask {
                    image: doc.payload.image.clone(),
                    source_data_store: doc.payload.source_image_store.clone(),
                    destination_data_store: doc.payload.destination_image_store.clone(),
                }))
                .await?;
            debug!(workflow_id = %doc.id, child_id = %child.id, "image copy child created");
            driver
                .record(ProvisionPatch {
                    child_task_ids: Some(vec![child.id]),
                })
                .await?;
            return Ok(());
        }

        self.orchestrator
            .await_children(&doc.payload.child_task_ids)
            .await?;
        info!(workflow_id = %doc.id, "image upload phase complete");
        driver
            .advance_with(
                ProvisionPhase::CreateVms,
                ProvisionPatch {
                    child_task_ids: Some(Vec::new()),
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_create_vms(
        &self,
        doc: &TaskDocument<ProvisionWorkflow>,
        driver: &SelfPatchDriver<ProvisionWorkflow>,
    ) -> Result<()> {
        if doc.payload.child_task_ids.is_empty() {
            let payloads = (0..doc.payload.vm_count)
                .map(|_| {
                    VmCreateTask::new(doc.payload.vm_flavor.clone(), doc.payload.image.clone())
                })
                .collect();
            let child_ids = WorkflowOrchestrator::fan_out(&self.vm_create, payloads).await?;
            debug!(
                workflow_id = %doc.id,
                vm_count = doc.payload.vm_count,
                "vm create children fanned out"
            );
            driver
                .record(ProvisionPatch {
                    child_task_ids: Some(child_ids),
                })
                .await?;
            return Ok(());
        }

        self.orchestrator
            .await_children(&doc.payload.child_task_ids)
            .await?;
        info!(workflow_id = %doc.id, "create vms phase complete, workflow finished");
        driver.finish().await?;
        Ok(())
    }
}

#[async_trait]
impl StageHandler<ProvisionWorkflow> for ProvisionWorkflowHandler {
    async fn handle(
        &self,
        doc: TaskDocument<ProvisionWorkflow>,
        driver: SelfPatchDriver<ProvisionWorkflow>,
    ) -> Result<()> {
        match doc.sub_stage {
            None => {
                driver.advance(ProvisionPhase::UploadImage).await?;
                Ok(())
            }
            Some(ProvisionPhase::UploadImage) => self.handle_upload_image(&doc, &driver).await,
            Some(ProvisionPhase::CreateVms) => self.handle_create_vms(&doc, &driver).await,
        }
    }
}
