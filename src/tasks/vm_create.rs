//! # VM Create Task
//!
//! Provisions one VM from a flavor and image, optionally attaches an ISO,
//! then powers the VM on. Used both standalone and as the fan-out child of
//! the provisioning workflow's CreateVms phase.

use crate::actions::{ActionRequest, DomainAction};
use crate::error::{CoreError, Result};
use crate::self_patch::SelfPatchDriver;
use crate::state_machine::document::{require_field, NoSubStage, TaskDocument, TaskPayload};
use crate::state_machine::states::TaskFailure;
use crate::state_machine::task_state_machine::StageHandler;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmCreateTask {
    /// Flavor to provision. Immutable.
    pub flavor: String,
    /// Image to boot from. Immutable.
    pub image: String,
    /// ISO to attach before power-on, when present. Immutable.
    #[serde(default)]
    pub iso: Option<String>,
    /// Id of the created VM, recorded by the handler on completion.
    #[serde(default)]
    pub vm_id: Option<String>,
}

impl VmCreateTask {
    pub fn new(flavor: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            flavor: flavor.into(),
            image: image.into(),
            iso: None,
            vm_id: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VmCreatePatch {
    pub vm_id: Option<String>,
}

impl TaskPayload for VmCreateTask {
    const KIND: &'static str = "vm-create-tasks";
    type SubStage = NoSubStage;
    type Patch = VmCreatePatch;

    fn validate_create(&self) -> Result<()> {
        require_field(&self.flavor, "flavor")?;
        require_field(&self.image, "image")?;
        Ok(())
    }

    fn apply_patch(&mut self, patch: &Self::Patch) -> Result<()> {
        if let Some(vm_id) = &patch.vm_id {
            self.vm_id = Some(vm_id.clone());
        }
        Ok(())
    }
}

/// Stage handler: create, attach ISO when requested, start, record the VM id.
pub struct VmCreateHandler {
    actions: Arc<dyn DomainAction>,
}

impl VmCreateHandler {
    pub fn new(actions: Arc<dyn DomainAction>) -> Self {
        Self { actions }
    }

    fn vm_id_from(result: &serde_json::Value) -> Result<String> {
        result
            .get("vm_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                CoreError::execution_failure(TaskFailure::internal(
                    "create_vm result is missing vm_id",
                ))
            })
    }
}

#[async_trait]
impl StageHandler<VmCreateTask> for VmCreateHandler {
    async fn handle(
        &self,
        doc: TaskDocument<VmCreateTask>,
        driver: SelfPatchDriver<VmCreateTask>,
    ) -> Result<()> {
        let created = self
            .actions
            .submit(ActionRequest::CreateVm {
                flavor: doc.payload.flavor.clone(),
                image: doc.payload.image.clone(),
            })
            .await
            .map_err(CoreError::execution_failure)?;
        let vm_id = Self::vm_id_from(&created)?;

        if let Some(iso) = &doc.payload.iso {
            self.actions
                .submit(ActionRequest::AttachIso {
                    vm_id: vm_id.clone(),
                    iso: iso.clone(),
                })
                .await
                .map_err(CoreError::execution_failure)?;
        }

        self.actions
            .submit(ActionRequest::StartVm {
                vm_id: vm_id.clone(),
            })
            .await
            .map_err(CoreError::execution_failure)?;

        info!(task_id = %doc.id, vm_id = %vm_id, "vm provisioned and started");
        driver
            .finish_with(VmCreatePatch { vm_id: Some(vm_id) })
            .await?;
        Ok(())
    }
}
