//! # Domain Action Port
//!
//! Contract consumed from the executors that actually talk to hypervisors,
//! image stores, and container runtimes. The engine submits a request and
//! eventually observes success (with a result payload) or a structured
//! failure; it never interprets driver internals.

use crate::state_machine::states::TaskFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The domain operations the orchestration core can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    UploadImage {
        image: String,
        image_store: String,
    },
    CopyImage {
        image: String,
        source_data_store: String,
        destination_data_store: String,
    },
    CreateVm {
        flavor: String,
        image: String,
    },
    StartVm {
        vm_id: String,
    },
    AttachIso {
        vm_id: String,
        iso: String,
    },
    ProvisionContainer {
        image: String,
        host: String,
    },
}

/// Async submit contract: `submit(request)` resolves to the action's result
/// payload on success or a [`TaskFailure`] the engine records on the owning
/// task document. Implementations live outside this crate (hypervisor and
/// store drivers); tests use scripted doubles.
#[async_trait]
pub trait DomainAction: Send + Sync + 'static {
    async fn submit(&self, request: ActionRequest) -> std::result::Result<Value, TaskFailure>;
}
