//! Shared fixtures for the integration test suites: an in-memory document
//! store, a scripted domain-action double, and a fully wired provisioning
//! stack with short polling intervals.

#![allow(dead_code)]

use async_trait::async_trait;
use fleetcore::actions::{ActionRequest, DomainAction};
use fleetcore::config::CoreConfig;
use fleetcore::locks::EntityLockManager;
use fleetcore::state_machine::{
    StageHandler, TaskDocument, TaskFailure, TaskPayload, TaskStateMachine,
};
use fleetcore::store::{DocumentStore, MemoryDocumentStore};
use fleetcore::tasks::{ImageCopyHandler, ImageCopyTask, VmCreateHandler, VmCreateTask};
use fleetcore::workflow::{ProvisionWorkflow, ProvisionWorkflowHandler, WorkflowOrchestrator};
use fleetcore::{Result, SelfPatchDriver};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn memory_store() -> Arc<dyn DocumentStore> {
    fleetcore::logging::init_structured_logging();
    Arc::new(MemoryDocumentStore::new())
}

pub fn image_copy_payload() -> ImageCopyTask {
    ImageCopyTask {
        image: "image-1".to_string(),
        source_data_store: "store-a".to_string(),
        destination_data_store: "store-b".to_string(),
    }
}

pub fn provision_payload(vm_count: u32) -> ProvisionWorkflow {
    ProvisionWorkflow {
        image: "image-1".to_string(),
        source_image_store: "store-a".to_string(),
        destination_image_store: "store-b".to_string(),
        vm_flavor: "core-100".to_string(),
        vm_count,
        child_task_ids: Vec::new(),
    }
}

/// Poll a task document until it reaches a terminal stage. Panics if it
/// stays live past the deadline so a broken dispatch shows up as a test
/// failure instead of a hang.
pub async fn wait_for_terminal<P: TaskPayload>(
    machine: &TaskStateMachine<P>,
    id: &str,
) -> TaskDocument<P> {
    for _ in 0..500 {
        let doc = machine.get(id).await.expect("task document should exist");
        if doc.stage.is_terminal() {
            return doc;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} did not reach a terminal stage");
}

/// Stage handler that only counts its invocations and leaves the document
/// untouched.
#[derive(Default)]
pub struct CountingHandler {
    pub calls: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<P: TaskPayload> StageHandler<P> for CountingHandler {
    async fn handle(&self, _doc: TaskDocument<P>, _driver: SelfPatchDriver<P>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Scripted [`DomainAction`] double. Succeeds by default, assigning
/// sequential vm ids to `CreateVm`; individual action kinds can be scripted
/// to fail with a given [`TaskFailure`].
#[derive(Default)]
pub struct FakeDomainActions {
    vm_counter: AtomicU64,
    fail_matching: Mutex<Option<(&'static str, TaskFailure)>>,
    submitted: Mutex<Vec<ActionRequest>>,
}

impl FakeDomainActions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script every subsequent request of the given kind (e.g. `create_vm`)
    /// to fail with `failure`.
    pub fn fail_on(&self, kind: &'static str, failure: TaskFailure) {
        *self.fail_matching.lock() = Some((kind, failure));
    }

    pub fn submitted(&self) -> Vec<ActionRequest> {
        self.submitted.lock().clone()
    }

    pub fn submitted_of(&self, kind: &str) -> usize {
        self.submitted
            .lock()
            .iter()
            .filter(|request| Self::kind_of(request) == kind)
            .count()
    }

    fn kind_of(request: &ActionRequest) -> &'static str {
        match request {
            ActionRequest::UploadImage { .. } => "upload_image",
            ActionRequest::CopyImage { .. } => "copy_image",
            ActionRequest::CreateVm { .. } => "create_vm",
            ActionRequest::StartVm { .. } => "start_vm",
            ActionRequest::AttachIso { .. } => "attach_iso",
            ActionRequest::ProvisionContainer { .. } => "provision_container",
        }
    }
}

#[async_trait]
impl DomainAction for FakeDomainActions {
    async fn submit(&self, request: ActionRequest) -> std::result::Result<Value, TaskFailure> {
        self.submitted.lock().push(request.clone());

        if let Some((kind, failure)) = self.fail_matching.lock().as_ref() {
            if Self::kind_of(&request) == *kind {
                return Err(failure.clone());
            }
        }

        match request {
            ActionRequest::CreateVm { .. } => {
                let n = self.vm_counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "vm_id": format!("vm-{n}") }))
            }
            _ => Ok(json!({})),
        }
    }
}

/// The provisioning pipeline wired end to end against one in-memory store.
pub struct ProvisionStack {
    pub store: Arc<dyn DocumentStore>,
    pub actions: Arc<FakeDomainActions>,
    pub locks: EntityLockManager,
    pub workflow: Arc<TaskStateMachine<ProvisionWorkflow>>,
    pub image_copy: Arc<TaskStateMachine<ImageCopyTask>>,
    pub vm_create: Arc<TaskStateMachine<VmCreateTask>>,
}

pub fn provision_stack(config: &CoreConfig) -> ProvisionStack {
    let store = memory_store();
    let actions = FakeDomainActions::new();
    let locks = EntityLockManager::new(Arc::clone(&store));

    let copy_handler: Arc<dyn StageHandler<ImageCopyTask>> = Arc::new(ImageCopyHandler::new(
        actions.clone() as Arc<dyn DomainAction>,
        locks.clone(),
    ));
    let image_copy =
        TaskStateMachine::with_handler(Arc::clone(&store), config.default_task_ttl, copy_handler);

    let vm_handler: Arc<dyn StageHandler<VmCreateTask>> = Arc::new(VmCreateHandler::new(
        actions.clone() as Arc<dyn DomainAction>,
    ));
    let vm_create =
        TaskStateMachine::with_handler(Arc::clone(&store), config.default_task_ttl, vm_handler);

    let orchestrator = WorkflowOrchestrator::new(Arc::clone(&store), config);
    let workflow_handler: Arc<dyn StageHandler<ProvisionWorkflow>> =
        Arc::new(ProvisionWorkflowHandler::new(
            Arc::clone(&image_copy),
            Arc::clone(&vm_create),
            orchestrator,
        ));
    let workflow = TaskStateMachine::with_handler(
        Arc::clone(&store),
        config.default_task_ttl,
        workflow_handler,
    );

    ProvisionStack {
        store,
        actions,
        locks,
        workflow,
        image_copy,
        vm_create,
    }
}
