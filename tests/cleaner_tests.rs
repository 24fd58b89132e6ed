//! Entity lock cleaner tests: orphan detection against owner task stages,
//! page-bounded sweeps, and the cleaner's own task document lifecycle.

mod common;

use common::image_copy_payload;
use fleetcore::config::CoreConfig;
use fleetcore::locks::{sweep_orphaned_locks, EntityLockCleaner, EntityLockManager};
use fleetcore::state_machine::{NewTask, PatchOrigin, TaskPatch, TaskStage, TaskStateMachine};
use fleetcore::store::DocumentStore;
use fleetcore::tasks::ImageCopyTask;
use std::sync::Arc;

/// Create an owner task document, optionally moved to a terminal stage.
async fn owner_task(
    machine: &TaskStateMachine<ImageCopyTask>,
    terminal: Option<TaskStage>,
) -> String {
    let doc = machine
        .create(NewTask::new(image_copy_payload()))
        .await
        .unwrap();
    if let Some(stage) = terminal {
        machine
            .patch(&doc.id, TaskPatch::stage(stage), PatchOrigin::SelfDriven)
            .await
            .unwrap();
    }
    doc.id
}

fn owner_machine(store: &Arc<dyn DocumentStore>) -> Arc<TaskStateMachine<ImageCopyTask>> {
    TaskStateMachine::new(
        Arc::clone(store),
        CoreConfig::for_testing().default_task_ttl,
    )
}

#[tokio::test]
async fn test_sweep_removes_orphans_and_keeps_live_locks() {
    let store = common::memory_store();
    let machine = owner_machine(&store);
    let locks = EntityLockManager::new(Arc::clone(&store));

    // Orphans: owners in each terminal stage plus one owner that never
    // existed.
    for (i, stage) in [TaskStage::Finished, TaskStage::Failed, TaskStage::Cancelled]
        .into_iter()
        .enumerate()
    {
        let owner = owner_task(&machine, Some(stage)).await;
        locks.acquire(&format!("orphan-{i}"), &owner).await.unwrap();
    }
    locks
        .acquire("orphan-missing", "image-copy-tasks/ghost")
        .await
        .unwrap();

    // Live locks: owners still in Created / Started.
    let created_owner = owner_task(&machine, None).await;
    locks.acquire("live-created", &created_owner).await.unwrap();
    let started = machine
        .create(NewTask::started(image_copy_payload()))
        .await
        .unwrap();
    locks.acquire("live-started", &started.id).await.unwrap();

    let stats = sweep_orphaned_locks(&store, 1000).await.unwrap();
    assert_eq!(stats.unreleased_entity_locks, 4);
    assert_eq!(stats.deleted_entity_locks, 4);

    for i in 0..3 {
        assert!(locks.get(&format!("orphan-{i}")).await.unwrap().is_none());
    }
    assert!(locks.get("orphan-missing").await.unwrap().is_none());
    assert!(locks.get("live-created").await.unwrap().is_some());
    assert!(locks.get("live-started").await.unwrap().is_some());
}

#[tokio::test]
async fn test_sweep_is_bounded_by_the_page_limit() {
    let store = common::memory_store();
    let machine = owner_machine(&store);
    let locks = EntityLockManager::new(Arc::clone(&store));

    for i in 0..5 {
        let owner = owner_task(&machine, Some(TaskStage::Finished)).await;
        locks.acquire(&format!("disk-{i}"), &owner).await.unwrap();
    }

    let stats = sweep_orphaned_locks(&store, 2).await.unwrap();
    assert_eq!(stats.unreleased_entity_locks, 2);
    assert_eq!(stats.deleted_entity_locks, 2);

    // A follow-up sweep picks up the remainder.
    let rest = sweep_orphaned_locks(&store, 1000).await.unwrap();
    assert_eq!(rest.deleted_entity_locks, 3);
}

#[tokio::test]
async fn test_sweep_on_empty_store_reports_nothing() {
    let store = common::memory_store();
    let stats = sweep_orphaned_locks(&store, 1000).await.unwrap();
    assert_eq!(stats.unreleased_entity_locks, 0);
    assert_eq!(stats.deleted_entity_locks, 0);
}

#[tokio::test]
async fn test_run_once_records_counters_on_its_task_document() {
    let store = common::memory_store();
    let machine = owner_machine(&store);
    let locks = EntityLockManager::new(Arc::clone(&store));

    for i in 0..2 {
        let owner = owner_task(&machine, Some(TaskStage::Failed)).await;
        locks.acquire(&format!("vm-{i}"), &owner).await.unwrap();
    }

    let cleaner = EntityLockCleaner::new(Arc::clone(&store), &CoreConfig::for_testing());
    let run = cleaner.run_once().await.unwrap();

    assert_eq!(run.stage, TaskStage::Finished);
    assert_eq!(run.payload.unreleased_entity_locks, 2);
    assert_eq!(run.payload.deleted_entity_locks, 2);
    assert!(locks.get("vm-0").await.unwrap().is_none());
    assert!(locks.get("vm-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_once_honours_a_small_page_limit() {
    let store = common::memory_store();
    let machine = owner_machine(&store);
    let locks = EntityLockManager::new(Arc::clone(&store));

    for i in 0..4 {
        let owner = owner_task(&machine, Some(TaskStage::Finished)).await;
        locks.acquire(&format!("host-{i}"), &owner).await.unwrap();
    }

    let mut config = CoreConfig::for_testing();
    config.lock_page_limit = 3;
    let cleaner = EntityLockCleaner::new(Arc::clone(&store), &config);

    let run = cleaner.run_once().await.unwrap();
    assert_eq!(run.stage, TaskStage::Finished);
    assert_eq!(run.payload.deleted_entity_locks, 3);
}
