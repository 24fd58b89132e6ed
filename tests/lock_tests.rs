//! Entity lock acquisition and release semantics: fail-fast mutual
//! exclusion, holder reporting, and idempotent release.

mod common;

use fleetcore::locks::EntityLockManager;
use fleetcore::CoreError;

#[tokio::test]
async fn test_concurrent_acquire_admits_exactly_one() {
    let locks = EntityLockManager::new(common::memory_store());

    let (a, b) = tokio::join!(
        locks.acquire("disk-1", "tasks/a"),
        locks.acquire("disk-1", "tasks/b"),
    );

    let (winner, loser) = match (a, b) {
        (Ok(lock), Err(err)) => (lock, err),
        (Err(err), Ok(lock)) => (lock, err),
        (Ok(_), Ok(_)) => panic!("both acquisitions succeeded"),
        (Err(a), Err(b)) => panic!("both acquisitions failed: {a}, {b}"),
    };

    assert_eq!(winner.entity_id, "disk-1");
    match loser {
        CoreError::EntityBusy {
            entity_id,
            holder_task_id,
        } => {
            assert_eq!(entity_id, "disk-1");
            assert_eq!(holder_task_id, winner.task_id);
        }
        other => panic!("expected EntityBusy, got {other}"),
    }

    // The stored lock names the winner.
    let held = locks.get("disk-1").await.unwrap().unwrap();
    assert_eq!(held.task_id, winner.task_id);
}

#[tokio::test]
async fn test_acquire_names_the_current_holder() {
    let locks = EntityLockManager::new(common::memory_store());
    locks.acquire("vm-7", "tasks/owner").await.unwrap();

    let busy = locks.acquire("vm-7", "tasks/other").await.unwrap_err();
    match busy {
        CoreError::EntityBusy { holder_task_id, .. } => {
            assert_eq!(holder_task_id, "tasks/owner");
        }
        other => panic!("expected EntityBusy, got {other}"),
    }
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let locks = EntityLockManager::new(common::memory_store());
    locks.acquire("image-1", "tasks/a").await.unwrap();

    locks.release("image-1").await.unwrap();
    // A duplicate or late release observes an absent lock and still succeeds.
    locks.release("image-1").await.unwrap();

    assert!(locks.get("image-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_entity_is_reacquirable_after_release() {
    let locks = EntityLockManager::new(common::memory_store());

    locks.acquire("image-1", "tasks/a").await.unwrap();
    locks.release("image-1").await.unwrap();

    let lock = locks.acquire("image-1", "tasks/b").await.unwrap();
    assert_eq!(lock.task_id, "tasks/b");
}

#[tokio::test]
async fn test_locks_on_distinct_entities_are_independent() {
    let locks = EntityLockManager::new(common::memory_store());

    locks.acquire("image-1", "tasks/a").await.unwrap();
    locks.acquire("image-2", "tasks/b").await.unwrap();

    assert_eq!(locks.get("image-1").await.unwrap().unwrap().task_id, "tasks/a");
    assert_eq!(locks.get("image-2").await.unwrap().unwrap().task_id, "tasks/b");
}
