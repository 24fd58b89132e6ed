#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fleetcore
//!
//! Orchestration core for a cluster-management control plane. All
//! orchestration logic is built as collections of small, persistent task
//! documents mutated through validated partial updates: many independently
//! scheduled, possibly crashing task instances coordinate multi-step
//! operations (provision N VMs, copy an image between stores) with
//! at-most-one-writer-per-entity and eventual cleanup after failure.
//!
//! ## Architecture
//!
//! - [`state_machine`] - Lifecycle stages, the typed document envelope, and
//!   the single validated mutation gate every patch passes through
//! - [`self_patch`] - How a task advances its own stage after an async
//!   operation completes, through the same gate
//! - [`workflow`] - Fan-out pipelines of child tasks with bounded polling
//!   and strict outcome aggregation
//! - [`locks`] - Non-blocking entity locks plus the reconciliation sweep
//!   that removes locks orphaned by terminated tasks
//! - [`store`] - The document-store port consumed from the replicated store
//!   collaborator, with an in-memory per-document-id implementation
//! - [`actions`] - The async submit port to hypervisor/image-store drivers
//! - [`service`] - Create/read/patch facade with origin restrictions
//! - [`config`] - Engine tunables
//! - [`error`] - Structured error handling
//!
//! ## Concurrency model
//!
//! Each document has exactly one logical writer at a time: the store
//! serializes writes per document id, so races resolve to "one write wins,
//! the other observes a rejected patch or a conflict." The only
//! cross-document coordination primitive is the entity lock, acquired
//! fail-fast and reconciled by the cleaner after crashes. Cancellation is a
//! normal terminal-stage patch: in-flight handlers run to completion and
//! their stale self-patches are dropped harmlessly.
//!
//! ## Quick Start
//!
//! ```rust
//! use fleetcore::config::CoreConfig;
//! use fleetcore::locks::EntityLockManager;
//! use fleetcore::store::{DocumentStore, MemoryDocumentStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new());
//! let config = CoreConfig::from_env()?;
//!
//! let locks = EntityLockManager::new(Arc::clone(&store));
//! locks.acquire("image-1234", "image-copy-tasks/abcd").await?;
//! locks.release("image-1234").await?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod locks;
pub mod logging;
pub mod self_patch;
pub mod service;
pub mod state_machine;
pub mod store;
pub mod tasks;
pub mod workflow;

pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use locks::{EntityLockCleaner, EntityLockDocument, EntityLockManager};
pub use self_patch::SelfPatchDriver;
pub use service::TaskService;
pub use state_machine::{
    ControlFlags, DocumentId, FailureKind, NewTask, NoSubStage, PatchOrigin, StageHandler,
    SubStageSpec, TaskDocument, TaskEnvelope, TaskFailure, TaskPatch, TaskPayload, TaskStage,
    TaskStateMachine,
};
pub use store::{DocumentStore, FieldEquals, MemoryDocumentStore, StoredDocument};
pub use workflow::WorkflowOrchestrator;
