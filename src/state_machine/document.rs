//! # Task Document Envelope
//!
//! Every unit of orchestrated work is a persisted, versioned task document:
//! a common lifecycle envelope (stage, sub-stage, control flags, expiration,
//! failure) wrapping a kind-specific payload. Payload merging is statically
//! defined per kind through [`TaskPayload`]: immutable fields simply have no
//! counterpart in the patch type, so immutability is checked at compile time
//! rather than by field-name reflection.

use crate::error::{CoreError, Result};
use crate::state_machine::states::{ControlFlags, TaskFailure, TaskStage};
use crate::store::StoredDocument;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Opaque document id, e.g. `image-copy-tasks/3f2a…`.
pub type DocumentId = String;

/// Sub-stage enum contract: a workflow-specific set of phases within
/// [`TaskStage::Started`], with a directed-acyclic transition table.
pub trait SubStageSpec:
    Copy + Eq + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Whether the `from → to` edge exists in this workflow's transition
    /// table. `from = None` covers entry into the first phase.
    fn edge_allowed(from: Option<Self>, to: Self) -> bool;
}

/// Sub-stage type for task kinds that have no phases within `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoSubStage {}

impl SubStageSpec for NoSubStage {
    fn edge_allowed(_from: Option<Self>, to: Self) -> bool {
        match to {}
    }
}

/// Kind-specific document payload with a statically-defined partial-update
/// shape.
pub trait TaskPayload:
    Clone + std::fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Store-level kind, also the id prefix for documents of this type.
    const KIND: &'static str;

    type SubStage: SubStageSpec;

    /// Mutable-field subset; fields declared immutable at creation do not
    /// appear here, so no patch can ever change them.
    type Patch: Clone + Default + std::fmt::Debug + Send + Sync + 'static;

    /// Required-field presence checks at creation time.
    fn validate_create(&self) -> Result<()>;

    /// Merge the mutable fields of `patch` into `self`.
    fn apply_patch(&mut self, patch: &Self::Patch) -> Result<()>;
}

/// A persisted task document: lifecycle envelope plus kind-specific payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "P: TaskPayload", deserialize = "P: TaskPayload"))]
pub struct TaskDocument<P: TaskPayload> {
    /// Store-assigned document id; not part of the serialized body.
    #[serde(skip)]
    pub id: DocumentId,
    /// Monotonic version counter owned by the store.
    #[serde(skip)]
    pub version: u64,

    pub stage: TaskStage,
    #[serde(default)]
    pub sub_stage: Option<P::SubStage>,
    #[serde(default)]
    pub control_flags: ControlFlags,
    #[serde(default)]
    pub is_self_progression_disabled: bool,
    #[serde(default)]
    pub expiration_time_micros: i64,
    #[serde(default)]
    pub failure: Option<TaskFailure>,

    #[serde(flatten)]
    pub payload: P,
}

impl<P: TaskPayload> TaskDocument<P> {
    /// Serialize the envelope + payload into a store body.
    pub fn to_body(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rehydrate a typed document from a stored record.
    pub fn from_stored(stored: &StoredDocument) -> Result<Self> {
        let mut doc: Self = serde_json::from_value(stored.body.clone())?;
        doc.id = stored.id.clone();
        doc.version = stored.version;
        Ok(doc)
    }

    pub fn processing_disabled(&self) -> bool {
        self.control_flags
            .contains(ControlFlags::OPERATION_PROCESSING_DISABLED)
    }
}

/// Kind-agnostic view of any task document's lifecycle envelope. Lets the
/// lock cleaner and child pollers inspect a document's stage without knowing
/// its payload type.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEnvelope {
    pub stage: TaskStage,
    #[serde(default)]
    pub failure: Option<TaskFailure>,
}

impl TaskEnvelope {
    pub fn from_stored(stored: &StoredDocument) -> Result<Self> {
        Ok(serde_json::from_value(stored.body.clone())?)
    }
}

/// Creation-time input for a task document. Absent fields are filled with
/// defaults by the state machine (`stage = Created`, default TTL).
#[derive(Debug, Clone)]
pub struct NewTask<P: TaskPayload> {
    pub stage: Option<TaskStage>,
    pub sub_stage: Option<P::SubStage>,
    pub control_flags: ControlFlags,
    pub is_self_progression_disabled: bool,
    /// Non-positive means "assign the default TTL".
    pub expiration_time_micros: i64,
    pub payload: P,
}

impl<P: TaskPayload> NewTask<P> {
    pub fn new(payload: P) -> Self {
        Self {
            stage: None,
            sub_stage: None,
            control_flags: ControlFlags::NONE,
            is_self_progression_disabled: false,
            expiration_time_micros: 0,
            payload,
        }
    }

    /// Create the document directly in `Started`, kicking off processing
    /// atomically with creation.
    pub fn started(payload: P) -> Self {
        Self {
            stage: Some(TaskStage::Started),
            ..Self::new(payload)
        }
    }

    pub fn with_expiration(mut self, expiration_time_micros: i64) -> Self {
        self.expiration_time_micros = expiration_time_micros;
        self
    }

    pub fn with_control_flags(mut self, flags: ControlFlags) -> Self {
        self.control_flags = flags;
        self
    }

    pub fn self_progression_disabled(mut self) -> Self {
        self.is_self_progression_disabled = true;
        self
    }
}

/// A validated partial update. Only the fields present are applied; payload
/// mutation is delegated to the statically-typed [`TaskPayload::Patch`].
#[derive(Debug, Clone)]
pub struct TaskPatch<P: TaskPayload> {
    pub stage: Option<TaskStage>,
    pub sub_stage: Option<P::SubStage>,
    pub failure: Option<TaskFailure>,
    pub payload: P::Patch,
}

impl<P: TaskPayload> Default for TaskPatch<P> {
    fn default() -> Self {
        Self {
            stage: None,
            sub_stage: None,
            failure: None,
            payload: P::Patch::default(),
        }
    }
}

impl<P: TaskPayload> TaskPatch<P> {
    pub fn stage(stage: TaskStage) -> Self {
        Self {
            stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn sub_stage(sub_stage: P::SubStage) -> Self {
        Self {
            stage: Some(TaskStage::Started),
            sub_stage: Some(sub_stage),
            ..Self::default()
        }
    }

    pub fn failed(failure: TaskFailure) -> Self {
        Self {
            stage: Some(TaskStage::Failed),
            failure: Some(failure),
            ..Self::default()
        }
    }

    pub fn payload(payload: P::Patch) -> Self {
        Self {
            payload,
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: P::Patch) -> Self {
        self.payload = payload;
        self
    }
}

/// Validate that a required string field is present and non-empty.
pub fn require_field(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(format!("{name} not provided")));
    }
    Ok(())
}
