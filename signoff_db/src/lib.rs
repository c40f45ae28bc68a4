#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::indexing_slicing)]
#![deny(clippy::panic)]
#![deny(unused_must_use)]

pub mod attachment;
pub mod core;
pub mod entity;
pub mod error;
pub mod service;
pub mod storage;
pub mod workflow;

pub use attachment::{AttachmentRef, AttachmentStore, AttachmentUpload, FsAttachmentStore};
pub use core::{
    ChangeHistoryEntry, FieldChange, Identity, LedgerEntry, NewWorkflow, RejectionRecord,
    SignoffStatus, StepLedger, Team, WorkflowId, WorkflowRecord, WorkflowStatus,
};
pub use entity::{Tracker, WorkflowSummary};
pub use error::{ErrorKind, SignoffError, StorageError};
pub use service::WorkflowService;
pub use storage::{Inspection, Journal, NoopJournal, RecoveryManager, WalJournal};
pub use workflow::{
    Decision, Engine, EngineConfig, RejectionPolicy, SignoffRequest, WorkflowPatch,
};
