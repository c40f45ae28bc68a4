pub mod history;
pub mod ledger;
pub mod record;
pub mod user;

pub use history::{ChangeHistoryEntry, FieldChange};
pub use ledger::{LedgerEntry, RejectionRecord, SignoffStatus, StepLedger};
pub use record::{CustomField, NewWorkflow, WorkflowId, WorkflowRecord, WorkflowStatus};
pub use user::{Identity, Team};

/// Seconds since the unix epoch; a clock set before 1970 reads as 0.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
