pub mod append;
pub mod persistence;
pub mod reader;
pub mod recovery;
pub mod writer;

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::core::record::WorkflowRecord;
use crate::error::StorageError;

pub use append::AppendLog;
pub use recovery::{Inspection, RecoveredState, RecoveryManager};

/// Raw sha256 of `data`.
pub(crate) fn digest_bytes(data: &[u8]) -> Result<[u8; 32], StorageError> {
    hex::decode(sha256::digest(data))
        .map_err(|e| StorageError::Serialization(format!("Hex decode failed: {}", e)))?
        .try_into()
        .map_err(|_| StorageError::Serialization("Checksum conversion failed".to_string()))
}

/// Durable sink for workflow mutations. A mutation is only published once
/// `persist` has succeeded.
pub trait Journal: Send + Sync {
    fn persist(&self, workflow: &WorkflowRecord) -> Result<(), StorageError>;

    /// Folds everything persisted so far into a fresh snapshot. No
    /// `persist` may interleave. `next_sequence` is a floor for the
    /// stored id sequence.
    fn compact(&self, _next_sequence: u64) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Journal that keeps nothing; for purely in-memory services.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

impl Journal for NoopJournal {
    fn persist(&self, _workflow: &WorkflowRecord) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Journal backed by the write-ahead log next to the database file.
pub struct WalJournal {
    db_path: PathBuf,
    log: Mutex<AppendLog>,
}

impl WalJournal {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        Ok(Self {
            db_path: db_path.as_ref().to_path_buf(),
            log: Mutex::new(AppendLog::new(db_path)?),
        })
    }
}

impl Journal for WalJournal {
    fn persist(&self, workflow: &WorkflowRecord) -> Result<(), StorageError> {
        self.log.lock().append_workflow(workflow)
    }

    // Reads disk, not the tracker: no workflow lock may be taken while the
    // log is held.
    fn compact(&self, next_sequence: u64) -> Result<(), StorageError> {
        let mut log = self.log.lock();
        let (state, _) = RecoveryManager::load(&self.db_path, &mut log)?;
        RecoveryManager::compact_log(
            &self.db_path,
            &mut log,
            &state.workflows,
            state.next_sequence.max(next_sequence),
        )
    }
}
