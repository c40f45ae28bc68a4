use std::collections::BTreeMap;
use std::path::Path;

use crate::core::history::verify_history;
use crate::core::record::{WorkflowId, WorkflowRecord};
use crate::error::StorageError;
use crate::storage::append::{
    AppendEntry, AppendLog, ENTRY_CHECKPOINT, ENTRY_WORKFLOW, decode_checkpoint, decode_workflow,
};
use crate::storage::persistence::Checkpoint;
use crate::storage::reader::DatabaseReader;
use crate::storage::writer::DatabaseWriter;
use crate::workflow::check_invariants;

/// Workflows and id sequence rebuilt from disk.
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub workflows: Vec<WorkflowRecord>,
    pub next_sequence: u64,
}

/// Read-only view of a database: what is on disk and what is wrong with it.
#[derive(Debug, Default)]
pub struct Inspection {
    pub workflows: usize,
    pub wal_entries: usize,
    pub next_sequence: u64,
    pub problems: Vec<String>,
}

/// Snapshot contents with the log folded over them.
struct Merged {
    workflows: BTreeMap<WorkflowId, WorkflowRecord>,
    next_sequence: u64,
    checkpoint: Option<Checkpoint>,
    replayed: usize,
}

impl Merged {
    fn new(workflows: Vec<WorkflowRecord>, next_sequence: u64) -> Self {
        Self {
            workflows: workflows.into_iter().map(|wf| (wf.id(), wf)).collect(),
            next_sequence,
            checkpoint: None,
            replayed: 0,
        }
    }

    /// Highest version per workflow wins; the sequence never moves back.
    fn replay(&mut self, entries: Vec<(AppendEntry, Vec<u8>)>) -> Result<(), StorageError> {
        for (entry, data) in entries {
            match entry.entry_type {
                ENTRY_WORKFLOW => {
                    let wf = decode_workflow(&data)?;
                    self.next_sequence = self.next_sequence.max(wf.id().0 + 1);
                    self.replayed += 1;

                    let newer = self
                        .workflows
                        .get(&wf.id())
                        .is_none_or(|existing| wf.version() > existing.version());
                    if newer {
                        self.workflows.insert(wf.id(), wf);
                    }
                }
                ENTRY_CHECKPOINT => {
                    let checkpoint = decode_checkpoint(&data)?;
                    self.next_sequence = self.next_sequence.max(checkpoint.next_sequence);
                    self.checkpoint = Some(checkpoint);
                }
                other => {
                    return Err(StorageError::Deserialization(format!(
                        "Unknown entry type: {}",
                        other
                    )));
                }
            }
        }
        Ok(())
    }

    fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for wf in self.workflows.values() {
            if let Err(msg) = check_invariants(wf) {
                problems.push(format!("{}: {}", wf.id(), msg));
            }
            if let Err(e) = verify_history(wf.history()) {
                problems.push(format!("{}: {}", wf.id(), e));
            }
        }
        problems
    }
}

pub struct RecoveryManager;

impl RecoveryManager {
    /// Loads the snapshot, folds the write-ahead log over it and compacts
    /// when the log had entries. A snapshot with a bad checksum is
    /// abandoned in favour of the log alone, but only when the log still
    /// accounts for every workflow the snapshot held.
    pub fn recover<P: AsRef<Path>>(db_path: P) -> Result<RecoveredState, StorageError> {
        let mut log = AppendLog::new(&db_path)?;
        let (state, dirty) = Self::load(&db_path, &mut log)?;

        if dirty {
            Self::compact_log(&db_path, &mut log, &state.workflows, state.next_sequence)?;
        }

        tracing::debug!(
            workflows = state.workflows.len(),
            next_sequence = state.next_sequence,
            "database recovered"
        );
        Ok(state)
    }

    /// Snapshot plus log, validated. The flag is set when the snapshot no
    /// longer matches what is durable and should be rewritten.
    pub(crate) fn load<P: AsRef<Path>>(
        db_path: P,
        log: &mut AppendLog,
    ) -> Result<(RecoveredState, bool), StorageError> {
        let snapshot = DatabaseReader::new(&db_path)?.read_workflows();
        let entries = log.read_all_entries()?;

        let (merged, dirty) = match snapshot {
            Ok((workflows, next_sequence)) => {
                let mut merged = Merged::new(workflows, next_sequence);
                merged.replay(entries)?;
                if merged.replayed > 0 {
                    tracing::info!(entries = merged.replayed, "wal replayed over snapshot");
                }
                let dirty = merged.replayed > 0;
                (merged, dirty)
            }
            Err(StorageError::ChecksumMismatch) => {
                tracing::warn!(
                    path = %db_path.as_ref().display(),
                    "snapshot checksum mismatch, recovering from wal"
                );
                (Self::from_wal_alone(entries)?, true)
            }
            Err(e) => return Err(e),
        };

        Ok((Self::finish(merged)?, dirty))
    }

    fn from_wal_alone(entries: Vec<(AppendEntry, Vec<u8>)>) -> Result<Merged, StorageError> {
        let mut merged = Merged::new(Vec::new(), 1);
        merged.replay(entries)?;

        let checkpoint = merged.checkpoint.take().ok_or_else(|| {
            StorageError::ValidationFailed(
                "Cannot recover: snapshot is corrupted and the WAL has no checkpoint".to_string(),
            )
        })?;

        let missing: Vec<String> = checkpoint
            .workflow_ids
            .iter()
            .map(|&id| WorkflowId(id))
            .filter(|id| !merged.workflows.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::ValidationFailed(format!(
                "Cannot recover: snapshot is corrupted and the WAL lacks {}",
                missing.join(", ")
            )));
        }

        Ok(merged)
    }

    fn finish(merged: Merged) -> Result<RecoveredState, StorageError> {
        if let Some(problem) = merged.problems().into_iter().next() {
            return Err(StorageError::ValidationFailed(problem));
        }

        Ok(RecoveredState {
            workflows: merged.workflows.into_values().collect(),
            next_sequence: merged.next_sequence.max(1),
        })
    }

    /// Reads the snapshot and log without repairing or rewriting either.
    /// Damaged files are errors; broken workflows are listed as problems.
    pub fn inspect<P: AsRef<Path>>(db_path: P) -> Result<Inspection, StorageError> {
        let (workflows, next_sequence) = DatabaseReader::new(&db_path)?.read_workflows()?;
        let mut merged = Merged::new(workflows, next_sequence);

        let mut wal_entries = 0;
        if AppendLog::path_for(&db_path).exists() {
            let entries = AppendLog::new(&db_path)?.read_all_entries()?;
            wal_entries = entries.len();
            merged.replay(entries)?;
        }

        Ok(Inspection {
            workflows: merged.workflows.len(),
            wal_entries,
            next_sequence: merged.next_sequence.max(1),
            problems: merged.problems(),
        })
    }

    /// Rewrites the snapshot from `workflows` and restarts the log.
    pub fn compact<P: AsRef<Path>>(
        db_path: P,
        workflows: &[WorkflowRecord],
        next_sequence: u64,
    ) -> Result<(), StorageError> {
        let mut log = AppendLog::new(&db_path)?;
        Self::compact_log(db_path, &mut log, workflows, next_sequence)
    }

    /// Same as [`RecoveryManager::compact`] through a log the caller
    /// already holds.
    pub(crate) fn compact_log<P: AsRef<Path>>(
        db_path: P,
        log: &mut AppendLog,
        workflows: &[WorkflowRecord],
        next_sequence: u64,
    ) -> Result<(), StorageError> {
        DatabaseWriter::new(&db_path).write_workflows(workflows, next_sequence)?;
        log.truncate()?;
        log.append_checkpoint(&Checkpoint {
            next_sequence,
            workflow_ids: workflows.iter().map(|wf| wf.id().0).collect(),
        })?;
        tracing::info!(workflows = workflows.len(), "database compacted");
        Ok(())
    }

    pub fn create_snapshot<P: AsRef<Path>>(
        workflows: &[WorkflowRecord],
        next_sequence: u64,
        snapshot_path: P,
    ) -> Result<(), StorageError> {
        DatabaseWriter::new(snapshot_path).write_workflows(workflows, next_sequence)
    }

    pub fn verify_file<P: AsRef<Path>>(db_path: P) -> Result<bool, StorageError> {
        let reader = DatabaseReader::new(db_path)?;
        reader.read_and_verify()?;
        Ok(true)
    }

    /// Writes an empty database and clears any stale log.
    pub fn init_database<P: AsRef<Path>>(db_path: P) -> Result<(), StorageError> {
        Self::compact(db_path, &[], 1)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]
    #![allow(clippy::panic)]

    use std::fs;
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::core::record::NewWorkflow;
    use crate::core::user::Team;
    use crate::workflow::{Engine, SignoffRequest};

    fn db_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("signoff.db")
    }

    fn workflow(id: u64) -> WorkflowRecord {
        let payload = NewWorkflow::new("Acme").with_field("company_name", json!("A"));
        WorkflowRecord::new(WorkflowId(id), payload, 10).unwrap()
    }

    fn corrupt_body(path: &Path) {
        let mut bytes = fs::read(path).unwrap();
        let (header, _) = DatabaseReader::from_bytes(bytes.clone())
            .read_and_verify()
            .unwrap();
        bytes[header.body_offset as usize] ^= 0xFF;
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_init_then_recover_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        RecoveryManager::init_database(&path).unwrap();
        let state = RecoveryManager::recover(&path).unwrap();

        assert!(state.workflows.is_empty());
        assert_eq!(state.next_sequence, 1);
        assert!(RecoveryManager::verify_file(&path).unwrap());
    }

    #[test]
    fn test_wal_replays_over_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);
        let first = workflow(1);

        RecoveryManager::compact(&path, std::slice::from_ref(&first), 2).unwrap();

        let advanced = Engine::new()
            .record_signoff(
                &first,
                &SignoffRequest::approve(1, Team::Integration, "ivan"),
                20,
            )
            .unwrap();
        {
            let mut log = AppendLog::new(&path).unwrap();
            log.append_workflow(&workflow(2)).unwrap();
            log.append_workflow(&advanced).unwrap();
            // a stale copy must not win over the newer version
            log.append_workflow(&first).unwrap();
        }

        let state = RecoveryManager::recover(&path).unwrap();

        assert_eq!(state.workflows.len(), 2);
        assert_eq!(state.workflows[0], advanced);
        assert_eq!(state.workflows[1].id(), WorkflowId(2));
        assert_eq!(state.next_sequence, 3);

        // compacted: the log restarts with a checkpoint and the snapshot
        // alone has everything
        let mut log = AppendLog::new(&path).unwrap();
        let entries = log.read_all_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.entry_type, ENTRY_CHECKPOINT);
        let checkpoint = decode_checkpoint(&entries[0].1).unwrap();
        assert_eq!(checkpoint.workflow_ids, [1, 2]);
        assert_eq!(checkpoint.next_sequence, 3);
        let (snapshot, _) = DatabaseReader::new(&path).unwrap().read_workflows().unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_corrupt_snapshot_falls_back_to_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        RecoveryManager::compact(&path, &[workflow(1)], 2).unwrap();
        AppendLog::new(&path)
            .unwrap()
            .append_workflow(&workflow(1))
            .unwrap();
        corrupt_body(&path);

        let state = RecoveryManager::recover(&path).unwrap();
        assert_eq!(state.workflows.len(), 1);
        assert_eq!(state.next_sequence, 2);
    }

    #[test]
    fn test_corrupt_snapshot_without_wal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        RecoveryManager::compact(&path, &[workflow(1)], 2).unwrap();
        corrupt_body(&path);

        assert!(matches!(
            RecoveryManager::recover(&path),
            Err(StorageError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_corrupt_snapshot_with_partial_wal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        RecoveryManager::compact(&path, &[workflow(1), workflow(2), workflow(3)], 4).unwrap();
        let advanced = Engine::new()
            .record_signoff(
                &workflow(1),
                &SignoffRequest::approve(1, Team::Integration, "ivan"),
                20,
            )
            .unwrap();
        AppendLog::new(&path)
            .unwrap()
            .append_workflow(&advanced)
            .unwrap();
        corrupt_body(&path);

        match RecoveryManager::recover(&path) {
            Err(StorageError::ValidationFailed(msg)) => {
                assert!(msg.contains("WF00002"), "{}", msg);
                assert!(msg.contains("WF00003"), "{}", msg);
            }
            other => panic!("expected ValidationFailed, got {:?}", other.map(|s| s.workflows.len())),
        }

        // nothing was rewritten; the log still holds the sign-off
        let entries = AppendLog::new(&path).unwrap().read_all_entries().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_wal_since_init_recovers_without_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        RecoveryManager::init_database(&path).unwrap();
        {
            let mut log = AppendLog::new(&path).unwrap();
            log.append_workflow(&workflow(1)).unwrap();
            log.append_workflow(&workflow(2)).unwrap();
        }
        corrupt_body(&path);

        let state = RecoveryManager::recover(&path).unwrap();
        assert_eq!(state.workflows.len(), 2);
        assert_eq!(state.next_sequence, 3);

        // the snapshot was rewritten from the log
        assert!(RecoveryManager::verify_file(&path).unwrap());
    }

    #[test]
    fn test_inspect_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        let mut broken = workflow(2);
        broken.current_step = 5;
        RecoveryManager::compact(&path, &[workflow(1)], 2).unwrap();
        AppendLog::new(&path)
            .unwrap()
            .append_workflow(&broken)
            .unwrap();

        let snapshot_before = fs::read(&path).unwrap();
        let wal_before = fs::read(AppendLog::path_for(&path)).unwrap();

        let inspection = RecoveryManager::inspect(&path).unwrap();

        assert_eq!(inspection.workflows, 2);
        assert_eq!(inspection.wal_entries, 2);
        assert_eq!(inspection.next_sequence, 3);
        assert_eq!(inspection.problems.len(), 1);
        assert!(inspection.problems[0].starts_with("WF00002"));

        assert_eq!(fs::read(&path).unwrap(), snapshot_before);
        assert_eq!(fs::read(AppendLog::path_for(&path)).unwrap(), wal_before);
    }

    #[test]
    fn test_broken_invariant_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        let mut broken = workflow(1);
        broken.current_step = 5;
        RecoveryManager::compact(&path, &[broken], 2).unwrap();

        assert!(matches!(
            RecoveryManager::recover(&path),
            Err(StorageError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_snapshot_copy() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("backup.db");

        RecoveryManager::create_snapshot(&[workflow(1)], 2, &snap).unwrap();
        assert!(RecoveryManager::verify_file(&snap).unwrap());
    }
}
