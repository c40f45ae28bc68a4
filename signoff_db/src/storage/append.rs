// Write-ahead log: every accepted mutation is appended as a full workflow
// snapshot and folded into the main file on compaction.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::record::WorkflowRecord;
use crate::error::StorageError;
use crate::storage::digest_bytes;
use crate::storage::persistence::{Checkpoint, SerializableWorkflow};
use crate::storage::reader::decode;

const APPEND_MAGIC: [u8; 4] = [0x41, 0x50, 0x4E, 0x44]; // "APND"
const ENTRY_HEADER_SIZE: usize = 4 + 1 + 8 + 4 + 32; // 49 bytes, no padding

pub const ENTRY_WORKFLOW: u8 = 1;
pub const ENTRY_CHECKPOINT: u8 = 2;

#[derive(Debug, Clone)]
pub struct AppendEntry {
    pub magic: [u8; 4],
    pub entry_type: u8,
    pub timestamp: u64,
    pub data_size: u32,
    pub checksum: [u8; 32],
}

impl AppendEntry {
    pub fn new(entry_type: u8, data_size: u32, checksum: [u8; 32]) -> Self {
        Self {
            magic: APPEND_MAGIC,
            entry_type,
            timestamp: crate::core::unix_now(),
            data_size,
            checksum,
        }
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_HEADER_SIZE] {
        let mut bytes = Vec::with_capacity(ENTRY_HEADER_SIZE);
        bytes.extend_from_slice(&self.magic);
        bytes.push(self.entry_type);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.data_size.to_le_bytes());
        bytes.extend_from_slice(&self.checksum);

        let mut out = [0u8; ENTRY_HEADER_SIZE];
        for (slot, byte) in out.iter_mut().zip(bytes) {
            *slot = byte;
        }
        out
    }

    pub fn from_bytes(bytes: &[u8; ENTRY_HEADER_SIZE]) -> Result<Self, StorageError> {
        fn field<const N: usize>(
            bytes: &[u8],
            range: std::ops::Range<usize>,
            name: &str,
        ) -> Result<[u8; N], StorageError> {
            bytes
                .get(range)
                .and_then(|slice| slice.try_into().ok())
                .ok_or_else(|| StorageError::Deserialization(format!("Failed to read {}", name)))
        }

        let magic: [u8; 4] = field(bytes, 0..4, "magic bytes")?;
        let [entry_type]: [u8; 1] = field(bytes, 4..5, "entry_type")?;
        let timestamp = u64::from_le_bytes(field(bytes, 5..13, "timestamp")?);
        let data_size = u32::from_le_bytes(field(bytes, 13..17, "data_size")?);
        let checksum: [u8; 32] = field(bytes, 17..49, "checksum")?;

        Ok(Self {
            magic,
            entry_type,
            timestamp,
            data_size,
            checksum,
        })
    }
}

pub struct AppendLog {
    path: PathBuf,
    file: File,
}

impl AppendLog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        let path = Self::path_for(db_path);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        Ok(Self { path, file })
    }

    pub fn path_for<P: AsRef<Path>>(db_path: P) -> PathBuf {
        let mut path = PathBuf::from(db_path.as_ref());
        path.set_extension("wal");
        path
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_workflow(&mut self, workflow: &WorkflowRecord) -> Result<(), StorageError> {
        let serializable = SerializableWorkflow::try_from(workflow)?;

        let data_bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&serializable)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let data_size = self.append(ENTRY_WORKFLOW, &data_bytes)?;

        tracing::debug!(workflow = %workflow.id(), version = workflow.version(), bytes = data_size, "wal entry appended");
        Ok(())
    }

    pub fn append_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        let data_bytes = rkyv::to_bytes::<rkyv::rancor::Error>(checkpoint)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        self.append(ENTRY_CHECKPOINT, &data_bytes)?;

        tracing::debug!(
            workflows = checkpoint.workflow_ids.len(),
            next_sequence = checkpoint.next_sequence,
            "wal checkpoint appended"
        );
        Ok(())
    }

    fn append(&mut self, entry_type: u8, data_bytes: &[u8]) -> Result<u32, StorageError> {
        let data_size = u32::try_from(data_bytes.len()).map_err(|_| {
            StorageError::Serialization("Entry is too large for the log".to_string())
        })?;

        let entry = AppendEntry::new(entry_type, data_size, digest_bytes(data_bytes)?);

        self.file.write_all(&entry.to_bytes())?;
        self.file.write_all(data_bytes)?;
        self.file.flush()?;
        self.file.sync_data()?;

        Ok(data_size)
    }

    pub fn read_all_entries(&mut self) -> Result<Vec<(AppendEntry, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;

        loop {
            let mut header_buf = [0u8; ENTRY_HEADER_SIZE];
            match self.file.read_exact(&mut header_buf) {
                Ok(()) => {
                    let entry = AppendEntry::from_bytes(&header_buf)?;

                    if entry.magic != APPEND_MAGIC {
                        tracing::warn!(path = %self.path.display(), "stray bytes at end of wal");
                        break;
                    }

                    let mut data_buf = vec![0u8; entry.data_size as usize];
                    match self.file.read_exact(&mut data_buf) {
                        Ok(()) => {}
                        // torn final write
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            tracing::warn!(path = %self.path.display(), "truncated wal entry ignored");
                            break;
                        }
                        Err(e) => return Err(e.into()),
                    }

                    if digest_bytes(&data_buf)? != entry.checksum {
                        return Err(StorageError::ChecksumMismatch);
                    }

                    entries.push((entry, data_buf));
                }
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(entries)
    }

    pub fn truncate(&mut self) -> Result<(), StorageError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

/// Decodes a workflow snapshot written by [`AppendLog::append_workflow`].
pub fn decode_workflow(data: &[u8]) -> Result<WorkflowRecord, StorageError> {
    let ser: SerializableWorkflow = decode(data, "Failed to decode wal workflow")?;
    WorkflowRecord::try_from(ser)
}

/// Decodes a record written by [`AppendLog::append_checkpoint`].
pub fn decode_checkpoint(data: &[u8]) -> Result<Checkpoint, StorageError> {
    decode(data, "Failed to decode wal checkpoint")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]
    #![allow(clippy::panic)]

    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::core::record::{NewWorkflow, WorkflowId};

    fn db_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("signoff.db")
    }

    fn workflow(id: u64, name: &str) -> WorkflowRecord {
        let payload = NewWorkflow::new(name).with_field("company_name", json!(name));
        WorkflowRecord::new(WorkflowId(id), payload, 100).unwrap()
    }

    #[test]
    fn test_entry_serialization() {
        let entry = AppendEntry::new(ENTRY_WORKFLOW, 100, [7u8; 32]);

        let bytes = entry.to_bytes();
        let entry2 = AppendEntry::from_bytes(&bytes).unwrap();

        assert_eq!(entry.magic, entry2.magic);
        assert_eq!(entry.entry_type, entry2.entry_type);
        assert_eq!(entry.timestamp, entry2.timestamp);
        assert_eq!(entry.data_size, entry2.data_size);
        assert_eq!(entry.checksum, entry2.checksum);
    }

    #[test]
    fn test_append_and_decode() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AppendLog::new(db_path(&dir)).unwrap();
        let wf = workflow(1, "Acme Water");

        log.append_workflow(&wf).unwrap();

        let entries = log.read_all_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.entry_type, ENTRY_WORKFLOW);
        assert_eq!(decode_workflow(&entries[0].1).unwrap(), wf);
    }

    #[test]
    fn test_append_multiple_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AppendLog::new(db_path(&dir)).unwrap();

        for i in 1..=3 {
            log.append_workflow(&workflow(i, &format!("Biller {}", i))).unwrap();
        }

        let entries = log.read_all_entries().unwrap();
        assert_eq!(entries.len(), 3);
        for (i, (entry, data)) in entries.iter().enumerate() {
            assert_eq!(decode_workflow(data).unwrap().id(), WorkflowId(i as u64 + 1));
            if i > 0 {
                assert!(entry.timestamp >= entries[i - 1].0.timestamp);
            }
        }
    }

    #[test]
    fn test_checkpoint_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AppendLog::new(db_path(&dir)).unwrap();
        let checkpoint = Checkpoint {
            next_sequence: 4,
            workflow_ids: vec![1, 3],
        };

        log.append_checkpoint(&checkpoint).unwrap();
        log.append_workflow(&workflow(4, "Delta")).unwrap();

        let entries = log.read_all_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.entry_type, ENTRY_CHECKPOINT);
        assert_eq!(decode_checkpoint(&entries[0].1).unwrap(), checkpoint);
        assert_eq!(entries[1].0.entry_type, ENTRY_WORKFLOW);
    }

    #[test]
    fn test_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AppendLog::new(db_path(&dir)).unwrap();

        log.append_workflow(&workflow(1, "Acme")).unwrap();
        assert_eq!(log.read_all_entries().unwrap().len(), 1);

        log.truncate().unwrap();
        assert!(log.read_all_entries().unwrap().is_empty());

        log.append_workflow(&workflow(2, "Bolt")).unwrap();
        assert_eq!(log.read_all_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut log = AppendLog::new(db_path(&dir)).unwrap();
            log.append_workflow(&workflow(1, "Acme")).unwrap();
        }

        let mut log = AppendLog::new(db_path(&dir)).unwrap();
        assert_eq!(log.read_all_entries().unwrap().len(), 1);
        assert!(log.path().ends_with("signoff.wal"));
    }

    #[test]
    fn test_checksum_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        {
            let mut log = AppendLog::new(&path).unwrap();
            log.append_workflow(&workflow(1, "Acme")).unwrap();
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(AppendLog::path_for(&path))
            .unwrap();

        let mut header = [0u8; ENTRY_HEADER_SIZE];
        file.read_exact(&mut header).unwrap();
        header[17] = header[17].wrapping_add(1);
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&header).unwrap();
        file.flush().unwrap();

        let mut log = AppendLog::new(&path).unwrap();
        match log.read_all_entries() {
            Err(StorageError::ChecksumMismatch) => {}
            other => panic!("Expected ChecksumMismatch, got {:?}", other.map(|e| e.len())),
        }
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = db_path(&dir);

        {
            let mut log = AppendLog::new(&path).unwrap();
            log.append_workflow(&workflow(1, "Acme")).unwrap();
            log.append_workflow(&workflow(2, "Bolt")).unwrap();
        }

        let wal = AppendLog::path_for(&path);
        let len = std::fs::metadata(&wal).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&wal)
            .unwrap()
            .set_len(len - 5)
            .unwrap();

        let mut log = AppendLog::new(&path).unwrap();
        assert_eq!(log.read_all_entries().unwrap().len(), 1);
    }
}
