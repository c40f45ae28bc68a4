use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::core::record::{WorkflowId, WorkflowRecord};
use crate::error::{Result, SignoffError};

pub type WorkflowHandle = Arc<Mutex<WorkflowRecord>>;

/// In-memory registry of live workflows.
///
/// Each workflow sits behind its own lock so mutations on one workflow
/// serialize while different workflows proceed in parallel.
pub struct Tracker {
    workflows: DashMap<WorkflowId, WorkflowHandle>,
    sequence: AtomicU64,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
            sequence: AtomicU64::new(1),
        }
    }

    /// Rebuilds a tracker from persisted records. The sequence never hands
    /// out an id that is already taken.
    pub fn from_records(records: Vec<WorkflowRecord>, next_sequence: u64) -> Self {
        let highest = records.iter().map(|wf| wf.id().0).max().unwrap_or(0);
        let tracker = Self {
            workflows: DashMap::new(),
            sequence: AtomicU64::new(next_sequence.max(highest + 1).max(1)),
        };

        for wf in records {
            tracker.insert(wf);
        }
        tracker
    }

    pub fn next_id(&self) -> WorkflowId {
        WorkflowId(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn insert(&self, workflow: WorkflowRecord) {
        self.workflows
            .insert(workflow.id(), Arc::new(Mutex::new(workflow)));
    }

    pub fn handle(&self, id: WorkflowId) -> Result<WorkflowHandle> {
        self.workflows
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SignoffError::NotFound(id.title()))
    }

    pub fn snapshot(&self, id: WorkflowId) -> Result<WorkflowRecord> {
        Ok(self.handle(id)?.lock().clone())
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Copies of every workflow, ordered by id.
    pub fn all(&self) -> Vec<WorkflowRecord> {
        // collect handles first so no shard guard is held while locking
        let handles: Vec<WorkflowHandle> = self
            .workflows
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut records: Vec<WorkflowRecord> =
            handles.iter().map(|handle| handle.lock().clone()).collect();
        records.sort_by_key(|wf| wf.id());
        records
    }
}
