use std::path::Path;

use tracing::{info, warn};

use crate::attachment::{AttachmentRef, AttachmentStore, AttachmentUpload};
use crate::core::history::ChangeHistoryEntry;
use crate::core::ledger::RejectionRecord;
use crate::core::record::{NewWorkflow, WorkflowId, WorkflowRecord};
use crate::core::unix_now;
use crate::core::user::{Identity, Team};
use crate::entity::{Tracker, WorkflowSummary};
use crate::error::{Result, SignoffError, StorageError};
use crate::storage::{Journal, NoopJournal, RecoveryManager, WalJournal};
use crate::workflow::{Engine, SignoffRequest, Validator, WorkflowPatch, apply_edit};

/// The external operations over a set of workflows.
///
/// Every mutation locks the workflow, computes the next record, hands it to
/// the journal and only then publishes it. A journal failure leaves the
/// previous record in place.
pub struct WorkflowService {
    tracker: Tracker,
    engine: Engine,
    journal: Box<dyn Journal>,
    attachments: Option<Box<dyn AttachmentStore>>,
}

impl WorkflowService {
    pub fn new(tracker: Tracker, engine: Engine, journal: Box<dyn Journal>) -> Self {
        Self {
            tracker,
            engine,
            journal,
            attachments: None,
        }
    }

    pub fn in_memory(engine: Engine) -> Self {
        Self::new(Tracker::new(), engine, Box::new(NoopJournal))
    }

    /// Recovers the database at `db_path` and journals to its WAL.
    pub fn open<P: AsRef<Path>>(db_path: P, engine: Engine) -> Result<Self> {
        let state = RecoveryManager::recover(&db_path)?;
        let tracker = Tracker::from_records(state.workflows, state.next_sequence);
        let journal = WalJournal::open(&db_path)?;
        Ok(Self::new(tracker, engine, Box::new(journal)))
    }

    pub fn with_attachment_store(mut self, store: Box<dyn AttachmentStore>) -> Self {
        self.attachments = Some(store);
        self
    }

    /// Lock, compute, persist, swap.
    fn mutate<T>(
        &self,
        id: WorkflowId,
        compute: impl FnOnce(&WorkflowRecord) -> Result<(WorkflowRecord, T)>,
    ) -> Result<(WorkflowRecord, T)> {
        let handle = self.tracker.handle(id)?;
        let mut current = handle.lock();

        let (next, extra) = compute(&current)?;
        self.journal.persist(&next)?;
        *current = next.clone();

        Ok((next, extra))
    }

    pub fn create(&self, payload: NewWorkflow) -> Result<WorkflowRecord> {
        if payload.biller_integration_name.trim().is_empty() {
            return Err(SignoffError::Validation(
                "Biller integration name cannot be empty".to_string(),
            ));
        }

        let id = self.tracker.next_id();
        let workflow = WorkflowRecord::new(id, payload, unix_now())?;

        self.journal.persist(&workflow)?;
        self.tracker.insert(workflow.clone());

        info!(
            workflow = %id,
            biller = workflow.biller_integration_name().unwrap_or_default(),
            "workflow created"
        );
        Ok(workflow)
    }

    /// Creates the workflow, then uploads each file. Failed uploads are
    /// logged and skipped.
    pub fn create_with_attachments(
        &self,
        payload: NewWorkflow,
        uploads: Vec<AttachmentUpload>,
    ) -> Result<WorkflowRecord> {
        let mut workflow = self.create(payload)?;

        for upload in uploads {
            match self.add_attachment(workflow.id(), &upload) {
                Ok((next, _)) => workflow = next,
                Err(e) => warn!(
                    workflow = %workflow.id(),
                    file = %upload.file_name,
                    error = %e,
                    "attachment upload failed during creation"
                ),
            }
        }

        Ok(workflow)
    }

    pub fn get(&self, id: WorkflowId) -> Result<WorkflowRecord> {
        self.tracker.snapshot(id)
    }

    pub fn list(&self) -> Vec<WorkflowSummary> {
        self.tracker
            .all()
            .iter()
            .map(WorkflowSummary::from)
            .collect()
    }

    pub fn update(
        &self,
        id: WorkflowId,
        patch: &WorkflowPatch,
        editor: &Identity,
    ) -> Result<WorkflowRecord> {
        let (workflow, _) = self.mutate(id, |wf| apply_edit(wf, patch, editor, unix_now()))?;
        Ok(workflow)
    }

    pub fn signoff(&self, id: WorkflowId, request: &SignoffRequest) -> Result<WorkflowRecord> {
        let (workflow, ()) = self.mutate(id, |wf| {
            Ok((self.engine.record_signoff(wf, request, unix_now())?, ()))
        })?;
        Ok(workflow)
    }

    pub fn resubmit(&self, id: WorkflowId, step_number: u8, team: Team) -> Result<WorkflowRecord> {
        let (workflow, ()) = self.mutate(id, |wf| {
            Ok((self.engine.resubmit(wf, step_number, team, unix_now())?, ()))
        })?;
        Ok(workflow)
    }

    /// Change history, oldest first.
    pub fn history(&self, id: WorkflowId) -> Result<Vec<ChangeHistoryEntry>> {
        Ok(self.tracker.snapshot(id)?.history().to_vec())
    }

    pub fn rejections(&self, id: WorkflowId) -> Result<Vec<RejectionRecord>> {
        Ok(self.tracker.snapshot(id)?.rejections().to_vec())
    }

    /// GL-detail upload by a team allowed to upload at the current step.
    pub fn attach(
        &self,
        id: WorkflowId,
        upload: &AttachmentUpload,
        uploader: &Identity,
    ) -> Result<AttachmentRef> {
        if uploader.username.trim().is_empty() {
            return Err(SignoffError::Validation(
                "Uploader username cannot be empty".to_string(),
            ));
        }

        let mut upload = upload.clone();
        upload.uploaded_by = uploader.username.clone();
        let (_, stored) = self.publish_attachment(id, &upload, Some(uploader.team))?;

        info!(workflow = %id, file = %stored.file_name, team = %uploader.team, "attachment added");
        Ok(stored)
    }

    pub fn read_attachment(&self, id: WorkflowId, file_name: &str) -> Result<Vec<u8>> {
        let workflow = self.tracker.snapshot(id)?;
        let attachment = workflow
            .attachments()
            .iter()
            .find(|a| a.file_name == file_name)
            .ok_or_else(|| {
                SignoffError::NotFound(format!("{} attachment '{}'", id, file_name))
            })?;

        Ok(self.store()?.read(attachment)?)
    }

    /// Folds the WAL into a fresh snapshot. Runs under the journal, so
    /// mutations saved meanwhile are either in the snapshot or after it.
    pub fn compact(&self) -> Result<()> {
        self.journal.compact(self.tracker.next_sequence())?;
        Ok(())
    }

    fn add_attachment(
        &self,
        id: WorkflowId,
        upload: &AttachmentUpload,
    ) -> Result<(WorkflowRecord, AttachmentRef)> {
        self.publish_attachment(id, upload, None)
    }

    fn store(&self) -> Result<&dyn AttachmentStore> {
        self.attachments.as_deref().ok_or_else(|| {
            SignoffError::Storage(StorageError::Attachment(
                "No attachment store configured".to_string(),
            ))
        })
    }

    /// Same locking as `mutate`, with the bytes written to a path of their
    /// own first. The file a same-name upload replaces is removed only once
    /// the new record is durable; a failed persist removes the new file.
    fn publish_attachment(
        &self,
        id: WorkflowId,
        upload: &AttachmentUpload,
        gate: Option<Team>,
    ) -> Result<(WorkflowRecord, AttachmentRef)> {
        let handle = self.tracker.handle(id)?;
        let mut current = handle.lock();

        if let Some(team) = gate {
            Validator::GlDetailUpload {
                current_step: current.current_step(),
            }
            .validate(team)?;
        }

        let store = self.store()?;
        let now = unix_now();
        let stored = store.store(id, current.version() + 1, upload, now)?;

        let mut next = current.clone();
        // same name replaces the earlier upload
        let replaced = next
            .attachments
            .iter()
            .position(|a| a.file_name == stored.file_name)
            .map(|i| next.attachments.remove(i));
        next.attachments.push(stored.clone());
        next.touch(now);

        if let Err(e) = self.journal.persist(&next) {
            discard(store, &stored);
            return Err(e.into());
        }
        *current = next.clone();
        drop(current);

        if let Some(old) = replaced {
            discard(store, &old);
        }
        Ok((next, stored))
    }
}

fn discard(store: &dyn AttachmentStore, attachment: &AttachmentRef) {
    if let Err(e) = store.remove(attachment) {
        warn!(file = %attachment.stored_path, error = %e, "attachment file left behind");
    }
}
