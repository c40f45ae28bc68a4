use rkyv::{Archive, Deserialize, Serialize};

use crate::attachment::AttachmentRef;
use crate::core::history::ChangeHistoryEntry;
use crate::core::ledger::{LedgerEntry, RejectionRecord, SignoffStatus, StepLedger};
use crate::core::record::{WorkflowId, WorkflowRecord, WorkflowStatus};
use crate::error::StorageError;

pub const MAGIC_NUMBER: [u8; 4] = [0x53, 0x47, 0x4E, 0x46]; // "SGNF"
pub const VERSION_MAJOR: u8 = 1;
pub const VERSION_MINOR: u8 = 0;

/// magic + little-endian u32 header length
pub const PREAMBLE_SIZE: usize = 8;

#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseHeader {
    pub magic: [u8; 4],
    pub version_major: u8,
    pub version_minor: u8,

    pub workflow_count: u64,
    pub next_sequence: u64,

    pub created_timestamp: u64,
    pub last_modified: u64,

    pub body_offset: u64,
    pub footer_offset: u64,

    pub checksum: [u8; 32], // sha256 of the body bytes
}

impl DatabaseHeader {
    pub fn new(workflow_count: u64, next_sequence: u64, body_offset: u64, footer_offset: u64) -> Self {
        let now = crate::core::unix_now();

        Self {
            magic: MAGIC_NUMBER,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            workflow_count,
            next_sequence,
            created_timestamp: now,
            last_modified: now,
            body_offset,
            footer_offset,
            checksum: [0; 32],
        }
    }
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub struct SerializableLedgerEntry {
    pub step_number: u8,
    pub signoff_status: u8,
    pub signoff_person: Option<String>,
    pub signoff_date: Option<u64>,
    pub remarks: Option<String>,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub struct SerializableHistoryEntry {
    pub sequence: u64,
    pub edited_by: String,
    pub edited_at: u64,
    pub changes_json: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub struct SerializableRejection {
    pub step_number: u8,
    pub rejected_by: String,
    pub rejected_at: u64,
    pub remarks: Option<String>,
    pub restart_step: Option<u8>,
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub struct SerializableAttachment {
    pub file_name: String,
    pub stored_path: String,
    pub description: Option<String>,
    pub uploaded_by: String,
    pub uploaded_at: u64,
    pub size_bytes: u64,
}

/// Flat, archivable form of a workflow. Opaque JSON payloads travel as
/// strings.
#[derive(Archive, Serialize, Deserialize, Debug, Clone)]
pub struct SerializableWorkflow {
    pub id: u64,
    pub title: String,
    pub fields_json: String,
    pub custom_fields_json: String,
    pub report_fields_json: String,
    pub requested_by: Option<String>,
    pub last_updated_by: Option<String>,
    pub submit_date: u64,
    pub last_updated_date: u64,
    pub current_step: u8,
    pub status: u8,
    pub ledger: Vec<SerializableLedgerEntry>,
    pub history: Vec<SerializableHistoryEntry>,
    pub rejections: Vec<SerializableRejection>,
    pub attachments: Vec<SerializableAttachment>,
    pub version: u64,
}

#[derive(Archive, Serialize, Deserialize, Debug)]
pub struct DatabaseBody {
    pub workflows: Vec<SerializableWorkflow>,
    pub next_sequence: u64,
}

/// First record of a freshly compacted log: what the snapshot it follows
/// held. Lets a log-only recovery tell whether it has every workflow.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub next_sequence: u64,
    pub workflow_ids: Vec<u64>,
}

#[derive(Archive, Serialize, Deserialize, Debug)]
pub struct DatabaseFooter {
    pub integrity_hash: [u8; 32], // sha256 of everything before the footer
    pub total_file_size: u64,
}

fn status_code(status: SignoffStatus) -> u8 {
    match status {
        SignoffStatus::Pending => 0,
        SignoffStatus::Approved => 1,
        SignoffStatus::Rejected => 2,
    }
}

fn status_from_code(code: u8) -> Result<SignoffStatus, StorageError> {
    match code {
        0 => Ok(SignoffStatus::Pending),
        1 => Ok(SignoffStatus::Approved),
        2 => Ok(SignoffStatus::Rejected),
        other => Err(StorageError::Deserialization(format!(
            "Unknown sign-off status code {}",
            other
        ))),
    }
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, StorageError> {
    serde_json::to_string(value)
        .map_err(|e| StorageError::Serialization(format!("Failed to encode {}: {}", what, e)))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> Result<T, StorageError> {
    serde_json::from_str(json)
        .map_err(|e| StorageError::Deserialization(format!("Failed to decode {}: {}", what, e)))
}

impl TryFrom<&WorkflowRecord> for SerializableWorkflow {
    type Error = StorageError;

    fn try_from(wf: &WorkflowRecord) -> Result<Self, Self::Error> {
        let ledger = wf
            .ledger
            .entries()
            .map(|e| SerializableLedgerEntry {
                step_number: e.step_number,
                signoff_status: status_code(e.signoff_status),
                signoff_person: e.signoff_person.clone(),
                signoff_date: e.signoff_date,
                remarks: e.remarks.clone(),
            })
            .collect();

        let history = wf
            .history
            .iter()
            .map(|h| {
                Ok(SerializableHistoryEntry {
                    sequence: h.sequence,
                    edited_by: h.edited_by.clone(),
                    edited_at: h.edited_at,
                    changes_json: to_json(&h.changes, "history changes")?,
                    prev_hash: h.prev_hash.clone(),
                    entry_hash: h.entry_hash.clone(),
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let rejections = wf
            .rejections
            .iter()
            .map(|r| SerializableRejection {
                step_number: r.step_number,
                rejected_by: r.rejected_by.clone(),
                rejected_at: r.rejected_at,
                remarks: r.remarks.clone(),
                restart_step: r.restart_step,
            })
            .collect();

        let attachments = wf
            .attachments
            .iter()
            .map(|a| SerializableAttachment {
                file_name: a.file_name.clone(),
                stored_path: a.stored_path.clone(),
                description: a.description.clone(),
                uploaded_by: a.uploaded_by.clone(),
                uploaded_at: a.uploaded_at,
                size_bytes: a.size_bytes,
            })
            .collect();

        Ok(Self {
            id: wf.id.0,
            title: wf.title.clone(),
            fields_json: to_json(&wf.fields, "business fields")?,
            custom_fields_json: to_json(&wf.custom_fields, "custom fields")?,
            report_fields_json: to_json(&wf.report_fields, "report fields")?,
            requested_by: wf.requested_by.clone(),
            last_updated_by: wf.last_updated_by.clone(),
            submit_date: wf.submit_date,
            last_updated_date: wf.last_updated_date,
            current_step: wf.current_step,
            status: match wf.status {
                WorkflowStatus::InProgress => 0,
                WorkflowStatus::Done => 1,
            },
            ledger,
            history,
            rejections,
            attachments,
            version: wf.version,
        })
    }
}

impl TryFrom<SerializableWorkflow> for WorkflowRecord {
    type Error = StorageError;

    fn try_from(ser: SerializableWorkflow) -> Result<Self, Self::Error> {
        let entries = ser
            .ledger
            .into_iter()
            .map(|e| {
                Ok(LedgerEntry {
                    step_number: e.step_number,
                    signoff_status: status_from_code(e.signoff_status)?,
                    signoff_person: e.signoff_person,
                    signoff_date: e.signoff_date,
                    remarks: e.remarks,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let ledger = StepLedger::from_entries(entries).map_err(|e| {
            StorageError::Deserialization(format!("Workflow {}: {}", ser.title, e))
        })?;

        let history = ser
            .history
            .into_iter()
            .map(|h| {
                Ok(ChangeHistoryEntry {
                    sequence: h.sequence,
                    edited_by: h.edited_by,
                    edited_at: h.edited_at,
                    changes: from_json(&h.changes_json, "history changes")?,
                    prev_hash: h.prev_hash,
                    entry_hash: h.entry_hash,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let status = match ser.status {
            0 => WorkflowStatus::InProgress,
            1 => WorkflowStatus::Done,
            other => {
                return Err(StorageError::Deserialization(format!(
                    "Unknown workflow status code {}",
                    other
                )));
            }
        };

        Ok(WorkflowRecord {
            id: WorkflowId(ser.id),
            title: ser.title,
            fields: from_json(&ser.fields_json, "business fields")?,
            custom_fields: from_json(&ser.custom_fields_json, "custom fields")?,
            report_fields: from_json(&ser.report_fields_json, "report fields")?,
            requested_by: ser.requested_by,
            last_updated_by: ser.last_updated_by,
            submit_date: ser.submit_date,
            last_updated_date: ser.last_updated_date,
            current_step: ser.current_step,
            status,
            ledger,
            history,
            rejections: ser
                .rejections
                .into_iter()
                .map(|r| RejectionRecord {
                    step_number: r.step_number,
                    rejected_by: r.rejected_by,
                    rejected_at: r.rejected_at,
                    remarks: r.remarks,
                    restart_step: r.restart_step,
                })
                .collect(),
            attachments: ser
                .attachments
                .into_iter()
                .map(|a| AttachmentRef {
                    file_name: a.file_name,
                    stored_path: a.stored_path,
                    description: a.description,
                    uploaded_by: a.uploaded_by,
                    uploaded_at: a.uploaded_at,
                    size_bytes: a.size_bytes,
                })
                .collect(),
            version: ser.version,
        })
    }
}
