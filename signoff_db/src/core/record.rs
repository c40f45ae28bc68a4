use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::attachment::AttachmentRef;
use crate::core::history::ChangeHistoryEntry;
use crate::core::ledger::{RejectionRecord, StepLedger};
use crate::error::{Result, SignoffError};
use crate::workflow::definition::FIRST_STEP;

pub type BusinessFields = BTreeMap<String, Value>;

pub const BILLER_NAME_FIELD: &str = "biller_integration_name";

/// Record-level names that can never appear among the business fields.
pub const RESERVED_FIELDS: [&str; 13] = [
    "id",
    "title",
    "current_step",
    "status",
    "steps",
    "ledger",
    "history",
    "version",
    "submit_date",
    "last_updated_by",
    "last_updated_date",
    "rejections",
    "attachments",
];

pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub u64);

impl WorkflowId {
    pub fn title(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WF{:05}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = SignoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("WF")
            .or_else(|| trimmed.strip_prefix("wf"))
            .unwrap_or(trimmed);

        match digits.parse::<u64>() {
            Ok(n) if n > 0 => Ok(WorkflowId(n)),
            _ => Err(SignoffError::Validation(format!(
                "'{}' is not a workflow id (expected WF00001 or 1)",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    InProgress,
    Done,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::InProgress => f.write_str("In Progress"),
            WorkflowStatus::Done => f.write_str("Done"),
        }
    }
}

/// A custom or report field declared on the creation form. Stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    pub name: String,
    pub field_type: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Creation payload. Unknown keys land in `fields`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflow {
    pub biller_integration_name: String,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
    #[serde(default)]
    pub report_fields: Vec<CustomField>,
    #[serde(flatten)]
    pub fields: BusinessFields,
}

impl NewWorkflow {
    pub fn new(biller_integration_name: &str) -> Self {
        Self {
            biller_integration_name: biller_integration_name.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_owned(), value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub(crate) id: WorkflowId,
    pub(crate) title: String,
    pub fields: BusinessFields,
    pub custom_fields: Vec<CustomField>,
    pub report_fields: Vec<CustomField>,
    pub requested_by: Option<String>,
    pub(crate) last_updated_by: Option<String>,
    pub(crate) submit_date: u64,
    pub(crate) last_updated_date: u64,
    pub(crate) current_step: u8,
    pub(crate) status: WorkflowStatus,
    pub(crate) ledger: StepLedger,
    pub(crate) history: Vec<ChangeHistoryEntry>,
    pub(crate) rejections: Vec<RejectionRecord>,
    pub(crate) attachments: Vec<AttachmentRef>,
    pub(crate) version: u64,
}

impl WorkflowRecord {
    pub fn new(id: WorkflowId, payload: NewWorkflow, now: u64) -> Result<Self> {
        let biller_name = payload.biller_integration_name.trim();
        if biller_name.is_empty() {
            return Err(SignoffError::Validation(
                "biller_integration_name cannot be empty".to_string(),
            ));
        }

        let mut fields: BusinessFields = payload
            .fields
            .into_iter()
            .filter(|(name, _)| {
                let keep = !is_reserved(name);
                if !keep {
                    tracing::debug!(field = %name, "dropping reserved key from creation payload");
                }
                keep
            })
            .collect();
        fields.insert(
            BILLER_NAME_FIELD.to_string(),
            Value::String(biller_name.to_owned()),
        );

        Ok(Self {
            id,
            title: id.title(),
            fields,
            custom_fields: payload.custom_fields,
            report_fields: payload.report_fields,
            requested_by: payload.requested_by,
            last_updated_by: None,
            submit_date: now,
            last_updated_date: now,
            current_step: FIRST_STEP,
            status: WorkflowStatus::InProgress,
            ledger: StepLedger::seeded(),
            history: Vec::new(),
            rejections: Vec::new(),
            attachments: Vec::new(),
            version: 1,
        })
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn biller_integration_name(&self) -> Option<&str> {
        self.fields.get(BILLER_NAME_FIELD).and_then(Value::as_str)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn current_step(&self) -> u8 {
        self.current_step
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == WorkflowStatus::Done
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    pub fn history(&self) -> &[ChangeHistoryEntry] {
        &self.history
    }

    pub fn rejections(&self) -> &[RejectionRecord] {
        &self.rejections
    }

    pub fn attachments(&self) -> &[AttachmentRef] {
        &self.attachments
    }

    pub fn last_updated_by(&self) -> Option<&str> {
        self.last_updated_by.as_deref()
    }

    pub fn submit_date(&self) -> u64 {
        self.submit_date
    }

    pub fn last_updated_date(&self) -> u64 {
        self.last_updated_date
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn touch(&mut self, now: u64) {
        self.last_updated_date = now;
        self.version += 1;
    }
}
