use serde::{Deserialize, Serialize};

use crate::core::record::{WorkflowId, WorkflowRecord, WorkflowStatus};
use crate::workflow::definition;

/// Listing row for a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub title: String,
    pub biller_integration_name: Option<String>,
    pub current_step: u8,
    pub step_label: String,
    pub team_flow: Option<String>,
    pub status: WorkflowStatus,
    pub submit_date: u64,
    pub last_updated_date: u64,
}

impl From<&WorkflowRecord> for WorkflowSummary {
    fn from(wf: &WorkflowRecord) -> Self {
        Self {
            id: wf.id(),
            title: wf.title().to_owned(),
            biller_integration_name: wf.biller_integration_name().map(str::to_owned),
            current_step: wf.current_step(),
            step_label: definition::display_label(wf.current_step()),
            team_flow: definition::team_flow(wf.current_step()).ok(),
            status: wf.status(),
            submit_date: wf.submit_date(),
            last_updated_date: wf.last_updated_date(),
        }
    }
}
