use crate::core::record::WorkflowRecord;
use crate::core::user::Team;
use crate::error::{Result, SignoffError};
use crate::workflow::definition::{
    self, CONTRACT_NEGOTIATION_STEP, PREPROD_FINANCE_STEP, PREPROD_INTEGRATION_STEP,
};

/// Every team/step permission in the system is decided here.
#[derive(Debug, Clone, Copy)]
pub enum Validator {
    /// Sign-off is reserved to the step's approving team.
    ApprovingTeam { step_number: u8 },
    /// Business fields are editable by the Business Team during Contract
    /// Negotiation, and never otherwise.
    ContractNegotiationEdit { current_step: u8 },
    /// GL detail uploads: Integration at step 4, Finance at step 6.
    GlDetailUpload { current_step: u8 },
    /// A stalled rejection may be re-opened by either side of the hand-off.
    Resubmission { step_number: u8 },
}

impl Validator {
    pub fn allows(&self, team: Team) -> bool {
        match *self {
            Validator::ApprovingTeam { step_number } => {
                definition::approving_team(step_number).is_ok_and(|t| t == team)
            }
            Validator::ContractNegotiationEdit { current_step } => {
                team == Team::BusinessTeam && current_step == CONTRACT_NEGOTIATION_STEP
            }
            Validator::GlDetailUpload { current_step } => {
                (current_step == PREPROD_INTEGRATION_STEP && team == Team::Integration)
                    || (current_step == PREPROD_FINANCE_STEP && team == Team::Finance)
            }
            Validator::Resubmission { step_number } => definition::definition(step_number)
                .is_ok_and(|d| d.approving_team == team || d.predecessor_team == team),
        }
    }

    pub fn validate(&self, team: Team) -> Result<()> {
        if self.allows(team) {
            Ok(())
        } else {
            Err(SignoffError::forbidden(team, self.describe()))
        }
    }

    fn describe(&self) -> String {
        match *self {
            Validator::ApprovingTeam { step_number } => format!(
                "sign off step {} ({})",
                step_number,
                definition::display_label(step_number)
            ),
            Validator::ContractNegotiationEdit { current_step } => format!(
                "edit a workflow at step {} ({})",
                current_step,
                definition::display_label(current_step)
            ),
            Validator::GlDetailUpload { current_step } => {
                format!("upload attachments at step {}", current_step)
            }
            Validator::Resubmission { step_number } => {
                format!("resubmit step {}", step_number)
            }
        }
    }
}

pub fn can_signoff(team: Team, step_number: u8) -> bool {
    Validator::ApprovingTeam { step_number }.allows(team)
}

pub fn can_edit(team: Team, workflow: &WorkflowRecord) -> bool {
    Validator::ContractNegotiationEdit {
        current_step: workflow.current_step(),
    }
    .allows(team)
}

pub fn can_upload(team: Team, workflow: &WorkflowRecord) -> bool {
    Validator::GlDetailUpload {
        current_step: workflow.current_step(),
    }
    .allows(team)
}

pub fn can_resubmit(team: Team, step_number: u8) -> bool {
    Validator::Resubmission { step_number }.allows(team)
}
