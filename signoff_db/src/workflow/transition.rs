use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::ledger::SignoffStatus;
use crate::core::user::Team;
use crate::error::SignoffError;
use crate::workflow::definition::{PREPROD_FINANCE_STEP, PREPROD_INTEGRATION_STEP, PREPROD_QA_STEP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_status(&self) -> SignoffStatus {
        match self {
            Decision::Approved => SignoffStatus::Approved,
            Decision::Rejected => SignoffStatus::Rejected,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_status(), f)
    }
}

impl FromStr for Decision {
    type Err = SignoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Ok(Decision::Approved),
            "rejected" | "reject" => Ok(Decision::Rejected),
            other => Err(SignoffError::Validation(format!(
                "Unknown decision '{}' (expected approved or rejected)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignoffRequest {
    pub step_number: u8,
    pub acting_team: Team,
    pub decision: Decision,
    pub person: String,
    #[serde(default)]
    pub remarks: Option<String>,
    /// When set, the sign-off only applies to this exact workflow version.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl SignoffRequest {
    pub fn new(step_number: u8, acting_team: Team, decision: Decision, person: &str) -> Self {
        Self {
            step_number,
            acting_team,
            decision,
            person: person.to_owned(),
            remarks: None,
            expected_version: None,
        }
    }

    pub fn approve(step_number: u8, acting_team: Team, person: &str) -> Self {
        Self::new(step_number, acting_team, Decision::Approved, person)
    }

    pub fn reject(step_number: u8, acting_team: Team, person: &str) -> Self {
        Self::new(step_number, acting_team, Decision::Rejected, person)
    }

    pub fn with_remarks(mut self, remarks: &str) -> Self {
        self.remarks = Some(remarks.to_owned());
        self
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// What a rejection does to the pipeline position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    /// The rejected step stays current and `Rejected` until resubmitted.
    #[default]
    Stall,
    /// Rejections at steps 2, 5 and 6 send the workflow back to an earlier
    /// step; other steps stall.
    Restart,
}

impl RejectionPolicy {
    pub fn restart_step(&self, rejected_step: u8) -> Option<u8> {
        match self {
            RejectionPolicy::Stall => None,
            RejectionPolicy::Restart => match rejected_step {
                2 => Some(1),
                PREPROD_QA_STEP | PREPROD_FINANCE_STEP => Some(PREPROD_INTEGRATION_STEP),
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rejection_policy: RejectionPolicy,
    /// Approving step 4 or rejecting step 6 needs an attachment on file.
    #[serde(default)]
    pub require_gl_detail: bool,
}
