use serde::Serialize;

use crate::core::user::Team;
use crate::error::{Result, SignoffError};

pub const FIRST_STEP: u8 = 1;
pub const STEP_COUNT: u8 = 8;

/// Contract Negotiation: the only step during which business fields may change.
pub const CONTRACT_NEGOTIATION_STEP: u8 = 3;
pub const PREPROD_INTEGRATION_STEP: u8 = 4;
pub const PREPROD_QA_STEP: u8 = 5;
pub const PREPROD_FINANCE_STEP: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepDefinition {
    pub step_number: u8,
    pub label: &'static str,
    pub approving_team: Team,
    pub predecessor_team: Team,
}

impl StepDefinition {
    pub fn team_flow(&self) -> String {
        format!("{} → {}", self.predecessor_team, self.approving_team)
    }
}

const fn step(
    step_number: u8,
    label: &'static str,
    predecessor_team: Team,
    approving_team: Team,
) -> StepDefinition {
    StepDefinition {
        step_number,
        label,
        approving_team,
        predecessor_team,
    }
}

pub static STEPS: [StepDefinition; STEP_COUNT as usize] = [
    step(1, "UAT Integration Setup", Team::BusinessTeam, Team::Integration),
    step(2, "UAT Testing and Demo", Team::Integration, Team::BusinessTeam),
    step(3, "Contract Negotiation", Team::BusinessTeam, Team::BusinessTeam),
    step(4, "Pre-Production Integration Setup", Team::BusinessTeam, Team::Integration),
    step(5, "Pre-Production QA Testing", Team::Integration, Team::Qa),
    step(6, "Pre-Production Finance Verification", Team::Qa, Team::Finance),
    step(7, "Production Deployment", Team::Finance, Team::Integration),
    step(8, "Go-Live Announcement", Team::Integration, Team::BusinessTeam),
];

pub fn definition(step_number: u8) -> Result<&'static StepDefinition> {
    STEPS
        .iter()
        .find(|s| s.step_number == step_number)
        .ok_or(SignoffError::OutOfRange(step_number))
}

pub fn all() -> &'static [StepDefinition] {
    &STEPS
}

pub fn label(step_number: u8) -> Result<&'static str> {
    Ok(definition(step_number)?.label)
}

pub fn approving_team(step_number: u8) -> Result<Team> {
    Ok(definition(step_number)?.approving_team)
}

pub fn predecessor_team(step_number: u8) -> Result<Team> {
    Ok(definition(step_number)?.predecessor_team)
}

pub fn team_flow(step_number: u8) -> Result<String> {
    Ok(definition(step_number)?.team_flow())
}

/// Label for display; unknown steps render as "Step {n}".
pub fn display_label(step_number: u8) -> String {
    label(step_number)
        .map(str::to_owned)
        .unwrap_or_else(|_| format!("Step {}", step_number))
}

pub fn is_last(step_number: u8) -> bool {
    step_number == STEP_COUNT
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_table_is_ordered_and_complete() {
        let numbers: Vec<u8> = all().iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, (1..=8).collect::<Vec<u8>>());
    }

    #[test]
    fn test_approving_teams() {
        let teams: Vec<Team> = (1..=8).map(|n| approving_team(n).unwrap()).collect();
        assert_eq!(
            teams,
            vec![
                Team::Integration,
                Team::BusinessTeam,
                Team::BusinessTeam,
                Team::Integration,
                Team::Qa,
                Team::Finance,
                Team::Integration,
                Team::BusinessTeam,
            ]
        );
    }

    #[test]
    fn test_team_flow_and_labels() {
        assert_eq!(team_flow(6).unwrap(), "QA → Finance");
        assert_eq!(team_flow(1).unwrap(), "Business Team → Integration");
        assert_eq!(label(3).unwrap(), "Contract Negotiation");
        assert_eq!(predecessor_team(7).unwrap(), Team::Finance);
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(label(0), Err(SignoffError::OutOfRange(0))));
        assert!(matches!(team_flow(9), Err(SignoffError::OutOfRange(9))));
        assert_eq!(display_label(9), "Step 9");
        assert_eq!(display_label(8), "Go-Live Announcement");
    }
}
