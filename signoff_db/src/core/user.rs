use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SignoffError;

/// Team capability an identity acts with. Authentication happens elsewhere;
/// the core only trusts the team it is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    #[serde(rename = "Business Team")]
    BusinessTeam,
    Integration,
    #[serde(rename = "QA")]
    Qa,
    Finance,
}

impl Team {
    pub const ALL: [Team; 4] = [Team::BusinessTeam, Team::Integration, Team::Qa, Team::Finance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Team::BusinessTeam => "Business Team",
            Team::Integration => "Integration",
            Team::Qa => "QA",
            Team::Finance => "Finance",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Team {
    type Err = SignoffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Team::ALL
            .into_iter()
            .find(|team| team.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SignoffError::Validation(format!("Unknown team '{}'", wanted)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub team: Team,
}

impl Identity {
    pub fn new(username: &str, team: Team) -> Self {
        Identity {
            username: username.to_owned(),
            team,
        }
    }
}
