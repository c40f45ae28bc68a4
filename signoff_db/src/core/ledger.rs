use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SignoffError};
use crate::workflow::definition::{FIRST_STEP, STEP_COUNT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignoffStatus {
    Pending,
    Approved,
    Rejected,
}

impl SignoffStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, SignoffStatus::Pending)
    }
}

impl fmt::Display for SignoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignoffStatus::Pending => "Pending",
            SignoffStatus::Approved => "Approved",
            SignoffStatus::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub step_number: u8,
    pub signoff_status: SignoffStatus,
    pub signoff_person: Option<String>,
    pub signoff_date: Option<u64>,
    pub remarks: Option<String>,
}

impl LedgerEntry {
    pub fn pending(step_number: u8) -> Self {
        Self {
            step_number,
            signoff_status: SignoffStatus::Pending,
            signoff_person: None,
            signoff_date: None,
            remarks: None,
        }
    }

    pub(crate) fn decide(
        &mut self,
        status: SignoffStatus,
        person: &str,
        at: u64,
        remarks: Option<&str>,
    ) {
        self.signoff_status = status;
        self.signoff_person = Some(person.to_owned());
        self.signoff_date = Some(at);
        self.remarks = remarks.map(str::to_owned);
    }

    pub(crate) fn reset(&mut self) {
        *self = LedgerEntry::pending(self.step_number);
    }
}

/// One decision slot per pipeline step, seeded at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLedger {
    entries: Vec<LedgerEntry>,
}

impl StepLedger {
    pub fn seeded() -> Self {
        Self {
            entries: (FIRST_STEP..=STEP_COUNT).map(LedgerEntry::pending).collect(),
        }
    }

    /// Rebuilds a ledger from stored entries, insisting on exactly one entry
    /// per step in order.
    pub fn from_entries(mut entries: Vec<LedgerEntry>) -> Result<Self> {
        entries.sort_by_key(|e| e.step_number);

        let well_formed = entries.len() == usize::from(STEP_COUNT)
            && entries
                .iter()
                .zip(FIRST_STEP..=STEP_COUNT)
                .all(|(entry, n)| entry.step_number == n);

        if !well_formed {
            return Err(SignoffError::Validation(
                "Ledger must hold exactly one entry for each of steps 1-8".to_string(),
            ));
        }

        Ok(Self { entries })
    }

    pub fn entry(&self, step_number: u8) -> Result<&LedgerEntry> {
        let idx = Self::slot(step_number)?;
        self.entries
            .get(idx)
            .ok_or(SignoffError::OutOfRange(step_number))
    }

    pub(crate) fn entry_mut(&mut self, step_number: u8) -> Result<&mut LedgerEntry> {
        let idx = Self::slot(step_number)?;
        self.entries
            .get_mut(idx)
            .ok_or(SignoffError::OutOfRange(step_number))
    }

    pub fn status_of(&self, step_number: u8) -> Result<SignoffStatus> {
        Ok(self.entry(step_number)?.signoff_status)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    /// Resets every entry from `from_step` to the end of the pipeline.
    pub(crate) fn reset_from(&mut self, from_step: u8) {
        self.entries
            .iter_mut()
            .filter(|e| e.step_number >= from_step)
            .for_each(LedgerEntry::reset);
    }

    pub fn approved_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.signoff_status == SignoffStatus::Approved)
            .count()
    }

    fn slot(step_number: u8) -> Result<usize> {
        if !(FIRST_STEP..=STEP_COUNT).contains(&step_number) {
            return Err(SignoffError::OutOfRange(step_number));
        }
        Ok(usize::from(step_number - FIRST_STEP))
    }
}

impl Default for StepLedger {
    fn default() -> Self {
        Self::seeded()
    }
}

/// Permanent trace of a rejection, kept even after the ledger is reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub step_number: u8,
    pub rejected_by: String,
    pub rejected_at: u64,
    pub remarks: Option<String>,
    pub restart_step: Option<u8>,
}
