use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha256::digest;

use crate::error::{Result, SignoffError};

pub const GENESIS_HASH: &str = "00000000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old_value: Value,
    pub new_value: Value,
}

pub type Changes = BTreeMap<String, FieldChange>;

/// An immutable audit record of one accepted edit. Entries are chained by
/// hash so a rewritten entry breaks every hash after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeHistoryEntry {
    pub sequence: u64,
    pub edited_by: String,
    pub edited_at: u64,
    pub changes: Changes,
    pub prev_hash: String,
    pub entry_hash: String,
}

impl ChangeHistoryEntry {
    pub fn new(
        sequence: u64,
        edited_by: &str,
        edited_at: u64,
        changes: Changes,
        prev_hash: &str,
    ) -> Result<Self> {
        let entry_hash = Self::compute_hash(sequence, edited_by, edited_at, &changes, prev_hash)?;

        Ok(Self {
            sequence,
            edited_by: edited_by.to_owned(),
            edited_at,
            changes,
            prev_hash: prev_hash.to_owned(),
            entry_hash,
        })
    }

    fn compute_hash(
        sequence: u64,
        edited_by: &str,
        edited_at: u64,
        changes: &Changes,
        prev_hash: &str,
    ) -> Result<String> {
        // BTreeMap keys serialize in order, so this is canonical
        let changes_json = serde_json::to_string(changes)
            .map_err(|e| SignoffError::Validation(format!("Unserializable change set: {}", e)))?;
        let changes_hash = digest(changes_json);

        let material = format!(
            "{} {} {} {} {}",
            sequence, prev_hash, edited_by, edited_at, changes_hash
        );

        Ok(digest(material))
    }

    pub fn recompute_hash(&self) -> Result<String> {
        Self::compute_hash(
            self.sequence,
            &self.edited_by,
            self.edited_at,
            &self.changes,
            &self.prev_hash,
        )
    }
}

/// Appends a new entry to `history`, linking it to the last one.
pub fn append_entry(
    history: &mut Vec<ChangeHistoryEntry>,
    edited_by: &str,
    edited_at: u64,
    changes: Changes,
) -> Result<ChangeHistoryEntry> {
    let prev_hash = history
        .last()
        .map(|e| e.entry_hash.clone())
        .unwrap_or_else(|| GENESIS_HASH.to_string());

    let entry = ChangeHistoryEntry::new(
        history.len() as u64,
        edited_by,
        edited_at,
        changes,
        &prev_hash,
    )?;
    history.push(entry.clone());

    Ok(entry)
}

pub fn verify_history(history: &[ChangeHistoryEntry]) -> Result<()> {
    let mut expected_prev = GENESIS_HASH.to_string();

    for (position, entry) in history.iter().enumerate() {
        if entry.sequence != position as u64 {
            return Err(SignoffError::Validation(format!(
                "History entry {} is out of sequence (found {})",
                position, entry.sequence
            )));
        }

        if entry.prev_hash != expected_prev {
            return Err(SignoffError::Validation(format!(
                "History entry {} does not link to its predecessor",
                position
            )));
        }

        if entry.recompute_hash()? != entry.entry_hash {
            return Err(SignoffError::Validation(format!(
                "History entry {} has been tampered with",
                position
            )));
        }

        expected_prev = entry.entry_hash.clone();
    }

    Ok(())
}
