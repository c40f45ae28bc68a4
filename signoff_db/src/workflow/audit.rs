use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::core::history::{self, ChangeHistoryEntry, Changes, FieldChange};
use crate::core::record::{BILLER_NAME_FIELD, BusinessFields, WorkflowRecord, is_reserved};
use crate::core::user::Identity;
use crate::error::{Result, SignoffError};
use crate::workflow::validators::Validator;

/// Partial update of business fields. `null` clears a field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowPatch {
    pub fields: BusinessFields,
}

impl WorkflowPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: Value) -> Self {
        self.fields.insert(field.to_owned(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Field-level delta between the record and the patch; unchanged fields
/// are left out.
pub fn diff(current: &BusinessFields, patch: &WorkflowPatch) -> Changes {
    patch
        .fields
        .iter()
        .filter_map(|(name, new_value)| {
            let old_value = current.get(name).cloned().unwrap_or(Value::Null);
            (old_value != *new_value).then(|| {
                (
                    name.clone(),
                    FieldChange {
                        old_value,
                        new_value: new_value.clone(),
                    },
                )
            })
        })
        .collect()
}

/// Applies a gated edit. Returns the new record and the history entry it
/// appended; an edit that changes nothing appends no entry.
pub fn apply_edit(
    workflow: &WorkflowRecord,
    patch: &WorkflowPatch,
    editor: &Identity,
    now: u64,
) -> Result<(WorkflowRecord, Option<ChangeHistoryEntry>)> {
    Validator::ContractNegotiationEdit {
        current_step: workflow.current_step(),
    }
    .validate(editor.team)?;

    if editor.username.trim().is_empty() {
        return Err(SignoffError::Validation(
            "Editor username cannot be empty".to_string(),
        ));
    }

    if let Some(reserved) = patch.fields.keys().find(|k| is_reserved(k)) {
        return Err(SignoffError::Validation(format!(
            "Field '{}' cannot be changed by an edit",
            reserved
        )));
    }

    if let Some(name) = patch.fields.get(BILLER_NAME_FIELD) {
        if name.as_str().is_none_or(|s| s.trim().is_empty()) {
            return Err(SignoffError::Validation(format!(
                "{} cannot be empty",
                BILLER_NAME_FIELD
            )));
        }
    }

    let changes = diff(&workflow.fields, patch);

    let mut next = workflow.clone();
    for (name, change) in &changes {
        if change.new_value.is_null() {
            next.fields.remove(name);
        } else {
            next.fields.insert(name.clone(), change.new_value.clone());
        }
    }
    next.last_updated_by = Some(editor.username.clone());

    let entry = if changes.is_empty() {
        None
    } else {
        let changed = changes.len();
        let entry = history::append_entry(&mut next.history, &editor.username, now, changes)?;
        info!(
            workflow = %next.id,
            editor = %editor.username,
            changed,
            "workflow fields updated"
        );
        Some(entry)
    };

    next.touch(now);
    Ok((next, entry))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::indexing_slicing)]

    use serde_json::json;

    use super::*;
    use crate::core::record::{NewWorkflow, WorkflowId};
    use crate::core::user::Team;
    use crate::error::ErrorKind;

    fn at_contract_negotiation() -> WorkflowRecord {
        let payload = NewWorkflow::new("Acme Water").with_field("company_name", json!("A"));
        let mut wf = WorkflowRecord::new(WorkflowId(1), payload, 0).unwrap();
        wf.current_step = 3;
        wf
    }

    fn business(name: &str) -> Identity {
        Identity::new(name, Team::BusinessTeam)
    }

    #[test]
    fn test_single_field_change_is_recorded() {
        let wf = at_contract_negotiation();
        let patch = WorkflowPatch::new().set("company_name", json!("B"));

        let (next, entry) = apply_edit(&wf, &patch, &business("bea"), 500).unwrap();
        let entry = entry.unwrap();

        assert_eq!(entry.changes.len(), 1);
        assert_eq!(
            entry.changes["company_name"],
            FieldChange {
                old_value: json!("A"),
                new_value: json!("B")
            }
        );
        assert_eq!(entry.edited_by, "bea");
        assert_eq!(entry.edited_at, 500);
        assert_eq!(next.history().len(), 1);
        assert_eq!(next.field("company_name"), Some(&json!("B")));
        assert_eq!(next.last_updated_by(), Some("bea"));
    }

    #[test]
    fn test_biller_name_cannot_be_cleared() {
        let wf = at_contract_negotiation();

        for value in [Value::Null, json!(""), json!("   "), json!(42)] {
            let patch = WorkflowPatch::new().set(BILLER_NAME_FIELD, value);
            let err = apply_edit(&wf, &patch, &business("bea"), 0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }

        let patch = WorkflowPatch::new().set(BILLER_NAME_FIELD, json!("Acme Power"));
        let (next, _) = apply_edit(&wf, &patch, &business("bea"), 0).unwrap();
        assert_eq!(next.biller_integration_name(), Some("Acme Power"));
    }

    #[test]
    fn test_unchanged_fields_are_omitted() {
        let wf = at_contract_negotiation();
        let patch = WorkflowPatch::new()
            .set("company_name", json!("A"))
            .set("mdr_fee", json!(1.75));

        let (_, entry) = apply_edit(&wf, &patch, &business("bea"), 0).unwrap();
        let entry = entry.unwrap();

        assert_eq!(entry.changes.len(), 1);
        assert_eq!(entry.changes["mdr_fee"].old_value, Value::Null);
    }

    #[test]
    fn test_no_op_edit_appends_nothing_but_stamps_editor() {
        let wf = at_contract_negotiation();
        let patch = WorkflowPatch::new().set("company_name", json!("A"));

        let (next, entry) = apply_edit(&wf, &patch, &business("carl"), 0).unwrap();

        assert!(entry.is_none());
        assert!(next.history().is_empty());
        assert_eq!(next.last_updated_by(), Some("carl"));
    }

    #[test]
    fn test_edits_outside_contract_negotiation_are_forbidden() {
        let mut wf = at_contract_negotiation();
        let patch = WorkflowPatch::new().set("company_name", json!("B"));

        for step in [1, 2, 4, 8] {
            wf.current_step = step;
            let err = apply_edit(&wf, &patch, &business("bea"), 0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
        }

        wf.current_step = 3;
        let err = apply_edit(&wf, &patch, &Identity::new("ivan", Team::Integration), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(wf.history().is_empty());
    }

    #[test]
    fn test_reserved_fields_cannot_be_patched() {
        let wf = at_contract_negotiation();
        let patch = WorkflowPatch::new().set("current_step", json!(8));

        let err = apply_edit(&wf, &patch, &business("bea"), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_null_clears_field_and_keeps_position() {
        let wf = at_contract_negotiation();
        let patch = WorkflowPatch::new().set("company_name", Value::Null);

        let (next, entry) = apply_edit(&wf, &patch, &business("bea"), 0).unwrap();

        assert!(next.field("company_name").is_none());
        assert_eq!(entry.unwrap().changes["company_name"].new_value, Value::Null);
        assert_eq!(next.current_step(), 3);
        assert_eq!(next.title(), wf.title());
        assert_eq!(next.ledger(), wf.ledger());
    }

    #[test]
    fn test_successive_edits_chain() {
        let wf = at_contract_negotiation();
        let (wf, _) = apply_edit(
            &wf,
            &WorkflowPatch::new().set("company_name", json!("B")),
            &business("bea"),
            1,
        )
        .unwrap();
        let (wf, _) = apply_edit(
            &wf,
            &WorkflowPatch::new().set("company_name", json!("C")),
            &business("bea"),
            2,
        )
        .unwrap();

        assert_eq!(wf.history().len(), 2);
        assert!(history::verify_history(wf.history()).is_ok());
        assert_eq!(wf.history()[1].changes["company_name"].old_value, json!("B"));
    }
}
