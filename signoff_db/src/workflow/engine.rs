use tracing::info;

use crate::core::ledger::{RejectionRecord, SignoffStatus};
use crate::core::record::{WorkflowRecord, WorkflowStatus};
use crate::core::user::Team;
use crate::error::{Result, SignoffError};
use crate::workflow::definition::{
    self, FIRST_STEP, PREPROD_FINANCE_STEP, PREPROD_INTEGRATION_STEP, STEP_COUNT,
};
use crate::workflow::transition::{Decision, EngineConfig, SignoffRequest};
use crate::workflow::validators::Validator;

/// Decides and applies sign-off transitions. Every operation takes the
/// current record by reference and returns the next one, so a failed check
/// never leaves a half-applied record behind.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn record_signoff(
        &self,
        workflow: &WorkflowRecord,
        request: &SignoffRequest,
        now: u64,
    ) -> Result<WorkflowRecord> {
        let step = request.step_number;
        definition::definition(step)?;

        if let Some(expected) = request.expected_version {
            if expected != workflow.version {
                return Err(SignoffError::Conflict {
                    expected,
                    actual: workflow.version,
                });
            }
        }

        if request.person.trim().is_empty() {
            return Err(SignoffError::Validation(
                "Sign-off person cannot be empty".to_string(),
            ));
        }

        let entry_status = workflow.ledger.status_of(step)?;

        // a past step (or a finished workflow) was decided by someone else first
        if workflow.is_done() || (!entry_status.is_pending() && step != workflow.current_step) {
            return Err(SignoffError::AlreadyDecided {
                step,
                status: entry_status,
            });
        }

        if step != workflow.current_step {
            return Err(SignoffError::InvalidStep {
                requested: step,
                current: workflow.current_step,
            });
        }

        Validator::ApprovingTeam { step_number: step }.validate(request.acting_team)?;

        if !entry_status.is_pending() {
            return Err(SignoffError::AlreadyDecided {
                step,
                status: entry_status,
            });
        }

        if self.needs_gl_detail(step, request.decision) && workflow.attachments.is_empty() {
            return Err(SignoffError::MissingAttachment(step));
        }

        let mut next = workflow.clone();
        match request.decision {
            Decision::Approved => Self::approve(&mut next, request, now)?,
            Decision::Rejected => self.reject(&mut next, request, now)?,
        }
        next.touch(now);

        info!(
            workflow = %next.id,
            step,
            team = %request.acting_team,
            decision = %request.decision,
            current_step = next.current_step,
            status = %next.status,
            "sign-off recorded"
        );

        Ok(next)
    }

    /// Re-opens a stalled, rejected current step so its approving team can
    /// sign it off again.
    pub fn resubmit(
        &self,
        workflow: &WorkflowRecord,
        step: u8,
        team: Team,
        now: u64,
    ) -> Result<WorkflowRecord> {
        definition::definition(step)?;

        if step != workflow.current_step {
            return Err(SignoffError::InvalidStep {
                requested: step,
                current: workflow.current_step,
            });
        }

        Validator::Resubmission { step_number: step }.validate(team)?;

        match workflow.ledger.status_of(step)? {
            SignoffStatus::Rejected => {}
            SignoffStatus::Pending => {
                return Err(SignoffError::Validation(format!(
                    "Step {} is not rejected; nothing to resubmit",
                    step
                )));
            }
            status @ SignoffStatus::Approved => {
                return Err(SignoffError::AlreadyDecided { step, status });
            }
        }

        let mut next = workflow.clone();
        next.ledger.entry_mut(step)?.reset();
        next.touch(now);

        info!(workflow = %next.id, step, team = %team, "rejected step resubmitted");

        Ok(next)
    }

    fn needs_gl_detail(&self, step: u8, decision: Decision) -> bool {
        self.config.require_gl_detail
            && matches!(
                (step, decision),
                (PREPROD_INTEGRATION_STEP, Decision::Approved)
                    | (PREPROD_FINANCE_STEP, Decision::Rejected)
            )
    }

    fn approve(next: &mut WorkflowRecord, request: &SignoffRequest, now: u64) -> Result<()> {
        let step = request.step_number;
        next.ledger.entry_mut(step)?.decide(
            SignoffStatus::Approved,
            request.person.trim(),
            now,
            request.remarks.as_deref(),
        );

        if definition::is_last(step) {
            next.status = WorkflowStatus::Done;
        } else {
            next.current_step = step + 1;
        }

        Ok(())
    }

    fn reject(&self, next: &mut WorkflowRecord, request: &SignoffRequest, now: u64) -> Result<()> {
        let step = request.step_number;
        let restart_step = self.config.rejection_policy.restart_step(step);

        next.rejections.push(RejectionRecord {
            step_number: step,
            rejected_by: request.person.trim().to_owned(),
            rejected_at: now,
            remarks: request.remarks.clone(),
            restart_step,
        });

        match restart_step {
            Some(restart) => {
                next.ledger.reset_from(restart);
                next.current_step = restart;
            }
            None => {
                next.ledger.entry_mut(step)?.decide(
                    SignoffStatus::Rejected,
                    request.person.trim(),
                    now,
                    request.remarks.as_deref(),
                );
            }
        }

        Ok(())
    }
}

/// Checks the ledger/position/status relationships every stored workflow
/// must satisfy.
pub fn check_invariants(workflow: &WorkflowRecord) -> Result<(), String> {
    let current = workflow.current_step;
    if !(FIRST_STEP..=STEP_COUNT).contains(&current) {
        return Err(format!("current step {} is outside 1-8", current));
    }

    for entry in workflow.ledger.entries() {
        let n = entry.step_number;
        let status = entry.signoff_status;
        let ok = if n < current {
            status == SignoffStatus::Approved
        } else if n > current {
            status == SignoffStatus::Pending
        } else if workflow.is_done() {
            status == SignoffStatus::Approved
        } else {
            status != SignoffStatus::Approved
        };

        if !ok {
            return Err(format!(
                "step {} is {} while the workflow is at step {} ({})",
                n, status, current, workflow.status
            ));
        }
    }

    if workflow.is_done() && current != STEP_COUNT {
        return Err(format!("workflow is done but sits at step {}", current));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    #![allow(clippy::indexing_slicing)]
    #![allow(clippy::panic)]

    use super::*;
    use crate::attachment::AttachmentRef;
    use crate::core::record::{NewWorkflow, WorkflowId};
    use crate::error::ErrorKind;
    use crate::workflow::transition::RejectionPolicy;

    const APPROVERS: [Team; 8] = [
        Team::Integration,
        Team::BusinessTeam,
        Team::BusinessTeam,
        Team::Integration,
        Team::Qa,
        Team::Finance,
        Team::Integration,
        Team::BusinessTeam,
    ];

    fn fresh() -> WorkflowRecord {
        WorkflowRecord::new(WorkflowId(1), NewWorkflow::new("Acme Water"), 1_000).unwrap()
    }

    fn approve(engine: &Engine, wf: &WorkflowRecord, step: u8) -> WorkflowRecord {
        let team = APPROVERS[usize::from(step - 1)];
        engine
            .record_signoff(wf, &SignoffRequest::approve(step, team, "approver"), 2_000)
            .expect("approval should succeed")
    }

    fn advance_to(engine: &Engine, step: u8) -> WorkflowRecord {
        let mut wf = fresh();
        for n in 1..step {
            wf = approve(engine, &wf, n);
        }
        wf
    }

    #[test]
    fn test_full_pipeline_scenario() {
        let engine = Engine::new();
        let wf = fresh();
        assert_eq!(wf.title(), "WF00001");

        let wf = engine
            .record_signoff(
                &wf,
                &SignoffRequest::approve(1, Team::Integration, "ivan"),
                2_000,
            )
            .unwrap();
        assert_eq!(wf.current_step(), 2);

        let again = engine.record_signoff(
            &wf,
            &SignoffRequest::approve(1, Team::Integration, "ivan"),
            2_001,
        );
        assert_eq!(again.unwrap_err().kind(), ErrorKind::AlreadyDecided);

        let mut wf = wf;
        for step in 2..=7 {
            wf = approve(&engine, &wf, step);
            check_invariants(&wf).unwrap();
        }
        assert_eq!(wf.current_step(), 8);
        assert_eq!(wf.status(), WorkflowStatus::InProgress);

        let wf = engine
            .record_signoff(
                &wf,
                &SignoffRequest::approve(8, Team::BusinessTeam, "bea"),
                3_000,
            )
            .unwrap();
        assert_eq!(wf.status(), WorkflowStatus::Done);
        assert_eq!(wf.current_step(), 8);
        assert_eq!(
            wf.ledger().status_of(8).unwrap(),
            SignoffStatus::Approved
        );
        check_invariants(&wf).unwrap();
    }

    #[test]
    fn test_approval_records_signoff_details() {
        let engine = Engine::new();
        let wf = engine
            .record_signoff(
                &fresh(),
                &SignoffRequest::approve(1, Team::Integration, "ivan").with_remarks("UAT ready"),
                4_242,
            )
            .unwrap();

        let entry = wf.ledger().entry(1).unwrap();
        assert_eq!(entry.signoff_person.as_deref(), Some("ivan"));
        assert_eq!(entry.signoff_date, Some(4_242));
        assert_eq!(entry.remarks.as_deref(), Some("UAT ready"));
        assert_eq!(wf.version(), 2);
        assert!((2..=8).all(|n| wf.ledger().status_of(n).unwrap().is_pending()));
    }

    #[test]
    fn test_wrong_team_is_forbidden_and_changes_nothing() {
        let engine = Engine::new();
        let wf = fresh();

        for team in [Team::BusinessTeam, Team::Qa, Team::Finance] {
            let err = engine
                .record_signoff(&wf, &SignoffRequest::approve(1, team, "x"), 2_000)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
        }

        assert_eq!(wf, fresh());
    }

    #[test]
    fn test_future_step_is_invalid() {
        let engine = Engine::new();
        let wf = advance_to(&engine, 3);

        for step in 4..=8 {
            let team = APPROVERS[usize::from(step - 1)];
            let err = engine
                .record_signoff(&wf, &SignoffRequest::approve(step, team, "x"), 2_000)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidStep, "step {}", step);
        }
    }

    #[test]
    fn test_out_of_range_step() {
        let engine = Engine::new();
        for step in [0, 9, 200] {
            let err = engine
                .record_signoff(
                    &fresh(),
                    &SignoffRequest::approve(step, Team::Integration, "x"),
                    0,
                )
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::OutOfRange);
        }
    }

    #[test]
    fn test_done_workflow_rejects_further_signoffs() {
        let engine = Engine::new();
        let done = approve(&engine, &advance_to(&engine, 8), 8);

        let err = engine
            .record_signoff(
                &done,
                &SignoffRequest::reject(8, Team::BusinessTeam, "bea"),
                0,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDecided);
    }

    #[test]
    fn test_blank_person_is_rejected() {
        let err = Engine::new()
            .record_signoff(
                &fresh(),
                &SignoffRequest::approve(1, Team::Integration, "  "),
                0,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_stale_version_conflicts() {
        let engine = Engine::new();
        let wf = fresh();
        let request = SignoffRequest::approve(1, Team::Integration, "ivan").at_version(1);

        let advanced = engine.record_signoff(&wf, &request, 0).unwrap();
        let err = engine
            .record_signoff(
                &advanced,
                &SignoffRequest::approve(2, Team::BusinessTeam, "bea").at_version(1),
                0,
            )
            .unwrap_err();

        assert!(matches!(
            err,
            SignoffError::Conflict {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_rejection_stalls_under_default_policy() {
        let engine = Engine::new();
        let wf = advance_to(&engine, 5);

        let rejected = engine
            .record_signoff(
                &wf,
                &SignoffRequest::reject(5, Team::Qa, "quinn").with_remarks("fails smoke test"),
                3_000,
            )
            .unwrap();

        assert_eq!(rejected.current_step(), 5);
        assert_eq!(
            rejected.ledger().status_of(5).unwrap(),
            SignoffStatus::Rejected
        );
        assert_eq!(rejected.rejections().len(), 1);
        assert_eq!(rejected.rejections()[0].restart_step, None);
        check_invariants(&rejected).unwrap();

        // stalled until someone re-opens it
        let err = engine
            .record_signoff(&rejected, &SignoffRequest::approve(5, Team::Qa, "quinn"), 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyDecided);
    }

    #[test]
    fn test_resubmit_reopens_rejected_step() {
        let engine = Engine::new();
        let wf = advance_to(&engine, 5);
        let rejected = engine
            .record_signoff(&wf, &SignoffRequest::reject(5, Team::Qa, "quinn"), 3_000)
            .unwrap();

        let err = engine
            .resubmit(&rejected, 5, Team::Finance, 3_100)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let reopened = engine
            .resubmit(&rejected, 5, Team::Integration, 3_100)
            .unwrap();
        assert!(reopened.ledger().status_of(5).unwrap().is_pending());
        assert_eq!(reopened.rejections().len(), 1);

        let approved = approve(&engine, &reopened, 5);
        assert_eq!(approved.current_step(), 6);
    }

    #[test]
    fn test_resubmit_requires_a_rejection() {
        let engine = Engine::new();
        let err = engine
            .resubmit(&fresh(), 1, Team::Integration, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = engine
            .resubmit(&fresh(), 2, Team::Integration, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidStep);
    }

    #[test]
    fn test_restart_policy_moves_back() {
        let engine = Engine::with_config(EngineConfig {
            rejection_policy: RejectionPolicy::Restart,
            require_gl_detail: false,
        });
        let wf = advance_to(&engine, 6);

        let restarted = engine
            .record_signoff(&wf, &SignoffRequest::reject(6, Team::Finance, "fay"), 3_000)
            .unwrap();

        assert_eq!(restarted.current_step(), 4);
        assert!((4..=8).all(|n| restarted.ledger().status_of(n).unwrap().is_pending()));
        assert!((1..=3).all(|n| restarted.ledger().status_of(n).unwrap()
            == SignoffStatus::Approved));
        assert_eq!(restarted.rejections()[0].restart_step, Some(4));
        check_invariants(&restarted).unwrap();

        // a step without a restart rule still stalls
        let at_three = advance_to(&engine, 3);
        let stalled = engine
            .record_signoff(
                &at_three,
                &SignoffRequest::reject(3, Team::BusinessTeam, "bea"),
                0,
            )
            .unwrap();
        assert_eq!(stalled.current_step(), 3);
        assert_eq!(
            stalled.ledger().status_of(3).unwrap(),
            SignoffStatus::Rejected
        );
    }

    #[test]
    fn test_gl_detail_gate() {
        let engine = Engine::with_config(EngineConfig {
            rejection_policy: RejectionPolicy::Stall,
            require_gl_detail: true,
        });
        let wf = advance_to(&engine, 4);

        let err = engine
            .record_signoff(&wf, &SignoffRequest::approve(4, Team::Integration, "ivan"), 0)
            .unwrap_err();
        assert!(matches!(err, SignoffError::MissingAttachment(4)));

        let mut with_gl = wf.clone();
        with_gl.attachments.push(AttachmentRef {
            file_name: "gl.pdf".to_string(),
            stored_path: "WF00001/gl.pdf".to_string(),
            description: Some("GL detail".to_string()),
            uploaded_by: "ivan".to_string(),
            uploaded_at: 0,
            size_bytes: 3,
        });
        let approved = engine
            .record_signoff(
                &with_gl,
                &SignoffRequest::approve(4, Team::Integration, "ivan"),
                0,
            )
            .unwrap();
        assert_eq!(approved.current_step(), 5);
    }

    #[test]
    fn test_invariants_hold_along_every_prefix() {
        let engine = Engine::new();
        let mut wf = fresh();
        check_invariants(&wf).unwrap();

        for step in 1..=8 {
            wf = approve(&engine, &wf, step);
            check_invariants(&wf).unwrap();
            for n in 1..wf.current_step() {
                assert_eq!(wf.ledger().status_of(n).unwrap(), SignoffStatus::Approved);
            }
            assert_eq!(
                wf.is_done(),
                wf.ledger().status_of(8).unwrap() == SignoffStatus::Approved
            );
        }
    }

    #[test]
    fn test_check_invariants_flags_corruption() {
        let mut wf = fresh();
        wf.current_step = 3;
        assert!(check_invariants(&wf).is_err());
    }
}
