pub mod audit;
pub mod definition;
pub mod engine;
pub mod transition;
pub mod validators;

pub use audit::{WorkflowPatch, apply_edit};
pub use definition::StepDefinition;
pub use engine::{Engine, check_invariants};
pub use transition::{Decision, EngineConfig, RejectionPolicy, SignoffRequest};
pub use validators::{Validator, can_edit, can_resubmit, can_signoff, can_upload};
