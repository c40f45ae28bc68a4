pub mod summary;
pub mod tracker;

pub use summary::WorkflowSummary;
pub use tracker::Tracker;
