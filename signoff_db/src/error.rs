use thiserror::Error;

use crate::core::ledger::SignoffStatus;
use crate::core::user::Team;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Forbidden,
    InvalidStep,
    AlreadyDecided,
    OutOfRange,
    NotFound,
    Conflict,
    MissingAttachment,
    Validation,
    Storage,
}

#[derive(Error, Debug)]
pub enum SignoffError {
    #[error("Team '{team}' is not allowed to {action}")]
    Forbidden { team: Team, action: String },

    #[error("Cannot sign off step {requested}: workflow is at step {current}")]
    InvalidStep { requested: u8, current: u8 },

    #[error("Step {step} has already been decided ({status})")]
    AlreadyDecided { step: u8, status: SignoffStatus },

    #[error("Step {0} is outside the pipeline (1-8)")]
    OutOfRange(u8),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Stale workflow: expected version {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    #[error("Step {0} requires GL detail: upload an attachment first")]
    MissingAttachment(u8),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SignoffError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SignoffError::Forbidden { .. } => ErrorKind::Forbidden,
            SignoffError::InvalidStep { .. } => ErrorKind::InvalidStep,
            SignoffError::AlreadyDecided { .. } => ErrorKind::AlreadyDecided,
            SignoffError::OutOfRange(_) => ErrorKind::OutOfRange,
            SignoffError::NotFound(_) => ErrorKind::NotFound,
            SignoffError::Conflict { .. } => ErrorKind::Conflict,
            SignoffError::MissingAttachment(_) => ErrorKind::MissingAttachment,
            SignoffError::Validation(_) => ErrorKind::Validation,
            SignoffError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn forbidden(team: Team, action: impl Into<String>) -> Self {
        SignoffError::Forbidden {
            team,
            action: action.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Not a signoff database (bad magic number)")]
    InvalidMagic,

    #[error("Unsupported database version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("Attachment error: {0}")]
    Attachment(String),
}

pub type Result<T, E = SignoffError> = std::result::Result<T, E>;
