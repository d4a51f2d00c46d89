use curriculum_core::CoreError;
use curriculum_storage::{RemoteError, Table};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("invalid parent: {0}")]
    InvalidParent(String),

    #[error("content {content_id} is a {found}, not a {expected}")]
    ContentTypeMismatch {
        content_id: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{table} still rejects column {column} after {attempts} attempts")]
    DriftRetriesExhausted {
        table: Table,
        attempts: usize,
        column: String,
    },

    #[error("{table} has no column {column} and it cannot be omitted")]
    RequiredColumnMissing { table: Table, column: String },

    #[error("cascade delete failed on {step}: {source}")]
    CascadeFailed {
        step: Table,
        #[source]
        source: RemoteError,
    },

    #[error("no active session")]
    NoSession,
}

impl EngineError {
    /// The remote failure underneath this error, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) | Self::CascadeFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
