use thiserror::Error;

use crate::traits::Table;

/// Failures reported by a remote store.
///
/// Schema drift is carried structurally in `UnknownColumn` so callers can
/// react to the exact column without inspecting messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("unknown column {column} on {table}")]
    UnknownColumn { table: Table, column: String },

    #[error("not found: {0}")]
    NotFound(String),
}

impl RemoteError {
    pub fn is_schema_drift(&self) -> bool {
        matches!(self, Self::UnknownColumn { .. })
    }

    /// The column the remote refused, when this is a drift error.
    pub fn unknown_column(&self) -> Option<&str> {
        match self {
            Self::UnknownColumn { column, .. } => Some(column),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for RemoteError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Self::ConstraintViolation(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound(e.to_string()),
            _ => Self::Transport(e.to_string()),
        }
    }
}
