use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScreeningError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    #[error("Transient IO error: {0}")]
    TransientIo(String),
    #[error("Fatal error: {0}")]
    Fatal(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
}

/// Serializable classification of a [`ScreeningError`], recorded in
/// orchestration history when an instance fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotFound,
    Validation,
    ConcurrencyConflict,
    TransientIo,
    Fatal,
}

impl ScreeningError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScreeningError::NotFound(_) => FailureKind::NotFound,
            ScreeningError::ValidationError(_) => FailureKind::Validation,
            ScreeningError::ConcurrencyConflict(_) => FailureKind::ConcurrencyConflict,
            ScreeningError::TransientIo(_) | ScreeningError::IoError(_) => FailureKind::TransientIo,
            #[cfg(feature = "storage-rocksdb")]
            ScreeningError::StorageError(_) => FailureKind::TransientIo,
            ScreeningError::JsonError(e) if e.is_io() => FailureKind::TransientIo,
            ScreeningError::JsonError(_) => FailureKind::Validation,
            ScreeningError::Fatal(_) => FailureKind::Fatal,
        }
    }

    /// Whether the activity boundary may retry the failed call.
    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::TransientIo
    }

    /// The message without the variant prefix, as recorded in history.
    pub fn detail(&self) -> String {
        match self {
            ScreeningError::NotFound(m)
            | ScreeningError::ValidationError(m)
            | ScreeningError::ConcurrencyConflict(m)
            | ScreeningError::TransientIo(m)
            | ScreeningError::Fatal(m) => m.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuilds an error from a recorded failure.
    pub fn from_failure(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            FailureKind::NotFound => ScreeningError::NotFound(message),
            FailureKind::Validation => ScreeningError::ValidationError(message),
            FailureKind::ConcurrencyConflict => ScreeningError::ConcurrencyConflict(message),
            FailureKind::TransientIo => ScreeningError::TransientIo(message),
            FailureKind::Fatal => ScreeningError::Fatal(message),
        }
    }

    /// Converts a conflict whose retry budget ran out into a transient failure.
    pub fn escalate_conflict(self) -> Self {
        match self {
            ScreeningError::ConcurrencyConflict(key) => ScreeningError::TransientIo(format!(
                "aggregate update contention exhausted retry budget for {}",
                key
            )),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScreeningError>;
