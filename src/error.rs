use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classification of tracker failures, surfaced in the status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Terminal: the pipeline halts for the rest of the session.
    PermissionDenied,
    /// Recoverable: this cycle is skipped, the buffer is untouched.
    SampleFailure,
    /// Recoverable: degrade to in-memory state for the session.
    StorageFailure,
    /// Recoverable: the buffer is retained and retried on the next trigger.
    SyncFailure,
}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Key-value store failed on \"{key}\": {message}")]
    Backend {
        key: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Stored value under \"{key}\" is corrupt")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize value for \"{key}\"")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Pending queue is full ({capacity} records); newest record rejected")]
    QueueFull { capacity: usize },

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Backend failure without an underlying error value.
    pub fn backend(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            key: key.into(),
            message: message.into(),
            source: None,
        }
    }
}

// ---------------------------------------------------------------------------
// SampleError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SampleError {
    #[error("Permission to access location was denied")]
    PermissionDenied,

    #[error("Position unavailable: {reason}")]
    PositionUnavailable { reason: String },

    #[error("No position fix within {}s", after.as_secs())]
    TimedOut { after: Duration },
}

impl SampleError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::PositionUnavailable {
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// InvalidIdentity
// ---------------------------------------------------------------------------

/// A device identity that is not a canonical UUIDv4 string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Device identity {value:?} is not a UUIDv4")]
pub struct InvalidIdentity {
    pub value: String,
}

// ---------------------------------------------------------------------------
// RemoteRejected / SyncFailure
// ---------------------------------------------------------------------------

/// The remote sink refused (or could not accept) a batch. None of the batch is
/// considered delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Remote rejected batch: {reason}")]
pub struct RemoteRejected {
    pub reason: String,
}

impl RemoteRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncFailure {
    #[error(transparent)]
    Rejected(#[from] RemoteRejected),

    #[error("Batch insert did not complete within {}s", after.as_secs())]
    TimedOut { after: Duration },
}

// ---------------------------------------------------------------------------
// TrackerError (top-level rollup)
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Permission to access location was denied")]
    PermissionDenied,

    #[error(transparent)]
    SampleFailure(SampleError),

    #[error(transparent)]
    StorageFailure(#[from] StorageError),

    #[error(transparent)]
    SyncFailure(#[from] SyncFailure),
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::SampleFailure(_) => ErrorKind::SampleFailure,
            Self::StorageFailure(_) => ErrorKind::StorageFailure,
            Self::SyncFailure(_) => ErrorKind::SyncFailure,
        }
    }

    /// Only a permission denial stops the pipeline.
    pub fn is_terminal(&self) -> bool {
        self.kind() == ErrorKind::PermissionDenied
    }
}

impl From<SampleError> for TrackerError {
    fn from(e: SampleError) -> Self {
        match e {
            SampleError::PermissionDenied => Self::PermissionDenied,
            other => Self::SampleFailure(other),
        }
    }
}

impl From<RemoteRejected> for TrackerError {
    fn from(e: RemoteRejected) -> Self {
        Self::SyncFailure(SyncFailure::Rejected(e))
    }
}

/// Convenience alias; the default error type is `TrackerError`.
pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
