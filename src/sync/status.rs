//! Driver state and the user-visible status snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{ErrorKind, SampleError, SyncFailure, TrackerError};
use crate::types::DeviceIdentity;

/// Lifecycle of the sync driver.
///
/// `Initializing → Ready → Sampling → Flushing → Idle`, looping back to
/// `Sampling` on each tick. `Halted` is reached only on permission denial and
/// `Stopped` after teardown; both are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    Ready,
    Sampling,
    Flushing,
    Idle,
    Halted,
    Stopped,
}

impl DriverState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Halted | Self::Stopped)
    }
}

/// The error currently shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TrackerError> for StatusError {
    fn from(e: &TrackerError) -> Self {
        let message = match e {
            TrackerError::PermissionDenied => "Permission to access location was denied".to_string(),
            TrackerError::SampleFailure(e) => format!("Failed to update location: {e}"),
            TrackerError::StorageFailure(e) => format!("Local storage unavailable: {e}"),
            TrackerError::SyncFailure(_) => "Failed to send locations. Will retry later.".to_string(),
        };
        Self {
            kind: e.kind(),
            message,
        }
    }
}

/// Snapshot of what the tracker is doing and how it last fared.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub state: DriverState,
    /// Most recent successful outcome, e.g. `Location updated: 12:00:00`.
    pub message: String,
    /// Active error, cleared by the next successful sample or delivery.
    pub last_error: Option<StatusError>,
    /// Buffered, undelivered records.
    pub pending: usize,
    pub device_name: String,
    pub device_id: Option<DeviceIdentity>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub last_flush_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            state: DriverState::Initializing,
            message: "Initializing...".to_string(),
            last_error: None,
            pending: 0,
            device_name: device_name.into(),
            device_id: None,
            last_sample_at: None,
            last_flush_at: None,
        }
    }

    /// The line to show the user: the active error if any, else the last
    /// successful outcome.
    pub fn display_text(&self) -> &str {
        self.last_error
            .as_ref()
            .map(|e| e.message.as_str())
            .unwrap_or(&self.message)
    }

    pub(crate) fn fail(&mut self, error: &TrackerError) {
        self.last_error = Some(StatusError::from(error));
    }

    pub(crate) fn fail_sample(&mut self, error: &SampleError) {
        self.fail(&TrackerError::from(error.clone()));
    }

    pub(crate) fn fail_sync(&mut self, error: &SyncFailure) {
        self.fail(&TrackerError::SyncFailure(error.clone()));
    }
}

/// Callback type for status changes.
pub type StatusCallback = dyn Fn(&SyncStatus) + Send + Sync;

/// Shared status cell. Every update notifies the optional observer with a
/// fresh snapshot; the lock is never held during the callback.
pub struct StatusReporter {
    status: Mutex<SyncStatus>,
    on_status: Option<Arc<StatusCallback>>,
}

impl StatusReporter {
    pub fn new(initial: SyncStatus, on_status: Option<Arc<StatusCallback>>) -> Self {
        Self {
            status: Mutex::new(initial),
            on_status,
        }
    }

    pub fn snapshot(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    pub fn state(&self) -> DriverState {
        self.status.lock().state
    }

    pub fn update(&self, f: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut status = self.status.lock();
            f(&mut status);
            status.clone()
        };
        if let Some(ref on_status) = self.on_status {
            // Observer panics are contained
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                on_status(&snapshot);
            }));
        }
    }

    pub fn set_state(&self, state: DriverState) {
        self.update(|s| s.state = state);
    }
}
