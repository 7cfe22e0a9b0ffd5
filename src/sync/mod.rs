pub mod driver;
pub mod scheduler;
pub mod status;

pub use driver::{CycleOutcome, FlushOutcome, SyncDriver, SyncDriverOptions};
pub use scheduler::{LocationTracker, TrackerOptions};
pub use status::{DriverState, StatusCallback, StatusError, StatusReporter, SyncStatus};
