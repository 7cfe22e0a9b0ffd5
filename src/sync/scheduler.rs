//! LocationTracker: wires the collaborators together and drives the
//! periodic sample loop plus connectivity-triggered flushes.

use std::sync::Arc;
use std::time::Duration;

use config::ConfigError;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::DurableBuffer;
use crate::config::TrackerConfig;
use crate::connectivity::{ConnectivityEdge, ConnectivityNotifier};
use crate::error::TrackerError;
use crate::identity::IdentityResolver;
use crate::permission::PermissionSource;
use crate::sampler::{PositionSource, Sampler};
use crate::sink::RemoteSink;
use crate::storage::KeyValueStore;
use crate::types::DeviceIdentity;

use super::driver::{CycleOutcome, FlushOutcome, SyncDriver, SyncDriverOptions};
use super::status::{DriverState, StatusCallback, StatusReporter, SyncStatus};

// ============================================================================
// Options
// ============================================================================

/// Collaborators and settings for [`LocationTracker::start`].
pub struct TrackerOptions {
    pub permissions: Arc<dyn PermissionSource>,
    pub position: Arc<dyn PositionSource>,
    pub store: Arc<dyn KeyValueStore>,
    pub connectivity: Arc<dyn ConnectivityNotifier>,
    pub sink: Arc<dyn RemoteSink>,
    pub config: TrackerConfig,
    /// Called with a fresh snapshot on every status change
    pub on_status: Option<Arc<StatusCallback>>,
}

// ============================================================================
// LocationTracker
// ============================================================================

pub struct LocationTracker {
    status: Arc<StatusReporter>,
    /// `None` when permission was denied at startup
    driver: Option<Arc<SyncDriver>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocationTracker {
    /// Request permission, resolve the identity and start the background
    /// loop. Must be called inside a Tokio runtime.
    ///
    /// Only an invalid configuration is an error. A denied permission yields a
    /// tracker that is already `Halted`; storage trouble degrades to
    /// in-memory state.
    pub async fn start(options: TrackerOptions) -> Result<Self, ConfigError> {
        let TrackerOptions {
            permissions,
            position,
            store,
            connectivity,
            sink,
            config,
            on_status,
        } = options;
        config.validate()?;

        let status = Arc::new(StatusReporter::new(
            SyncStatus::new(config.device_name()),
            on_status,
        ));

        let permission = permissions.request_foreground_location_permission().await;
        if !permission.is_granted() {
            error!("location permission denied, tracker halted");
            status.update(|s| {
                s.state = DriverState::Halted;
                s.fail(&TrackerError::PermissionDenied);
            });
            return Ok(Self {
                status,
                driver: None,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            });
        }

        let device_id =
            IdentityResolver::new(store.clone(), config.identity_key.clone()).resolve_or_ephemeral();
        let sampler = Sampler::new(
            position,
            device_id.clone(),
            config.device_name(),
            config.accuracy,
            config.sample_timeout(),
        );
        let buffer = DurableBuffer::new(store, config.queue_key.clone())
            .with_capacity(config.queue_capacity, config.overflow_policy);

        let driver = Arc::new(SyncDriver::new(SyncDriverOptions {
            sampler,
            buffer,
            sink,
            status: status.clone(),
            flush_timeout: Some(config.flush_timeout()),
        }));
        driver.mark_ready();

        // Subscribe before spawning so no transition is missed.
        let events = connectivity.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            driver.clone(),
            events,
            config.sample_interval(),
            cancel.clone(),
        ));

        info!(
            device_id = %device_id,
            interval_secs = config.sample_interval_secs,
            pending = driver.pending_count(),
            "location tracker started"
        );

        Ok(Self {
            status,
            driver: Some(driver),
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    pub fn state(&self) -> DriverState {
        self.status.state()
    }

    /// Resolved identity; `None` if the tracker halted before resolving one.
    pub fn device_id(&self) -> Option<DeviceIdentity> {
        self.driver
            .as_ref()
            .map(|driver| driver.sampler().device_id().clone())
    }

    /// Buffered, undelivered records.
    pub fn pending(&self) -> usize {
        self.driver
            .as_ref()
            .map_or(0, |driver| driver.pending_count())
    }

    /// Run one sample/append/flush cycle now, outside the schedule.
    pub async fn sample_now(&self) -> CycleOutcome {
        match self.driver {
            Some(ref driver) => driver.run_cycle().await,
            None => CycleOutcome::Skipped,
        }
    }

    /// Try to deliver the buffer now.
    pub async fn flush_now(&self) -> FlushOutcome {
        match self.driver {
            Some(ref driver) => driver.flush().await,
            None => FlushOutcome::Skipped,
        }
    }

    /// Stop the loop, drop the connectivity subscription and wait for any
    /// in-flight cycle to finish. Buffered records stay in storage.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "tracker loop ended abnormally");
            }
        }

        match self.driver {
            Some(ref driver) => driver.stop().await,
            None => self.status.update(|s| {
                if s.state != DriverState::Halted {
                    s.state = DriverState::Stopped;
                }
            }),
        }
        info!(state = ?self.state(), "location tracker shut down");
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Background loop
// ============================================================================

/// One cycle at startup, then one per `period`. A connectivity restoration
/// flushes in between. Ends on cancellation or permission loss; dropping
/// `events` on exit deregisters the connectivity listener.
async fn run_loop(
    driver: Arc<SyncDriver>,
    mut events: mpsc::UnboundedReceiver<bool>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut edge = ConnectivityEdge::new();
    let mut listening = true;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("tracker loop cancelled");
                break;
            }

            _ = ticker.tick() => {
                match driver.run_cycle().await {
                    CycleOutcome::Halted | CycleOutcome::Skipped => break,
                    outcome => debug!(?outcome, "scheduled cycle finished"),
                }
            }

            event = events.recv(), if listening => match event {
                Some(connected) => {
                    if edge.observe(connected) {
                        info!("connectivity restored, flushing pending locations");
                        if let FlushOutcome::Skipped = driver.flush().await {
                            break;
                        }
                    }
                }
                None => {
                    debug!("connectivity notifier closed");
                    listening = false;
                }
            },
        }
    }
}
