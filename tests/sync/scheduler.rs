//! LocationTracker tests: startup, the periodic loop, connectivity-triggered
//! flushes and teardown. All run on paused time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use location_sync::config::TrackerConfig;
use location_sync::connectivity::ConnectivityMonitor;
use location_sync::error::SampleError;
use location_sync::identity::is_valid_uuid_v4;
use location_sync::permission::{PermissionStatus, StaticPermission};
use location_sync::sync::{
    CycleOutcome, DriverState, FlushOutcome, LocationTracker, StatusCallback, SyncStatus,
    TrackerOptions,
};

use crate::support::{latitudes, FlakyStore, RecordingSink, ScriptedSource};

const HOUR: Duration = Duration::from_secs(3600);

// ============================================================================
// Rig
// ============================================================================

struct Rig {
    store: Arc<FlakyStore>,
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
    monitor: Arc<ConnectivityMonitor>,
}

impl Rig {
    fn new() -> Self {
        Self {
            store: Arc::new(FlakyStore::new()),
            source: Arc::new(ScriptedSource::new()),
            sink: Arc::new(RecordingSink::new()),
            monitor: Arc::new(ConnectivityMonitor::new()),
        }
    }

    fn options(&self, permission: PermissionStatus) -> TrackerOptions {
        TrackerOptions {
            permissions: Arc::new(StaticPermission(permission)),
            position: self.source.clone(),
            store: self.store.clone(),
            connectivity: self.monitor.clone(),
            sink: self.sink.clone(),
            config: TrackerConfig {
                device_name: Some("Pixel".to_string()),
                ..TrackerConfig::default()
            },
            on_status: None,
        }
    }

    async fn start(&self) -> LocationTracker {
        LocationTracker::start(self.options(PermissionStatus::Granted))
            .await
            .expect("valid config")
    }
}

/// Let the background loop run until it is idle again.
async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn samples_at_startup_then_every_interval() {
    let rig = Rig::new();
    let tracker = rig.start().await;

    settle().await;
    assert_eq!(rig.source.calls(), 1);
    assert_eq!(rig.sink.delivered_records(), 1);

    tokio::time::sleep(HOUR).await;
    assert_eq!(rig.source.calls(), 2);
    assert_eq!(rig.sink.delivered_records(), 2);
    assert_eq!(tracker.state(), DriverState::Idle);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn records_carry_persisted_identity_across_restarts() {
    let rig = Rig::new();

    let first = rig.start().await;
    settle().await;
    let id = first.device_id().unwrap();
    assert!(is_valid_uuid_v4(id.as_str()));
    first.shutdown().await;

    let second = rig.start().await;
    settle().await;
    assert_eq!(second.device_id(), Some(id.clone()));
    second.shutdown().await;

    for batch in rig.sink.delivered() {
        assert!(batch.iter().all(|r| r.device_id == id));
        assert!(batch.iter().all(|r| r.device_name == "Pixel"));
    }
}

#[tokio::test(start_paused = true)]
async fn denied_permission_never_samples_or_flushes() {
    let rig = Rig::new();
    let tracker = LocationTracker::start(rig.options(PermissionStatus::Denied))
        .await
        .unwrap();

    assert_eq!(tracker.state(), DriverState::Halted);
    assert_eq!(tracker.device_id(), None);
    assert_eq!(
        tracker.status().display_text(),
        "Permission to access location was denied"
    );

    rig.monitor.set_connected(false);
    rig.monitor.set_connected(true);
    tokio::time::sleep(HOUR * 3).await;

    assert_eq!(tracker.sample_now().await, CycleOutcome::Skipped);
    assert_eq!(tracker.flush_now().await, FlushOutcome::Skipped);
    assert_eq!(rig.source.calls(), 0);
    assert!(rig.sink.attempts().is_empty());
    assert_eq!(rig.store.writes(), 0);
    assert_eq!(rig.monitor.subscriber_count(), 0);

    tracker.shutdown().await;
    assert_eq!(tracker.state(), DriverState::Halted);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_rejected() {
    let rig = Rig::new();
    let mut options = rig.options(PermissionStatus::Granted);
    options.config.sample_interval_secs = 0;

    assert!(LocationTracker::start(options).await.is_err());
    assert_eq!(rig.source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unreadable_store_falls_back_to_session_identity() {
    let rig = Rig::new();
    rig.store.fail_reads(true);

    let tracker = rig.start().await;
    settle().await;

    let id = tracker.device_id().unwrap();
    assert!(is_valid_uuid_v4(id.as_str()));
    assert_eq!(tracker.state(), DriverState::Idle);
    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn status_observer_follows_the_cycle() {
    let rig = Rig::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let observer: Arc<StatusCallback> = Arc::new(move |status: &SyncStatus| {
        log.lock().push(status.state);
    });

    let mut options = rig.options(PermissionStatus::Granted);
    options.on_status = Some(observer);
    let tracker = LocationTracker::start(options).await.unwrap();
    settle().await;

    let states = seen.lock().clone();
    assert_eq!(states.first(), Some(&DriverState::Ready));
    let sampling = states.iter().position(|s| *s == DriverState::Sampling).unwrap();
    let flushing = states.iter().position(|s| *s == DriverState::Flushing).unwrap();
    assert!(sampling < flushing);
    assert_eq!(states.last(), Some(&DriverState::Idle));

    tracker.shutdown().await;
}

// ============================================================================
// Connectivity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn restored_connectivity_flushes_whole_backlog() {
    let rig = Rig::new();
    rig.sink.set_failing(true);
    rig.monitor.set_connected(false);

    let tracker = rig.start().await;
    settle().await;
    tracker.sample_now().await;
    assert_eq!(tracker.pending(), 2);

    rig.sink.set_failing(false);
    rig.monitor.set_connected(true);
    settle().await;

    let delivered = rig.sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(latitudes(&delivered[0]), vec![1.0, 2.0]);
    assert_eq!(tracker.pending(), 0);
    assert_eq!(tracker.status().pending, 0);

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_restore_flush_keeps_backlog_for_next_cycle() {
    let rig = Rig::new();
    rig.sink.set_failing(true);
    rig.monitor.set_connected(false);

    let tracker = rig.start().await;
    settle().await;
    tracker.sample_now().await;

    rig.monitor.set_connected(true);
    settle().await;
    assert_eq!(tracker.pending(), 2);

    tokio::time::sleep(HOUR).await;
    assert_eq!(tracker.pending(), 3);
    assert_eq!(rig.sink.attempts().last().map(Vec::len), Some(3));
    assert!(rig.sink.delivered().is_empty());

    tracker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn only_transitions_into_connected_trigger_a_flush() {
    let rig = Rig::new();
    rig.sink.set_failing(true);
    rig.monitor.set_connected(true);

    let tracker = rig.start().await;
    settle().await;
    // Startup cycle plus the flush for the initial "connected" report.
    let attempts = rig.sink.attempts().len();

    rig.monitor.set_connected(true);
    settle().await;
    assert_eq!(rig.sink.attempts().len(), attempts);

    rig.monitor.set_connected(false);
    settle().await;
    assert_eq!(rig.sink.attempts().len(), attempts);

    rig.monitor.set_connected(true);
    settle().await;
    assert_eq!(rig.sink.attempts().len(), attempts + 1);

    tracker.shutdown().await;
}

// ============================================================================
// Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_timer_and_deregisters_listener() {
    let rig = Rig::new();
    rig.sink.set_failing(true);

    let tracker = rig.start().await;
    settle().await;
    assert_eq!(rig.monitor.subscriber_count(), 1);

    tracker.shutdown().await;
    assert_eq!(tracker.state(), DriverState::Stopped);
    assert_eq!(rig.monitor.subscriber_count(), 0);

    tokio::time::sleep(HOUR * 2).await;
    assert_eq!(rig.source.calls(), 1);
    assert_eq!(tracker.sample_now().await, CycleOutcome::Skipped);

    // Undelivered records survive for the next session.
    assert_eq!(rig.store.records("offlineLocations").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn permission_loss_mid_session_ends_the_loop() {
    let rig = Rig::new();
    let tracker = rig.start().await;
    settle().await;

    rig.source.push(Err(SampleError::PermissionDenied));
    tokio::time::sleep(HOUR).await;
    assert_eq!(tracker.state(), DriverState::Halted);

    tokio::time::sleep(HOUR * 2).await;
    assert_eq!(rig.source.calls(), 2);

    tracker.shutdown().await;
    assert_eq!(tracker.state(), DriverState::Halted);
}
