//! Mock collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use location_sync::error::{RemoteRejected, SampleError, StorageError};
use location_sync::sampler::PositionSource;
use location_sync::sink::RemoteSink;
use location_sync::storage::KeyValueStore;
use location_sync::types::{Accuracy, LocationRecord, PositionFix};

pub const DEVICE_ID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

// ============================================================================
// FlakyStore
// ============================================================================

#[derive(Default)]
struct FlakyStoreInner {
    entries: HashMap<String, String>,
    fail_reads: bool,
    fail_writes: bool,
    writes: usize,
}

/// In-memory store whose reads and writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: Mutex<FlakyStoreInner>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Successful `set`/`remove` calls so far.
    pub fn writes(&self) -> usize {
        self.inner.lock().writes
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.lock().entries.get(key).cloned()
    }

    pub fn records(&self, key: &str) -> Vec<LocationRecord> {
        self.raw(key)
            .map(|raw| serde_json::from_str(&raw).expect("queue is a JSON array"))
            .unwrap_or_default()
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(StorageError::backend(key, "read failed"));
        }
        Ok(inner.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(StorageError::backend(key, "write failed"));
        }
        inner.writes += 1;
        inner.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(StorageError::backend(key, "remove failed"));
        }
        inner.writes += 1;
        inner.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// ScriptedSource
// ============================================================================

#[derive(Default)]
struct ScriptedSourceInner {
    script: VecDeque<Result<PositionFix, SampleError>>,
    calls: usize,
    hang: bool,
}

/// Position source that plays back scripted results, then produces fixes
/// one minute apart with latitude `calls as f64`.
#[derive(Default)]
pub struct ScriptedSource {
    inner: Mutex<ScriptedSourceInner>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<PositionFix, SampleError>) {
        self.inner.lock().script.push_back(result);
    }

    /// Never answer (until the sampler's timeout fires).
    pub fn hang(&self, hang: bool) {
        self.inner.lock().hang = hang;
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().calls
    }
}

#[async_trait]
impl PositionSource for ScriptedSource {
    async fn current_position(&self, _accuracy: Accuracy) -> Result<PositionFix, SampleError> {
        let (next, hang) = {
            let mut inner = self.inner.lock();
            inner.calls += 1;
            let n = inner.calls;
            let next = inner.script.pop_front().unwrap_or_else(|| {
                Ok(PositionFix::at(
                    n as f64,
                    2.35,
                    base_time() + chrono::Duration::minutes(n as i64),
                ))
            });
            (next, inner.hang)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        next
    }
}

// ============================================================================
// RecordingSink
// ============================================================================

#[derive(Default)]
struct RecordingSinkInner {
    attempts: Vec<Vec<LocationRecord>>,
    delivered: Vec<Vec<LocationRecord>>,
    failing: bool,
    delay: Option<Duration>,
}

/// Sink that records every batch and can be switched into failure.
#[derive(Default)]
pub struct RecordingSink {
    inner: Mutex<RecordingSinkInner>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    /// Sleep this long inside every insert.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.inner.lock().delay = delay;
    }

    /// Every batch offered, accepted or not.
    pub fn attempts(&self) -> Vec<Vec<LocationRecord>> {
        self.inner.lock().attempts.clone()
    }

    /// Batches that were accepted.
    pub fn delivered(&self) -> Vec<Vec<LocationRecord>> {
        self.inner.lock().delivered.clone()
    }

    pub fn delivered_records(&self) -> usize {
        self.inner.lock().delivered.iter().map(Vec::len).sum()
    }
}

#[async_trait]
impl RemoteSink for RecordingSink {
    async fn insert_batch(&self, records: &[LocationRecord]) -> Result<(), RemoteRejected> {
        let delay = {
            let mut inner = self.inner.lock();
            inner.attempts.push(records.to_vec());
            inner.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock();
        if inner.failing {
            return Err(RemoteRejected::new("503 Service Unavailable"));
        }
        inner.delivered.push(records.to_vec());
        Ok(())
    }
}

pub fn latitudes(records: &[LocationRecord]) -> Vec<f64> {
    records.iter().map(|r| r.latitude).collect()
}
