//! Sampler: one position reading on demand, bounded by a timeout and
//! stamped with the device identity.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::SampleError;
use crate::types::{Accuracy, DeviceIdentity, LocationRecord, PositionFix};

/// Platform position primitive (GPS/network fix).
///
/// Implementations report a missing permission as
/// [`SampleError::PermissionDenied`] and any transient radio/GPS problem as
/// [`SampleError::PositionUnavailable`].
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self, accuracy: Accuracy) -> Result<PositionFix, SampleError>;
}

pub struct Sampler {
    source: Arc<dyn PositionSource>,
    device_id: DeviceIdentity,
    device_name: String,
    accuracy: Accuracy,
    timeout: Duration,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl Sampler {
    pub fn new(
        source: Arc<dyn PositionSource>,
        device_id: DeviceIdentity,
        device_name: impl Into<String>,
        accuracy: Accuracy,
        timeout: Duration,
    ) -> Self {
        Self {
            source,
            device_id,
            device_name: device_name.into(),
            accuracy,
            timeout,
            last_timestamp: Mutex::new(None),
        }
    }

    pub fn device_id(&self) -> &DeviceIdentity {
        &self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Sample at the configured accuracy.
    pub async fn sample(&self) -> Result<LocationRecord, SampleError> {
        self.sample_with(self.accuracy).await
    }

    /// Sample with an explicit accuracy hint. Runs to completion or until the
    /// timeout expires, which is reported as [`SampleError::TimedOut`].
    pub async fn sample_with(&self, accuracy: Accuracy) -> Result<LocationRecord, SampleError> {
        let fix = tokio::time::timeout(self.timeout, self.source.current_position(accuracy))
            .await
            .map_err(|_| SampleError::TimedOut {
                after: self.timeout,
            })??;

        let record = LocationRecord::from_fix(self.device_id.clone(), &self.device_name, fix)?;

        let mut last = self.last_timestamp.lock();
        if let Some(previous) = *last {
            if record.timestamp < previous {
                warn!(%previous, current = %record.timestamp, "position timestamp went backwards");
            }
        }
        *last = Some(record.timestamp);

        debug!(
            latitude = record.latitude,
            longitude = record.longitude,
            timestamp = %record.timestamp,
            "position sampled"
        );
        Ok(record)
    }
}
