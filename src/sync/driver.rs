//! SyncDriver: sample, buffer and flush orchestration.
//!
//! All public methods are async and never return `Err`. Failures are folded
//! into the returned outcome and the shared [`SyncStatus`](super::SyncStatus).
//!
//! Appending and flushing run under one async lock, so a connectivity
//! triggered flush never interleaves with a scheduled cycle's
//! append/snapshot/clear sequence. Sampling itself runs outside the lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, error, info, warn};

use crate::buffer::DurableBuffer;
use crate::error::{SampleError, SyncFailure, TrackerError};
use crate::sampler::Sampler;
use crate::sink::RemoteSink;

use super::status::{DriverState, StatusReporter};

const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Options / Outcomes
// ============================================================================

/// Configuration for `SyncDriver`.
pub struct SyncDriverOptions {
    pub sampler: Sampler,
    pub buffer: DurableBuffer,
    pub sink: Arc<dyn RemoteSink>,
    pub status: Arc<StatusReporter>,
    /// Upper bound on one batch insert (`None` = 30s)
    pub flush_timeout: Option<Duration>,
}

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing was buffered; the sink was not called.
    Empty,
    /// The whole batch was accepted and the buffer cleared.
    Delivered { count: usize },
    /// The sink failed; all `count` records are still buffered.
    Retained { count: usize, error: SyncFailure },
    /// The buffer could not be read.
    StorageFailed { message: String },
    /// The driver is halted or stopped.
    Skipped,
}

/// Result of one scheduled cycle (sample, append, flush).
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Sampled { pending: usize, flush: FlushOutcome },
    /// Transient sampling failure; the buffer is untouched.
    SampleFailed(SampleError),
    /// The record could not be buffered. The existing backlog was still
    /// offered to the sink.
    StorageFailed { message: String, flush: FlushOutcome },
    /// Location permission is gone; the driver is now halted.
    Halted,
    /// The driver is halted or stopped.
    Skipped,
}

// ============================================================================
// SyncDriver
// ============================================================================

pub struct SyncDriver {
    sampler: Sampler,
    buffer: DurableBuffer,
    sink: Arc<dyn RemoteSink>,
    status: Arc<StatusReporter>,
    flush_timeout: Duration,
    /// Serializes every append/flush sequence against the buffer
    op_lock: TokioMutex<()>,
}

impl SyncDriver {
    pub fn new(options: SyncDriverOptions) -> Self {
        Self {
            sampler: options.sampler,
            buffer: options.buffer,
            sink: options.sink,
            status: options.status,
            flush_timeout: options.flush_timeout.unwrap_or(DEFAULT_FLUSH_TIMEOUT),
            op_lock: TokioMutex::new(()),
        }
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Move to `Ready`: publish the identity and whatever is already buffered
    /// from earlier sessions.
    pub fn mark_ready(&self) {
        let pending = self.pending_count();
        let device_id = self.sampler.device_id().clone();
        self.status.update(|s| {
            s.state = DriverState::Ready;
            s.message = "Ready".to_string();
            s.device_id = Some(device_id);
            s.pending = pending;
        });
    }

    /// Sample once, buffer the reading and try to deliver the whole buffer.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self.status.state().is_terminal() {
            return CycleOutcome::Skipped;
        }
        self.status.set_state(DriverState::Sampling);

        let record = match self.sampler.sample().await {
            Ok(record) => record,
            Err(SampleError::PermissionDenied) => {
                self.halt();
                return CycleOutcome::Halted;
            }
            Err(e) => {
                warn!(error = %e, "sample failed, skipping cycle");
                self.status.update(|s| {
                    s.state = DriverState::Idle;
                    s.fail_sample(&e);
                });
                return CycleOutcome::SampleFailed(e);
            }
        };

        let _guard = self.op_lock.lock().await;
        if self.status.state().is_terminal() {
            return CycleOutcome::Skipped;
        }

        let sampled_at = record.timestamp;
        let pending = match self.buffer.append(record) {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "failed to buffer record");
                let message = e.to_string();
                let error = TrackerError::from(e);
                self.status.update(|s| s.fail(&error));
                let flush = self.flush_locked().await;
                // Keep the rejected append visible after a clean flush.
                if matches!(flush, FlushOutcome::Delivered { .. } | FlushOutcome::Empty) {
                    self.status.update(|s| s.fail(&error));
                }
                return CycleOutcome::StorageFailed { message, flush };
            }
        };

        self.status.update(|s| {
            s.message = format!("Location updated: {}", sampled_at.format("%H:%M:%S"));
            s.last_sample_at = Some(sampled_at);
            s.last_error = None;
            s.pending = pending;
        });
        info!(
            pending,
            timestamp = %sampled_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "location buffered"
        );

        let flush = self.flush_locked().await;
        CycleOutcome::Sampled { pending, flush }
    }

    /// Try to deliver the entire buffer as one batch.
    pub async fn flush(&self) -> FlushOutcome {
        if self.status.state().is_terminal() {
            return FlushOutcome::Skipped;
        }
        let _guard = self.op_lock.lock().await;
        if self.status.state().is_terminal() {
            return FlushOutcome::Skipped;
        }
        self.flush_locked().await
    }

    /// Buffered record count. Falls back to the in-memory spill if storage
    /// cannot be read.
    pub fn pending_count(&self) -> usize {
        self.buffer.len().unwrap_or_else(|e| {
            warn!(error = %e, "pending queue unreadable");
            self.buffer.spilled()
        })
    }

    pub fn buffer(&self) -> &DurableBuffer {
        &self.buffer
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Enter the terminal `Stopped` state once any in-flight operation is
    /// done. A halted driver stays halted.
    pub async fn stop(&self) {
        let _guard = self.op_lock.lock().await;
        self.status.update(|s| {
            if s.state != DriverState::Halted {
                s.state = DriverState::Stopped;
            }
        });
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn halt(&self) {
        error!("location permission revoked, halting tracker");
        self.status.update(|s| {
            s.state = DriverState::Halted;
            s.fail(&TrackerError::PermissionDenied);
        });
    }

    /// Flush with `op_lock` already held.
    ///
    /// If the persisted queue cannot be read, only the records held in memory
    /// are offered; the unread slot is left alone.
    async fn flush_locked(&self) -> FlushOutcome {
        self.status.set_state(DriverState::Flushing);

        let (batch, unreadable) = match self.buffer.snapshot() {
            Ok(batch) => (batch, None),
            Err(e) => {
                let spilled = self.buffer.snapshot_spill();
                if spilled.is_empty() {
                    error!(error = %e, "cannot read pending queue, flush skipped");
                    let message = e.to_string();
                    let error = TrackerError::from(e);
                    self.status.update(|s| {
                        s.state = DriverState::Idle;
                        s.fail(&error);
                    });
                    return FlushOutcome::StorageFailed { message };
                }
                warn!(error = %e, spilled = spilled.len(), "pending queue unreadable, flushing in-memory records only");
                (spilled, Some(TrackerError::from(e)))
            }
        };

        if batch.is_empty() {
            debug!("nothing to flush");
            self.status.update(|s| {
                s.state = DriverState::Idle;
                s.pending = 0;
            });
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        let sent = match tokio::time::timeout(self.flush_timeout, self.sink.insert_batch(&batch)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(rejected)) => Err(SyncFailure::Rejected(rejected)),
            Err(_) => Err(SyncFailure::TimedOut {
                after: self.flush_timeout,
            }),
        };

        match sent {
            Ok(()) => {
                let cleared = if unreadable.is_some() {
                    self.buffer.discard_spilled(count);
                    Ok(())
                } else {
                    self.buffer.clear()
                };
                if let Err(ref e) = cleared {
                    // Delivered but still buffered: the batch will be sent again.
                    error!(error = %e, count, "batch delivered but pending queue not cleared");
                } else {
                    info!(count, "batch delivered");
                }
                let pending = if cleared.is_ok() && unreadable.is_none() {
                    0
                } else {
                    self.pending_count()
                };
                let error = match cleared {
                    Ok(()) => unreadable,
                    Err(e) => Some(TrackerError::from(e)),
                };
                self.status.update(|s| {
                    s.state = DriverState::Idle;
                    s.pending = pending;
                    s.last_flush_at = Some(Utc::now());
                    match error {
                        Some(ref e) => s.fail(e),
                        None => s.last_error = None,
                    }
                });
                FlushOutcome::Delivered { count }
            }
            Err(failure) => {
                warn!(error = %failure, count, "flush failed, records retained");
                self.status.update(|s| {
                    s.state = DriverState::Idle;
                    s.pending = count;
                    s.fail_sync(&failure);
                });
                FlushOutcome::Retained {
                    count,
                    error: failure,
                }
            }
        }
    }
}
