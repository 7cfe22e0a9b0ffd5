//! DurableBuffer: FIFO queue of undelivered location records persisted as a
//! single JSON array under one storage key.
//!
//! Every operation is a read-modify-write of that one slot and runs under an
//! internal lock, so calls from different tasks never interleave. Sequences
//! that span several calls (snapshot, deliver, clear) must still be
//! serialized by the caller.
//!
//! When the store fails on write, the record is kept in an in-session spill
//! list instead of being dropped. Spilled records are part of every snapshot
//! and are folded back into storage on the next successful write.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::StorageError;
use crate::storage::KeyValueStore;
use crate::types::LocationRecord;

/// What to do when a bounded buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest records to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming record.
    RejectNewest,
}

pub struct DurableBuffer {
    store: Arc<dyn KeyValueStore>,
    key: String,
    capacity: Option<usize>,
    overflow: OverflowPolicy,
    /// Records accepted while the store was failing. Guarded together with
    /// the slot, so holding this lock serializes all buffer operations.
    spill: Mutex<Vec<LocationRecord>>,
}

impl DurableBuffer {
    /// Unbounded buffer stored under `key`.
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            capacity: None,
            overflow: OverflowPolicy::default(),
            spill: Mutex::new(Vec::new()),
        }
    }

    /// Bound the buffer to `capacity` records. `None` means unbounded.
    pub fn with_capacity(mut self, capacity: Option<usize>, overflow: OverflowPolicy) -> Self {
        self.capacity = capacity;
        self.overflow = overflow;
        self
    }

    /// Append `record` and return the number of buffered records.
    ///
    /// A failing store does not lose the record: it is held in memory for the
    /// session and the call still succeeds. The only error is
    /// [`StorageError::QueueFull`]: under [`OverflowPolicy::RejectNewest`], or
    /// under `DropOldest` when a failing store holds a full queue.
    pub fn append(&self, record: LocationRecord) -> Result<usize, StorageError> {
        let mut spill = self.spill.lock();

        let mut records = match self.read_persisted(true) {
            Ok(records) => records,
            Err(e) => {
                let count = self.spill_record(&mut spill, record, 0)?;
                warn!(error = %e, spilled = spill.len(), "pending queue unreadable, record held in memory");
                return Ok(count);
            }
        };
        let persisted = records.len();
        records.extend(spill.iter().cloned());
        self.make_room(&mut records)?;
        records.push(record.clone());

        match self.write(&records) {
            Ok(()) => {
                spill.clear();
                debug!(pending = records.len(), "record appended");
                Ok(records.len())
            }
            Err(e) => {
                // Nothing was written: storage still holds `persisted` records.
                let count = self.spill_record(&mut spill, record, persisted)?;
                warn!(error = %e, spilled = spill.len(), "pending queue not persisted, record held in memory");
                Ok(count)
            }
        }
    }

    /// Current contents in append order. Does not mutate anything: a
    /// corrupt slot is reported as [`StorageError::Corrupt`] and left for the
    /// next `append` to move aside.
    pub fn snapshot(&self) -> Result<Vec<LocationRecord>, StorageError> {
        let spill = self.spill.lock();
        let mut records = self.read_persisted(false)?;
        records.extend(spill.iter().cloned());
        Ok(records)
    }

    /// Records held only in memory, in append order.
    pub fn snapshot_spill(&self) -> Vec<LocationRecord> {
        self.spill.lock().clone()
    }

    /// Drop the `count` oldest in-memory records, leaving the persisted slot
    /// untouched.
    pub fn discard_spilled(&self, count: usize) {
        let mut spill = self.spill.lock();
        let count = count.min(spill.len());
        spill.drain(..count);
    }

    /// Number of buffered records.
    pub fn len(&self) -> Result<usize, StorageError> {
        self.snapshot().map(|records| records.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.len().map(|n| n == 0)
    }

    /// Number of records held only in memory because the store failed.
    pub fn spilled(&self) -> usize {
        self.spill.lock().len()
    }

    /// Drop every buffered record, persisted and spilled.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut spill = self.spill.lock();
        spill.clear();
        self.store.remove(&self.key)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Read the persisted array; a missing key is an empty queue. With
    /// `quarantine`, a blob that does not parse is moved aside to
    /// `<key>.corrupt` and treated as empty.
    fn read_persisted(&self, quarantine: bool) -> Result<Vec<LocationRecord>, StorageError> {
        let Some(raw) = self.store.get(&self.key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(records) => Ok(records),
            Err(source) => {
                let aside = format!("{}.corrupt", self.key);
                if quarantine
                    && self.store.set(&aside, &raw).is_ok()
                    && self.store.remove(&self.key).is_ok()
                {
                    error!(error = %source, moved_to = %aside, "pending queue corrupt, moved aside");
                    Ok(Vec::new())
                } else {
                    Err(StorageError::Corrupt {
                        key: self.key.clone(),
                        source,
                    })
                }
            }
        }
    }

    fn write(&self, records: &[LocationRecord]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(records).map_err(|source| StorageError::Serialize {
            key: self.key.clone(),
            source,
        })?;
        self.store.set(&self.key, &raw)
    }

    /// Apply the overflow policy so one more record fits.
    fn make_room(&self, records: &mut Vec<LocationRecord>) -> Result<(), StorageError> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };
        if records.len() < capacity {
            return Ok(());
        }
        match self.overflow {
            OverflowPolicy::RejectNewest => Err(StorageError::QueueFull { capacity }),
            OverflowPolicy::DropOldest => {
                let excess = (records.len() + 1 - capacity).min(records.len());
                records.drain(..excess);
                warn!(dropped = excess, capacity, "pending queue full, oldest records dropped");
                Ok(())
            }
        }
    }

    /// Push onto the in-memory spill, honouring the capacity against the
    /// `persisted` records that storage already holds. Persisted records
    /// cannot be evicted while the store is failing, so once they alone fill
    /// the capacity the record is refused under either policy.
    fn spill_record(
        &self,
        spill: &mut Vec<LocationRecord>,
        record: LocationRecord,
        persisted: usize,
    ) -> Result<usize, StorageError> {
        if let Some(capacity) = self.capacity {
            if persisted + spill.len() >= capacity {
                match self.overflow {
                    OverflowPolicy::DropOldest if !spill.is_empty() => {
                        spill.remove(0);
                    }
                    OverflowPolicy::DropOldest | OverflowPolicy::RejectNewest => {
                        return Err(StorageError::QueueFull { capacity });
                    }
                }
            }
        }
        spill.push(record);
        Ok(persisted + spill.len())
    }
}
