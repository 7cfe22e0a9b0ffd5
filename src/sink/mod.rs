//! Remote sink: bulk insert of buffered records.

#[cfg(feature = "http")]
pub mod postgrest;

use async_trait::async_trait;

use crate::error::RemoteRejected;
use crate::types::LocationRecord;

#[cfg(feature = "http")]
pub use postgrest::PostgrestSink;

/// Destination for delivered records.
///
/// A batch is atomic from the caller's point of view: `Ok` means every record
/// is delivered, `Err` means none is. Implementations do not deduplicate, so a
/// batch may be delivered more than once (at-least-once).
#[async_trait]
pub trait RemoteSink: Send + Sync {
    async fn insert_batch(&self, records: &[LocationRecord]) -> Result<(), RemoteRejected>;
}
