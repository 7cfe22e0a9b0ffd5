//! Device identity resolution.
//!
//! The identity is read from a fixed storage key. An absent value is replaced
//! by a fresh random UUIDv4; a malformed value is re-derived deterministically
//! from its own content (SHA-256 reshaped into the UUIDv4 layout), so the same
//! bad input always maps to the same identity.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::{Builder, Uuid};

use crate::error::StorageError;
use crate::storage::KeyValueStore;
use crate::types::DeviceIdentity;

fn uuid_v4_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
            .expect("UUIDv4 regex is valid")
    })
}

/// `true` if `value` is a canonical hyphenated UUIDv4 (hex, any case).
pub fn is_valid_uuid_v4(value: &str) -> bool {
    uuid_v4_regex().is_match(value)
}

/// Map an arbitrary string to a well-formed UUIDv4. Deterministic.
pub fn derive_uuid_v4(input: &str) -> DeviceIdentity {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    DeviceIdentity::from_uuid(Builder::from_random_bytes(bytes).into_uuid())
}

/// What resolution found in storage and whether it must be written back.
enum Plan {
    Keep(DeviceIdentity),
    Write(DeviceIdentity),
}

pub struct IdentityResolver {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Resolve the persisted identity, creating or repairing it as needed.
    ///
    /// Writes to storage at most once. Fails only if the store fails.
    pub fn resolve(&self) -> Result<DeviceIdentity, StorageError> {
        let stored = self.store.get(&self.key)?;
        match self.plan(stored) {
            Plan::Keep(identity) => Ok(identity),
            Plan::Write(identity) => {
                self.store.set(&self.key, identity.as_str())?;
                Ok(identity)
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but a storage failure degrades to an
    /// identity held in memory for the current session.
    pub fn resolve_or_ephemeral(&self) -> DeviceIdentity {
        let stored = match self.store.get(&self.key) {
            Ok(stored) => stored,
            Err(e) => {
                let identity = DeviceIdentity::from_uuid(Uuid::new_v4());
                warn!(error = %e, device_id = %identity, "identity unreadable, using session-only identity");
                return identity;
            }
        };

        match self.plan(stored) {
            Plan::Keep(identity) => identity,
            Plan::Write(identity) => {
                if let Err(e) = self.store.set(&self.key, identity.as_str()) {
                    warn!(error = %e, device_id = %identity, "identity not persisted, kept for this session only");
                }
                identity
            }
        }
    }

    fn plan(&self, stored: Option<String>) -> Plan {
        match stored {
            None => {
                let identity = DeviceIdentity::from_uuid(Uuid::new_v4());
                info!(device_id = %identity, "generated new device identity");
                Plan::Write(identity)
            }
            Some(raw) => match DeviceIdentity::parse(&raw) {
                Some(identity) => {
                    debug!(device_id = %identity, "using stored device identity");
                    Plan::Keep(identity)
                }
                None => {
                    let identity = derive_uuid_v4(&raw);
                    warn!(device_id = %identity, "stored identity malformed, re-derived");
                    Plan::Write(identity)
                }
            },
        }
    }
}
