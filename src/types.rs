use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidIdentity, SampleError};
use crate::identity::is_valid_uuid_v4;

/// Device name used when the platform does not report one.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

/// Stable per-installation identifier, always a well-formed UUIDv4 string
/// when produced by [`crate::identity::IdentityResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Accept `value` only if it matches the canonical UUIDv4 layout
    /// (hex, case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        is_valid_uuid_v4(value).then(|| Self(value.to_string()))
    }

    pub(crate) fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid.hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceIdentity {
    type Error = InvalidIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if is_valid_uuid_v4(&value) {
            Ok(Self(value))
        } else {
            Err(InvalidIdentity { value })
        }
    }
}

impl From<DeviceIdentity> for String {
    fn from(identity: DeviceIdentity) -> Self {
        identity.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Requested fix quality passed through to the position source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    Lowest,
    Low,
    #[default]
    Balanced,
    High,
    Highest,
    BestForNavigation,
}

/// Raw reading returned by a [`crate::sampler::PositionSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    /// Fix with only the required coordinates set.
    pub fn at(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            timestamp,
        }
    }
}

/// One sampled reading, in its persisted/wire shape.
///
/// Optional readings serialize as `null` rather than being omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub device_id: DeviceIdentity,
    pub device_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl LocationRecord {
    /// Build a record from a position fix.
    ///
    /// Non-finite optional readings become `None`; non-finite coordinates
    /// make the fix unusable.
    pub fn from_fix(
        device_id: DeviceIdentity,
        device_name: impl Into<String>,
        fix: PositionFix,
    ) -> Result<Self, SampleError> {
        if !fix.latitude.is_finite() || !fix.longitude.is_finite() {
            return Err(SampleError::unavailable(format!(
                "non-finite coordinates ({}, {})",
                fix.latitude, fix.longitude
            )));
        }
        Ok(Self {
            device_id,
            device_name: device_name.into(),
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude.filter(|v| v.is_finite()),
            accuracy: fix.accuracy.filter(|v| v.is_finite()),
            speed: fix.speed.filter(|v| v.is_finite()),
            timestamp: fix.timestamp,
        })
    }
}

/// ISO-8601 UTC with millisecond precision and a `Z` suffix
/// (`2024-05-01T12:00:00.000Z`).
pub(crate) mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
