//! Location permission collaborator. Consulted once, before the tracker
//! leaves `Initializing`.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        self == Self::Granted
    }
}

/// Platform permission prompt.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn request_foreground_location_permission(&self) -> PermissionStatus;
}

/// Fixed answer, for platforms without a runtime permission model.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub PermissionStatus);

#[async_trait]
impl PermissionSource for StaticPermission {
    async fn request_foreground_location_permission(&self) -> PermissionStatus {
        self.0
    }
}
