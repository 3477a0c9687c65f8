use chrono::{DateTime, Utc};
use std::fmt;

use super::ids::DeviceId;

/// Authentication principal for an execution agent.
#[derive(Clone)]
pub struct Device {
    pub id: DeviceId,
    /// Hex-encoded shared secret used for request signing.
    pub secret: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl Device {
    pub fn is_active(&self) -> bool {
        !self.revoked
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .field("revoked", &self.revoked)
            .field("created_at", &self.created_at)
            .finish()
    }
}
