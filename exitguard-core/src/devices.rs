//! Device registry: execution agents and their signing secrets.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use thiserror::Error;
use tracing::info;

use crate::domain::{Device, DeviceId};
use crate::store::{devices, Database, StoreError};

/// Bytes of randomness in a generated device secret.
pub const SECRET_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device id must be 1-64 characters of [A-Za-z0-9_.-]")]
    InvalidId,

    #[error("device {0} already registered")]
    AlreadyRegistered(DeviceId),

    #[error("device {0} not found")]
    NotFound(DeviceId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to the device table. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    db: Arc<Database>,
}

impl DeviceRegistry {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register a device and return its freshly generated hex secret.
    ///
    /// The secret is shown once; the operator copies it into the EA settings.
    pub fn register(&self, id: &DeviceId, now: DateTime<Utc>) -> Result<String, DeviceError> {
        if !is_valid_id(id.as_str()) {
            return Err(DeviceError::InvalidId);
        }
        let device = Device {
            id: id.clone(),
            secret: generate_secret(),
            revoked: false,
            created_at: now,
        };
        self.db.write(|tx| {
            if devices::get(tx, id)?.is_some() {
                return Err(DeviceError::AlreadyRegistered(id.clone()));
            }
            devices::insert(tx, &device)?;
            Ok(())
        })?;
        info!(device_id = %id, "device registered");
        Ok(device.secret)
    }

    pub fn revoke(&self, id: &DeviceId) -> Result<(), DeviceError> {
        let found = self
            .db
            .write(|tx| devices::set_revoked(tx, id, true).map_err(DeviceError::from))?;
        if !found {
            return Err(DeviceError::NotFound(id.clone()));
        }
        info!(device_id = %id, "device revoked");
        Ok(())
    }

    pub fn get(&self, id: &DeviceId) -> Result<Option<Device>, DeviceError> {
        self.db
            .read(|conn| devices::get(conn, id).map_err(DeviceError::from))
    }

    pub fn list(&self) -> Result<Vec<Device>, DeviceError> {
        self.db.read(|conn| devices::list(conn).map_err(DeviceError::from))
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
