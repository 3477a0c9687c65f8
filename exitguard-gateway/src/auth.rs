//! Device request signing.
//!
//! Every `/client/*` request carries four headers:
//!
//! | header        | value                                        |
//! |---------------|----------------------------------------------|
//! | `x-device-id` | registered device id                         |
//! | `x-timestamp` | unix seconds at signing                      |
//! | `x-nonce`     | random string, single use within the window  |
//! | `x-signature` | hex HMAC-SHA256 over the canonical string    |
//!
//! The canonical string is
//! `METHOD \n PATH_AND_QUERY \n TIMESTAMP \n NONCE \n blake3_hex(body)`
//! (joined by bare newlines). The key is the hex-decoded device secret.
//!
//! Checks run cheapest first and a nonce is only remembered once the signature
//! verified, so unsigned traffic cannot burn nonces.

use std::collections::HashMap;
use std::sync::Mutex;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use exitguard_core::domain::DeviceId;
use exitguard_core::{DeviceError, DeviceRegistry};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_DEVICE_ID: &str = "x-device-id";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGNATURE: &str = "x-signature";

const MIN_NONCE_LEN: usize = 8;
const MAX_NONCE_LEN: usize = 128;

/// Why a request could not be attributed to an active device.
///
/// Every variant except `Lookup` is an authentication failure; `Lookup` means
/// the registry itself failed and is reported as an internal error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing or unreadable header {0}")]
    MissingHeader(&'static str),

    #[error("malformed timestamp")]
    BadTimestamp,

    #[error("timestamp outside the accepted window")]
    StaleTimestamp,

    #[error("nonce must be {MIN_NONCE_LEN}-{MAX_NONCE_LEN} characters")]
    BadNonce,

    #[error("nonce already used")]
    ReplayedNonce,

    #[error("unknown device")]
    UnknownDevice,

    #[error("device revoked")]
    RevokedDevice,

    #[error("signature mismatch")]
    BadSignature,

    #[error("device lookup failed: {0}")]
    Lookup(#[from] DeviceError),
}

impl AuthError {
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::Lookup(_))
    }
}

/// The signing headers of one request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub device_id: DeviceId,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl SignedHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let device_id = header(headers, HEADER_DEVICE_ID)?;
        let timestamp = header(headers, HEADER_TIMESTAMP)?
            .parse::<i64>()
            .map_err(|_| AuthError::BadTimestamp)?;
        let nonce = header(headers, HEADER_NONCE)?;
        let signature = header(headers, HEADER_SIGNATURE)?;

        if !(MIN_NONCE_LEN..=MAX_NONCE_LEN).contains(&nonce.len()) {
            return Err(AuthError::BadNonce);
        }

        Ok(Self {
            device_id: DeviceId::new(device_id),
            timestamp,
            nonce: nonce.to_string(),
            signature: signature.to_string(),
        })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, AuthError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::MissingHeader(name))
}

/// The exact bytes a device signs.
pub fn canonical_string(
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}",
        method.to_ascii_uppercase(),
        path_and_query,
        timestamp,
        nonce,
        blake3::hash(body).to_hex()
    )
}

fn keyed_mac(secret: &[u8]) -> Result<HmacSha256, AuthError> {
    HmacSha256::new_from_slice(secret).map_err(|_| AuthError::BadSignature)
}

/// Hex signature for a request. This is what a device computes.
pub fn sign(
    secret: &[u8],
    method: &str,
    path_and_query: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> Result<String, AuthError> {
    let mut mac = keyed_mac(secret)?;
    mac.update(canonical_string(method, path_and_query, timestamp, nonce, body).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies signed requests against the device registry.
pub struct DeviceAuthenticator {
    registry: DeviceRegistry,
    window_secs: u64,
    /// (device, nonce) → request timestamp.
    nonces: Mutex<HashMap<(DeviceId, String), i64>>,
}

impl DeviceAuthenticator {
    pub fn new(registry: DeviceRegistry, window_secs: u64) -> Self {
        Self {
            registry,
            window_secs,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Attribute a request to exactly one active device.
    pub fn authenticate(
        &self,
        method: &str,
        path_and_query: &str,
        headers: &SignedHeaders,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<DeviceId, AuthError> {
        let now_secs = now.timestamp();
        if now_secs.abs_diff(headers.timestamp) > self.window_secs {
            return Err(AuthError::StaleTimestamp);
        }

        let device = self
            .registry
            .get(&headers.device_id)?
            .ok_or(AuthError::UnknownDevice)?;
        if !device.is_active() {
            return Err(AuthError::RevokedDevice);
        }

        let secret = hex::decode(&device.secret).map_err(|_| AuthError::BadSignature)?;
        let presented = hex::decode(&headers.signature).map_err(|_| AuthError::BadSignature)?;
        let mut mac = keyed_mac(&secret)?;
        mac.update(
            canonical_string(
                method,
                path_and_query,
                headers.timestamp,
                &headers.nonce,
                body,
            )
            .as_bytes(),
        );
        mac.verify_slice(&presented)
            .map_err(|_| AuthError::BadSignature)?;

        self.remember_nonce(&headers.device_id, &headers.nonce, headers.timestamp, now_secs)?;
        Ok(device.id)
    }

    fn remember_nonce(
        &self,
        device_id: &DeviceId,
        nonce: &str,
        timestamp: i64,
        now_secs: i64,
    ) -> Result<(), AuthError> {
        // A poisoned cache cannot vouch for freshness.
        let mut seen = self.nonces.lock().map_err(|_| AuthError::ReplayedNonce)?;
        let horizon = now_secs.saturating_sub_unsigned(self.window_secs);
        seen.retain(|_, ts| *ts >= horizon);

        let key = (device_id.clone(), nonce.to_string());
        if seen.contains_key(&key) {
            return Err(AuthError::ReplayedNonce);
        }
        seen.insert(key, timestamp);
        Ok(())
    }

    #[cfg(test)]
    fn remembered(&self) -> usize {
        self.nonces.lock().map(|s| s.len()).unwrap_or(0)
    }
}
