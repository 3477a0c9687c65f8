//! ExitGuard Gateway: the network boundary devices talk to.
//!
//! - HMAC request signing with nonce + timestamp replay protection
//! - Wire schemas that carry no hidden exit levels
//! - axum routes for polling close commands and reporting outcomes
//! - Error taxonomy mapped to HTTP status codes

pub mod auth;
pub mod error;
pub mod routes;
pub mod wire;

pub use auth::{sign, AuthError, DeviceAuthenticator, SignedHeaders};
pub use error::GatewayError;
pub use routes::{router, serve, GatewayState};
