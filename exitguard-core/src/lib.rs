//! ExitGuard Core: server-side position lifecycle for remote execution agents.
//!
//! - Domain types (positions with hidden exit levels, close commands, devices)
//! - Breach detection and the periodic breach monitor
//! - Close-command ledger enforcing one active command per position
//! - Reconciliation of device-reported entry fills
//! - SQLite persistence and price-feed clients

pub mod book;
pub mod breach;
pub mod config;
pub mod devices;
pub mod domain;
pub mod ledger;
pub mod monitor;
pub mod price;
pub mod reconciliation;
pub mod store;

pub use book::{PositionBook, PositionError};
pub use config::{ConfigError, ExitGuardConfig};
pub use devices::{DeviceError, DeviceRegistry};
pub use ledger::{Ledger, LedgerError};
pub use monitor::{BreachMonitor, SweepReport};
pub use reconciliation::{DriftRow, EntryFill, ReconcileError, Reconciler};
pub use store::{Database, StoreError};
