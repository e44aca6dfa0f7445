//! breedlog-core - Core library for Breedlog
//!
//! Prediction records for cattle-breed photos, the per-user local record
//! store, the remote backend interface and the offline-first sync engine
//! shared by every Breedlog front end.

pub mod auth;
pub mod capture;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{PredictionRecord, RecordId, SyncStatus, UserId};
pub use sync::{SyncEngine, SyncFailure, SyncOptions, SyncOutcome};
