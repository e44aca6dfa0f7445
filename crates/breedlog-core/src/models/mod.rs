//! Data models for Breedlog

mod prediction;
mod record;
mod user;

pub use prediction::{BreedScore, PredictionResult};
pub use record::{ImageLocation, NewPrediction, PredictionRecord, RecordId, SyncStatus};
pub use user::UserId;
