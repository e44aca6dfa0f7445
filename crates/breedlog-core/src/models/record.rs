//! Prediction record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;
use crate::util::is_http_url;

use super::prediction::PredictionResult;
use super::user::UserId;

/// Client-generated record identifier; the only dedup key between devices.
///
/// New ids are UUID v7 (time-sortable), but ids arriving from the remote
/// store are accepted as opaque strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("record id cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Sync state of a local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created locally, not yet acknowledged by the remote store
    PendingSync,
    /// Present in the remote store under the same id
    Synced,
    /// Upload was given up on; never retried automatically
    Error,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingSync => "pending_sync",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single classification event owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: RecordId,
    pub user_id: UserId,
    /// Local file reference until the image is uploaded, then a public URL
    pub image_uri: String,
    /// Client creation time; never used as the sync cursor
    pub timestamp: DateTime<Utc>,
    pub status: SyncStatus,
    pub prediction_result: PredictionResult,
}

impl PredictionRecord {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == SyncStatus::PendingSync
    }

    #[must_use]
    pub fn image_location(&self) -> ImageLocation {
        ImageLocation::classify(&self.image_uri)
    }
}

/// The caller-supplied part of a record; id, owner and status are assigned on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrediction {
    pub image_uri: String,
    pub prediction_result: PredictionResult,
    pub timestamp: DateTime<Utc>,
}

impl NewPrediction {
    /// Stamp a new prediction with the current time.
    #[must_use]
    pub fn now(image_uri: impl Into<String>, prediction_result: PredictionResult) -> Self {
        Self {
            image_uri: image_uri.into(),
            prediction_result,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn into_record(self, user_id: UserId) -> PredictionRecord {
        PredictionRecord {
            id: RecordId::new(),
            user_id,
            image_uri: self.image_uri,
            timestamp: self.timestamp,
            status: SyncStatus::PendingSync,
            prediction_result: self.prediction_result,
        }
    }
}

/// Where a record's image currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLocation {
    /// Already fetchable over HTTP(S)
    Remote(String),
    /// A file on this device
    Local(PathBuf),
}

impl ImageLocation {
    #[must_use]
    pub fn classify(image_uri: &str) -> Self {
        let trimmed = image_uri.trim();
        if is_http_url(trimmed) {
            return Self::Remote(trimmed.to_string());
        }
        let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
        Self::Local(PathBuf::from(path))
    }

    /// Lowercased file extension of a local image, if it has one.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        match self {
            Self::Local(path) => extension_of(path),
            Self::Remote(_) => None,
        }
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| !ext.is_empty())
}
