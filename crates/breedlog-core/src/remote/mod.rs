//! Remote record store and blob storage interface.
//!
//! The sync engine only talks to the backend through [`RemoteClient`]. The
//! Supabase adapter is the production implementation; [`memory`] holds an
//! in-process double used by tests.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{PredictionRecord, PredictionResult, RecordId, SyncStatus, UserId};
use crate::util::sanitize_token;

pub mod memory;
mod supabase;

pub(crate) use supabase::parse_api_error;
pub use supabase::SupabaseRemote;

/// Name of the remote table holding prediction rows.
pub const PREDICTIONS_TABLE: &str = "predictions";

const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {0}")]
    Api(String),
    #[error("Blob already exists at '{0}'")]
    Conflict(String),
    #[error("Remote call '{operation}' timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Fully-formed row sent on insert. The server adds `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRow {
    pub id: RecordId,
    pub user_id: UserId,
    pub image_uri: String,
    pub prediction_result: PredictionResult,
    pub status: SyncStatus,
    pub timestamp: DateTime<Utc>,
}

impl RemoteRow {
    /// Build the row for a local record, with the image URI it should carry remotely.
    #[must_use]
    pub fn from_record(record: &PredictionRecord, image_uri: String) -> Self {
        Self {
            id: record.id.clone(),
            user_id: record.user_id.clone(),
            image_uri,
            prediction_result: record.prediction_result.clone(),
            status: SyncStatus::Synced,
            timestamp: record.timestamp,
        }
    }
}

/// Row as read back from the remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub image_uri: String,
    pub prediction_result: PredictionResult,
    #[serde(default)]
    pub status: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Server-assigned creation time; only ever compared against the cursor
    pub created_at: DateTime<Utc>,
}

impl RemoteRecord {
    /// Local shape of a downloaded row; anything that reached the server is `synced`.
    #[must_use]
    pub fn into_local(self) -> PredictionRecord {
        PredictionRecord {
            id: self.id,
            user_id: self.user_id,
            image_uri: self.image_uri,
            timestamp: self.timestamp,
            status: SyncStatus::Synced,
            prediction_result: self.prediction_result,
        }
    }
}

/// Handle to a successfully stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    path: String,
}

impl BlobRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Backend operations the sync engine depends on (async)
#[allow(async_fn_in_trait)]
pub trait RemoteClient {
    /// Insert fully-formed rows in one batch. Id collisions are errors.
    async fn insert(&self, rows: &[RemoteRow]) -> RemoteResult<()>;

    /// All of the user's rows with `created_at` strictly after `cursor`, unordered.
    async fn query_created_after(
        &self,
        user_id: &UserId,
        cursor: DateTime<Utc>,
    ) -> RemoteResult<Vec<RemoteRecord>>;

    /// Which of `ids` already have a row for this user.
    async fn existing_ids(
        &self,
        user_id: &UserId,
        ids: &[RecordId],
    ) -> RemoteResult<HashSet<RecordId>>;

    /// Create-only upload; an existing path is `RemoteError::Conflict`.
    async fn upload_blob(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> RemoteResult<BlobRef>;

    /// Whether a blob is already stored at `path`.
    async fn blob_exists(&self, path: &str) -> RemoteResult<bool>;

    /// Fetchable URL for a stored blob. Pure.
    fn public_url(&self, blob: &BlobRef) -> String;
}

/// Deterministic blob path for a record image: `{user_id}/{record_id}.{ext}`.
pub fn blob_path(user_id: &UserId, record_id: &RecordId, extension: Option<&str>) -> String {
    let extension = extension
        .map(sanitize_token)
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE_EXTENSION.to_string());
    format!("{user_id}/{record_id}.{extension}")
}

/// MIME type for an image file extension.
pub fn content_type_for_extension(extension: Option<&str>) -> &'static str {
    match extension.map(str::to_ascii_lowercase).as_deref() {
        Some("jpg" | "jpeg") | None => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("gif") => "image/gif",
        Some(_) => "application/octet-stream",
    }
}
