//! Offline-first sync engine.
//!
//! One pass uploads the user's pending records (images first, then a single
//! batch insert), then pulls rows created remotely since the user's cursor
//! and merges them by id. A pass either completes or changes nothing
//! locally; retrying is always safe.

mod guard;
mod outcome;


use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::config::{RemoteConfig, DEFAULT_MAX_CONCURRENT_UPLOADS, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::connectivity::ConnectivityProbe;
use crate::db::{KeyValueStore, LocalRecordStore};
use crate::models::{ImageLocation, PredictionRecord, RecordId, UserId};
use crate::remote::{
    blob_path, content_type_for_extension, BlobRef, RemoteClient, RemoteError, RemoteRecord,
    RemoteResult, RemoteRow,
};

use guard::InFlight;
pub use outcome::{SyncFailure, SyncOutcome};

/// Ids asked about per `existing_ids` request, keeping each filter URL short.
const EXISTING_IDS_BATCH: usize = 100;

/// Tunables for a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound for each individual remote call
    pub request_timeout: Duration,
    /// Blob uploads allowed in flight at once
    pub max_concurrent_uploads: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        }
    }
}

impl From<&RemoteConfig> for SyncOptions {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            request_timeout: config.request_timeout,
            max_concurrent_uploads: config.max_concurrent_uploads,
        }
    }
}

/// Anything that aborts a pass.
#[derive(Debug, Error)]
enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("local storage: {0}")]
    Local(#[from] crate::Error),
    #[error("could not read image for record {id} at {}: {source}", path.display())]
    Image {
        id: RecordId,
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A pending record with the image URI its remote row will carry.
struct PreparedUpload<'a> {
    record: &'a PredictionRecord,
    image_uri: String,
    /// Set when the local image was replaced by an uploaded blob
    uploaded_uri: Option<String>,
}

/// Runs manual upload-then-download sync passes over one device's local store.
///
/// At most one pass per user is in flight; a second request for the same
/// user is rejected rather than queued.
pub struct SyncEngine<S, R, C> {
    store: LocalRecordStore<S>,
    remote: R,
    connectivity: C,
    options: SyncOptions,
    in_flight: InFlight,
}

impl<S, R, C> SyncEngine<S, R, C>
where
    S: KeyValueStore,
    R: RemoteClient,
    C: ConnectivityProbe,
{
    pub fn new(store: LocalRecordStore<S>, remote: R, connectivity: C) -> Self {
        Self {
            store,
            remote,
            connectivity,
            options: SyncOptions::default(),
            in_flight: InFlight::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub const fn store(&self) -> &LocalRecordStore<S> {
        &self.store
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Run one reconciliation pass for the signed-in user.
    ///
    /// `user_id` is `None` when nobody is signed in. Never panics on
    /// connectivity or backend failures; they are reported in the outcome.
    pub async fn manual_sync(&self, user_id: Option<&UserId>) -> SyncOutcome {
        if !self.connectivity.is_connected() {
            tracing::info!("Sync skipped: offline");
            return SyncOutcome::failed(SyncFailure::NoConnection);
        }
        let Some(user_id) = user_id else {
            tracing::info!("Sync skipped: not signed in");
            return SyncOutcome::failed(SyncFailure::NotAuthenticated);
        };
        let Some(_guard) = self.in_flight.try_acquire(user_id) else {
            tracing::info!("Sync for user {} rejected: pass already running", user_id);
            return SyncOutcome::failed(SyncFailure::InProgress);
        };

        match self.run_pass(user_id).await {
            Ok((uploaded, downloaded)) => {
                tracing::info!(
                    "Sync for user {} finished: uploaded {}, downloaded {}",
                    user_id,
                    uploaded,
                    downloaded
                );
                SyncOutcome::completed(uploaded, downloaded)
            }
            Err(error) => {
                tracing::warn!("Sync for user {} aborted: {}", user_id, error);
                SyncOutcome::failed(SyncFailure::Failed(error.to_string()))
            }
        }
    }

    async fn run_pass(&self, user_id: &UserId) -> Result<(usize, usize), SyncError> {
        let uploaded = self.upload_pending(user_id).await?;
        let (downloaded, watermark) = self.download_new(user_id).await?;
        let cursor = self.store.advance_cursor(user_id, watermark).await?;
        tracing::debug!("Cursor for user {} is now {}", user_id, cursor.to_rfc3339());
        Ok((uploaded, downloaded))
    }

    /// Upload phase. Returns how many records became `synced`.
    async fn upload_pending(&self, user_id: &UserId) -> Result<usize, SyncError> {
        let pending = self.store.list_pending(user_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }
        tracing::debug!("User {} has {} pending records", user_id, pending.len());

        let already_remote = self.existing_remote_ids(user_id, &pending).await?;

        let (recovered, fresh): (Vec<&PredictionRecord>, Vec<&PredictionRecord>) = pending
            .iter()
            .partition(|record| already_remote.contains(&record.id));
        if !recovered.is_empty() {
            tracing::info!(
                "{} pending records already exist remotely; marking them synced",
                recovered.len()
            );
        }

        let prepared: Vec<PreparedUpload<'_>> = stream::iter(fresh)
            .map(|record| self.prepare_upload(user_id, record))
            .buffered(self.options.max_concurrent_uploads.max(1))
            .try_collect()
            .await?;

        let rows: Vec<RemoteRow> = prepared
            .iter()
            .map(|upload| RemoteRow::from_record(upload.record, upload.image_uri.clone()))
            .collect();
        if !rows.is_empty() {
            self.call("insert", self.remote.insert(&rows)).await?;
            tracing::debug!("Inserted {} rows for user {}", rows.len(), user_id);
        }

        let mut updates: HashMap<RecordId, Option<String>> = prepared
            .into_iter()
            .map(|upload| (upload.record.id.clone(), upload.uploaded_uri))
            .collect();
        for record in recovered {
            updates.insert(record.id.clone(), self.recovered_image_uri(user_id, record));
        }

        Ok(self.store.mark_synced(user_id, &updates).await?)
    }

    /// Ids among `pending` whose rows a previous pass already inserted.
    async fn existing_remote_ids(
        &self,
        user_id: &UserId,
        pending: &[PredictionRecord],
    ) -> Result<HashSet<RecordId>, SyncError> {
        let ids: Vec<RecordId> = pending.iter().map(|record| record.id.clone()).collect();
        let mut found = HashSet::new();
        for batch in ids.chunks(EXISTING_IDS_BATCH) {
            let existing = self
                .call("existing_ids", self.remote.existing_ids(user_id, batch))
                .await?;
            found.extend(existing);
        }
        Ok(found)
    }

    /// Make sure the record's image is fetchable remotely.
    async fn prepare_upload<'a>(
        &self,
        user_id: &UserId,
        record: &'a PredictionRecord,
    ) -> Result<PreparedUpload<'a>, SyncError> {
        let location = record.image_location();
        let ImageLocation::Local(path) = &location else {
            return Ok(PreparedUpload {
                record,
                image_uri: record.image_uri.clone(),
                uploaded_uri: None,
            });
        };

        let extension = location.extension();
        let object_path = blob_path(user_id, &record.id, extension.as_deref());
        let blob = if self
            .call("blob_exists", self.remote.blob_exists(&object_path))
            .await?
        {
            tracing::debug!("Blob {} already uploaded; reusing it", object_path);
            BlobRef::new(object_path)
        } else {
            let bytes = tokio::fs::read(path).await.map_err(|source| SyncError::Image {
                id: record.id.clone(),
                path: path.clone(),
                source,
            })?;
            let content_type = content_type_for_extension(extension.as_deref());
            match self
                .call(
                    "upload_blob",
                    self.remote.upload_blob(&object_path, bytes, content_type),
                )
                .await
            {
                Ok(blob) => {
                    tracing::debug!("Uploaded blob {}", blob.path());
                    blob
                }
                Err(RemoteError::Conflict(_)) => {
                    tracing::debug!("Blob {} appeared concurrently; reusing it", object_path);
                    BlobRef::new(object_path)
                }
                Err(error) => return Err(error.into()),
            }
        };

        let url = self.remote.public_url(&blob);
        Ok(PreparedUpload {
            record,
            image_uri: url.clone(),
            uploaded_uri: Some(url),
        })
    }

    /// Image URI for a record whose row a previous pass already inserted.
    fn recovered_image_uri(&self, user_id: &UserId, record: &PredictionRecord) -> Option<String> {
        let location = record.image_location();
        match location {
            ImageLocation::Remote(_) => None,
            ImageLocation::Local(_) => {
                let object_path = blob_path(user_id, &record.id, location.extension().as_deref());
                Some(self.remote.public_url(&BlobRef::new(object_path)))
            }
        }
    }

    /// Download phase. Returns the merged count and the cursor candidate.
    async fn download_new(&self, user_id: &UserId) -> Result<(usize, DateTime<Utc>), SyncError> {
        let cursor = self
            .store
            .last_synced_at(user_id)
            .await?
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let query_started = Utc::now();

        let rows = self
            .call(
                "query_created_after",
                self.remote.query_created_after(user_id, cursor),
            )
            .await?;
        tracing::debug!(
            "Remote returned {} rows for user {} after {}",
            rows.len(),
            user_id,
            cursor.to_rfc3339()
        );

        let watermark = rows
            .iter()
            .map(|row| row.created_at)
            .fold(query_started, std::cmp::max);

        let mut seen = HashSet::with_capacity(rows.len());
        let records: Vec<PredictionRecord> = rows
            .into_iter()
            .filter(|row| {
                if row.user_id != *user_id {
                    tracing::warn!("Ignoring remote row {} owned by another user", row.id);
                    return false;
                }
                seen.insert(row.id.clone())
            })
            .map(RemoteRecord::into_local)
            .collect();

        let downloaded = self.store.merge_downloaded(user_id, records).await?;
        Ok((downloaded, watermark))
    }

    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        let limit = self.options.request_timeout;
        tokio::time::timeout(limit, request)
            .await
            .map_err(|_| RemoteError::Timeout { operation, limit })?
    }
}
