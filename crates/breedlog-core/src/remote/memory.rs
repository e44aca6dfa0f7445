//! In-process remote store used by tests and offline demos.
//!
//! Behaves like the production backend where the sync engine can observe
//! it: id collisions on insert are errors, uploads are create-only, and
//! `created_at` is assigned by a strictly increasing server clock.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{RecordId, UserId};

use super::{BlobRef, RemoteClient, RemoteError, RemoteRecord, RemoteResult, RemoteRow};

const PUBLIC_URL_BASE: &str = "https://storage.invalid/public";

/// How many times each remote operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub insert: usize,
    pub query: usize,
    pub existing_ids: usize,
    pub upload: usize,
    pub blob_exists: usize,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
struct State {
    rows: Vec<RemoteRecord>,
    blobs: BTreeMap<String, StoredBlob>,
    clock: Option<DateTime<Utc>>,
    fail_insert: Option<String>,
    fail_query: Option<String>,
    fail_uploads: HashSet<String>,
    hidden_blobs: HashSet<String>,
    delay: Option<Duration>,
    calls: CallCounts,
    existing_ids_batches: Vec<usize>,
}

impl State {
    /// Next server timestamp; strictly greater than every one handed out before.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let next = match self.clock {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.clock = Some(next);
        next
    }
}

/// Shared in-memory backend; clones observe the same state.
#[derive(Clone, Default)]
pub struct InMemoryRemote {
    state: Arc<Mutex<State>>,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RemoteResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|error| RemoteError::Api(format!("in-memory remote poisoned: {error}")))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Insert a row as if another device had uploaded it; returns its `created_at`.
    pub fn seed_row(&self, row: RemoteRow) -> DateTime<Utc> {
        self.with_state(|state| {
            let created_at = state.tick();
            state.rows.push(into_stored(row, created_at));
            created_at
        })
    }

    /// Every row currently stored, in insertion order.
    #[must_use]
    pub fn rows(&self) -> Vec<RemoteRecord> {
        self.with_state(|state| state.rows.clone())
    }

    #[must_use]
    pub fn rows_for(&self, user_id: &UserId) -> Vec<RemoteRecord> {
        self.with_state(|state| {
            state
                .rows
                .iter()
                .filter(|row| row.user_id == *user_id)
                .cloned()
                .collect()
        })
    }

    #[must_use]
    pub fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.with_state(|state| state.blobs.get(path).cloned())
    }

    #[must_use]
    pub fn blob_paths(&self) -> Vec<String> {
        self.with_state(|state| state.blobs.keys().cloned().collect())
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        self.with_state(|state| state.calls)
    }

    /// Size of each `existing_ids` request, in call order.
    #[must_use]
    pub fn existing_ids_batches(&self) -> Vec<usize> {
        self.with_state(|state| state.existing_ids_batches.clone())
    }

    /// Make `blob_exists` report `path` as missing even when it is stored,
    /// as a listing that lags behind a concurrent upload would.
    pub fn hide_blob_from_exists(&self, path: impl Into<String>) {
        self.with_state(|state| {
            state.hidden_blobs.insert(path.into());
        });
    }

    /// Store a blob as if another device had uploaded it.
    pub fn seed_blob(&self, path: impl Into<String>, bytes: Vec<u8>, content_type: &str) {
        self.with_state(|state| {
            state.blobs.insert(
                path.into(),
                StoredBlob {
                    bytes,
                    content_type: content_type.to_string(),
                },
            );
        });
    }

    /// Make `insert` fail with the given message until cleared with `None`.
    pub fn fail_insert(&self, message: Option<&str>) {
        self.with_state(|state| state.fail_insert = message.map(str::to_string));
    }

    /// Make `query_created_after` fail with the given message until cleared with `None`.
    pub fn fail_query(&self, message: Option<&str>) {
        self.with_state(|state| state.fail_query = message.map(str::to_string));
    }

    /// Make uploads to `path` fail until `clear_upload_failures`.
    pub fn fail_upload_for(&self, path: impl Into<String>) {
        self.with_state(|state| {
            state.fail_uploads.insert(path.into());
        });
    }

    pub fn clear_upload_failures(&self) {
        self.with_state(|state| state.fail_uploads.clear());
    }

    /// Delay every call by `delay` before it touches state.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.with_state(|state| state.delay = delay);
    }

    async fn pause(&self) {
        let delay = self.with_state(|state| state.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn into_stored(row: RemoteRow, created_at: DateTime<Utc>) -> RemoteRecord {
    RemoteRecord {
        id: row.id,
        user_id: row.user_id,
        image_uri: row.image_uri,
        prediction_result: row.prediction_result,
        status: Some(row.status.as_str().to_string()),
        timestamp: row.timestamp,
        created_at,
    }
}

impl RemoteClient for InMemoryRemote {
    async fn insert(&self, rows: &[RemoteRow]) -> RemoteResult<()> {
        self.pause().await;
        let mut state = self.lock()?;
        state.calls.insert += 1;
        if let Some(message) = state.fail_insert.clone() {
            return Err(RemoteError::Api(message));
        }

        let mut incoming = HashSet::with_capacity(rows.len());
        for row in rows {
            let collides = state.rows.iter().any(|stored| stored.id == row.id);
            if collides || !incoming.insert(&row.id) {
                return Err(RemoteError::Api(format!(
                    "duplicate key value violates unique constraint (id={})",
                    row.id
                )));
            }
        }

        for row in rows {
            let created_at = state.tick();
            state.rows.push(into_stored(row.clone(), created_at));
        }
        Ok(())
    }

    async fn query_created_after(
        &self,
        user_id: &UserId,
        cursor: DateTime<Utc>,
    ) -> RemoteResult<Vec<RemoteRecord>> {
        self.pause().await;
        let mut state = self.lock()?;
        state.calls.query += 1;
        if let Some(message) = state.fail_query.clone() {
            return Err(RemoteError::Api(message));
        }

        Ok(state
            .rows
            .iter()
            .filter(|row| row.user_id == *user_id && row.created_at > cursor)
            .cloned()
            .collect())
    }

    async fn existing_ids(
        &self,
        user_id: &UserId,
        ids: &[RecordId],
    ) -> RemoteResult<HashSet<RecordId>> {
        self.pause().await;
        let mut state = self.lock()?;
        state.calls.existing_ids += 1;
        state.existing_ids_batches.push(ids.len());

        let wanted: HashSet<&RecordId> = ids.iter().collect();
        Ok(state
            .rows
            .iter()
            .filter(|row| row.user_id == *user_id && wanted.contains(&row.id))
            .map(|row| row.id.clone())
            .collect())
    }

    async fn upload_blob(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> RemoteResult<BlobRef> {
        self.pause().await;
        let mut state = self.lock()?;
        state.calls.upload += 1;
        if state.fail_uploads.contains(path) {
            return Err(RemoteError::Api(format!("simulated upload failure for {path}")));
        }
        if state.blobs.contains_key(path) {
            return Err(RemoteError::Conflict(path.to_string()));
        }

        state.blobs.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(BlobRef::new(path))
    }

    async fn blob_exists(&self, path: &str) -> RemoteResult<bool> {
        self.pause().await;
        let mut state = self.lock()?;
        state.calls.blob_exists += 1;
        Ok(state.blobs.contains_key(path) && !state.hidden_blobs.contains(path))
    }

    fn public_url(&self, blob: &BlobRef) -> String {
        format!("{PUBLIC_URL_BASE}/{}", blob.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BreedScore, PredictionResult, SyncStatus};

    fn row(id: &str, user: &str) -> RemoteRow {
        RemoteRow {
            id: id.parse().unwrap(),
            user_id: UserId::parse(user).unwrap(),
            image_uri: format!("https://cdn.example.com/{id}.jpg"),
            prediction_result: PredictionResult::from_ranked(vec![BreedScore {
                breed: "Gir".to_string(),
                confidence: 0.9,
            }])
            .unwrap(),
            status: SyncStatus::Synced,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_id_collisions_atomically() {
        let remote = InMemoryRemote::new();
        remote.insert(&[row("a", "u1")]).await.unwrap();

        let error = remote
            .insert(&[row("b", "u1"), row("a", "u1")])
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Api(_)));
        assert_eq!(remote.rows().len(), 1);
    }

    #[tokio::test]
    async fn created_at_is_strictly_increasing() {
        let remote = InMemoryRemote::new();
        remote
            .insert(&[row("a", "u1"), row("b", "u1"), row("c", "u1")])
            .await
            .unwrap();
        let stamps: Vec<_> = remote.rows().iter().map(|r| r.created_at).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn query_filters_by_user_and_cursor() {
        let remote = InMemoryRemote::new();
        let first = remote.seed_row(row("a", "u1"));
        remote.seed_row(row("b", "u1"));
        remote.seed_row(row("c", "u2"));

        let user = UserId::parse("u1").unwrap();
        let after_first = remote.query_created_after(&user, first).await.unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].id.as_str(), "b");
    }

    #[tokio::test]
    async fn upload_is_create_only() {
        let remote = InMemoryRemote::new();
        remote
            .upload_blob("u1/a.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        let error = remote
            .upload_blob("u1/a.jpg", vec![4], "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Conflict(_)));
        assert_eq!(remote.blob("u1/a.jpg").unwrap().bytes, vec![1, 2, 3]);
        assert!(remote.blob_exists("u1/a.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn hidden_blob_is_missing_but_still_conflicts() {
        let remote = InMemoryRemote::new();
        remote.seed_blob("u1/a.jpg", vec![1], "image/jpeg");
        remote.hide_blob_from_exists("u1/a.jpg");

        assert!(!remote.blob_exists("u1/a.jpg").await.unwrap());
        let error = remote
            .upload_blob("u1/a.jpg", vec![2], "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(error, RemoteError::Conflict(_)));
    }
}
