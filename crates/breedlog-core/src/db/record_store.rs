//! Per-user prediction record cache
//!
//! Records for a user live under one key as a JSON array ordered most
//! recent first; the user's sync cursor lives under a second key. Nothing
//! here ever reads or writes a key outside the user's namespace.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{NewPrediction, PredictionRecord, RecordId, SyncStatus, UserId};

use super::kv::{KeyValueStore, KvUpdate, KvWrite};

const PREDICTIONS_KEY_PREFIX: &str = "predictions";
const LAST_SYNC_KEY_PREFIX: &str = "lastSyncedAt";

/// Key holding a user's serialized record list.
pub fn predictions_key(user_id: &UserId) -> String {
    format!("{PREDICTIONS_KEY_PREFIX}_{user_id}")
}

/// Key holding a user's sync cursor.
pub fn last_synced_key(user_id: &UserId) -> String {
    format!("{LAST_SYNC_KEY_PREFIX}_{user_id}")
}

/// Local record store over any `KeyValueStore`.
#[derive(Clone)]
pub struct LocalRecordStore<S> {
    kv: S,
}

impl<S: KeyValueStore> LocalRecordStore<S> {
    pub const fn new(kv: S) -> Self {
        Self { kv }
    }

    /// Get a reference to the backing key/value store
    pub const fn kv(&self) -> &S {
        &self.kv
    }

    /// Persist a new pending record at the front of the user's list.
    ///
    /// On failure nothing was recorded and the caller must say so.
    pub async fn save(&self, prediction: NewPrediction, user_id: &UserId) -> Result<PredictionRecord> {
        let record = prediction.into_record(user_id.clone());
        self.edit_records(user_id, |records| {
            records.insert(0, record.clone());
            Ok((true, ()))
        })
        .await
        .map_err(|error| {
            tracing::warn!("Failed to save prediction for user {}: {}", user_id, error);
            Error::Persistence(format!("failed to save prediction locally: {error}"))
        })?;

        tracing::debug!("Saved pending record {} for user {}", record.id, user_id);
        Ok(record)
    }

    /// All records for the user, most recent first. Unknown users get an empty list.
    pub async fn list(&self, user_id: &UserId) -> Result<Vec<PredictionRecord>> {
        let raw = self.kv.get(&predictions_key(user_id)).await?;
        decode_records(raw.as_deref())
    }

    /// Records still waiting for upload.
    pub async fn list_pending(&self, user_id: &UserId) -> Result<Vec<PredictionRecord>> {
        Ok(self
            .list(user_id)
            .await?
            .into_iter()
            .filter(PredictionRecord::is_pending)
            .collect())
    }

    /// Remove every record and the sync cursor for the user. Idempotent.
    pub async fn clear(&self, user_id: &UserId) -> Result<()> {
        self.kv
            .apply(vec![
                KvWrite::remove(predictions_key(user_id)),
                KvWrite::remove(last_synced_key(user_id)),
            ])
            .await
            .map_err(|error| Error::Persistence(format!("failed to clear history: {error}")))?;
        tracing::info!("Cleared local data for user {}", user_id);
        Ok(())
    }

    /// Overwrite the user's full record list in one write.
    pub async fn replace(&self, user_id: &UserId, records: &[PredictionRecord]) -> Result<()> {
        validate_records(user_id, records)?;
        let serialized = serde_json::to_string(records)?;
        self.kv
            .update(&predictions_key(user_id), |_| {
                Ok((KvUpdate::Set(serialized), ()))
            })
            .await
    }

    /// Mark exactly the given ids `synced`, swapping in a new image URI where one is given.
    ///
    /// Only records still `pending_sync` are touched. Returns how many changed.
    pub async fn mark_synced(
        &self,
        user_id: &UserId,
        updates: &HashMap<RecordId, Option<String>>,
    ) -> Result<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        self.edit_records(user_id, |records| {
            let mut changed = 0;
            for record in records.iter_mut().filter(|record| record.is_pending()) {
                let Some(new_uri) = updates.get(&record.id) else {
                    continue;
                };
                record.status = SyncStatus::Synced;
                if let Some(uri) = new_uri {
                    record.image_uri.clone_from(uri);
                }
                changed += 1;
            }
            Ok((changed > 0, changed))
        })
        .await
    }

    /// Prepend downloaded records whose ids are not yet known locally.
    ///
    /// Input order is ignored; new records are placed newest first by
    /// `timestamp`. Returns the number of records actually added.
    pub async fn merge_downloaded(
        &self,
        user_id: &UserId,
        downloaded: Vec<PredictionRecord>,
    ) -> Result<usize> {
        self.edit_records(user_id, move |records| {
            let mut known: HashSet<RecordId> =
                records.iter().map(|record| record.id.clone()).collect();
            let mut fresh: Vec<PredictionRecord> = downloaded
                .into_iter()
                .filter(|record| record.user_id == *user_id)
                .filter(|record| known.insert(record.id.clone()))
                .collect();

            if fresh.is_empty() {
                return Ok((false, 0));
            }

            fresh.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            let added = fresh.len();
            fresh.append(records);
            *records = fresh;
            Ok((true, added))
        })
        .await
    }

    /// The user's sync cursor, if one has been recorded.
    pub async fn last_synced_at(&self, user_id: &UserId) -> Result<Option<DateTime<Utc>>> {
        self.kv
            .get(&last_synced_key(user_id))
            .await?
            .as_deref()
            .map(parse_cursor)
            .transpose()
    }

    /// Move the cursor forward to `candidate`; never moves it backward.
    ///
    /// Returns the cursor value now stored.
    pub async fn advance_cursor(
        &self,
        user_id: &UserId,
        candidate: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        self.kv
            .update(&last_synced_key(user_id), |raw| {
                let current = raw.as_deref().map(parse_cursor).transpose()?;
                let next = current.map_or(candidate, |current| current.max(candidate));
                let write = if current == Some(next) {
                    KvUpdate::Keep
                } else {
                    KvUpdate::Set(next.to_rfc3339())
                };
                Ok((write, next))
            })
            .await
    }

    /// Read, edit and write back the user's record list as one atomic step.
    ///
    /// `edit` reports whether it changed the list; an unchanged list is not
    /// rewritten.
    async fn edit_records<T, F>(&self, user_id: &UserId, edit: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Vec<PredictionRecord>) -> Result<(bool, T)> + Send,
    {
        self.kv
            .update(&predictions_key(user_id), |raw| {
                let mut records = decode_records(raw.as_deref())?;
                let (changed, output) = edit(&mut records)?;
                let write = if changed {
                    KvUpdate::Set(serde_json::to_string(&records)?)
                } else {
                    KvUpdate::Keep
                };
                Ok((write, output))
            })
            .await
    }
}

fn decode_records(raw: Option<&str>) -> Result<Vec<PredictionRecord>> {
    match raw {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(Vec::new()),
    }
}

fn parse_cursor(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| Error::InvalidInput(format!("invalid sync cursor '{raw}': {error}")))
}

fn validate_records(user_id: &UserId, records: &[PredictionRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in records {
        if record.user_id != *user_id {
            return Err(Error::InvalidInput(format!(
                "record {} belongs to another user",
                record.id
            )));
        }
        if !seen.insert(&record.id) {
            return Err(Error::InvalidInput(format!(
                "duplicate record id {}",
                record.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryKeyValueStore, SqliteKeyValueStore};
    use crate::models::{BreedScore, PredictionResult};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn result(breed: &str) -> PredictionResult {
        PredictionResult::from_ranked(vec![BreedScore {
            breed: breed.to_string(),
            confidence: 0.8,
        }])
        .unwrap()
    }

    fn synced_record(id: &str, owner: &UserId, secs: i64) -> PredictionRecord {
        PredictionRecord {
            id: id.parse().unwrap(),
            user_id: owner.clone(),
            image_uri: format!("https://cdn.example.com/{id}.jpg"),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            status: SyncStatus::Synced,
            prediction_result: result("Gir"),
        }
    }

    #[tokio::test]
    async fn test_save_prepends_pending_record() {
        let store = LocalRecordStore::new(SqliteKeyValueStore::open_in_memory().unwrap());
        let owner = user("u1");

        let first = store
            .save(NewPrediction::now("/tmp/a.jpg", result("Gir")), &owner)
            .await
            .unwrap();
        let second = store
            .save(NewPrediction::now("/tmp/b.jpg", result("Sahiwal")), &owner)
            .await
            .unwrap();

        let records = store.list(&owner).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, second.id);
        assert_eq!(records[1].id, first.id);
        assert!(records.iter().all(PredictionRecord::is_pending));
        assert!(records.iter().all(|record| record.user_id == owner));
    }

    #[tokio::test]
    async fn test_list_unknown_user_is_empty() {
        let store = LocalRecordStore::new(MemoryKeyValueStore::new());
        assert!(store.list(&user("nobody")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_is_persistence_error_and_keeps_state() {
        let kv = MemoryKeyValueStore::new();
        let store = LocalRecordStore::new(kv.clone());
        let owner = user("u1");
        store
            .save(NewPrediction::now("/tmp/a.jpg", result("Gir")), &owner)
            .await
            .unwrap();

        kv.set_fail_writes(true);
        let error = store
            .save(NewPrediction::now("/tmp/b.jpg", result("Gir")), &owner)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Persistence(_)));

        kv.set_fail_writes(false);
        assert_eq!(store.list(&owner).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_records_and_cursor_idempotently() {
        let store = LocalRecordStore::new(SqliteKeyValueStore::open_in_memory().unwrap());
        let owner = user("u1");
        store
            .save(NewPrediction::now("/tmp/a.jpg", result("Gir")), &owner)
            .await
            .unwrap();
        store.advance_cursor(&owner, Utc::now()).await.unwrap();

        store.clear(&owner).await.unwrap();
        store.clear(&owner).await.unwrap();

        assert!(store.list(&owner).await.unwrap().is_empty());
        assert_eq!(store.last_synced_at(&owner).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_rejects_foreign_and_duplicate_records() {
        let store = LocalRecordStore::new(MemoryKeyValueStore::new());
        let owner = user("u1");
        let other = user("u2");

        let foreign = vec![synced_record("x", &other, 1)];
        assert!(store.replace(&owner, &foreign).await.is_err());

        let duplicated = vec![synced_record("x", &owner, 1), synced_record("x", &owner, 2)];
        assert!(store.replace(&owner, &duplicated).await.is_err());

        let valid = vec![synced_record("x", &owner, 2), synced_record("y", &owner, 1)];
        store.replace(&owner, &valid).await.unwrap();
        assert_eq!(store.list(&owner).await.unwrap(), valid);
    }

    #[tokio::test]
    async fn test_mark_synced_touches_only_listed_pending_ids() {
        let store = LocalRecordStore::new(MemoryKeyValueStore::new());
        let owner = user("u1");
        let a = store
            .save(NewPrediction::now("/tmp/a.jpg", result("Gir")), &owner)
            .await
            .unwrap();
        let b = store
            .save(NewPrediction::now("/tmp/b.jpg", result("Gir")), &owner)
            .await
            .unwrap();

        let mut updates = HashMap::new();
        updates.insert(a.id.clone(), Some("https://cdn.example.com/a.jpg".to_string()));
        let changed = store.mark_synced(&owner, &updates).await.unwrap();
        assert_eq!(changed, 1);

        let records = store.list(&owner).await.unwrap();
        let a_after = records.iter().find(|r| r.id == a.id).unwrap();
        let b_after = records.iter().find(|r| r.id == b.id).unwrap();
        assert_eq!(a_after.status, SyncStatus::Synced);
        assert_eq!(a_after.image_uri, "https://cdn.example.com/a.jpg");
        assert_eq!(b_after.status, SyncStatus::PendingSync);
        assert_eq!(b_after.image_uri, "/tmp/b.jpg");
    }

    #[tokio::test]
    async fn test_merge_downloaded_dedupes_by_id() {
        let store = LocalRecordStore::new(MemoryKeyValueStore::new());
        let owner = user("u1");
        store
            .replace(&owner, &[synced_record("x", &owner, 10)])
            .await
            .unwrap();

        let downloaded = vec![
            synced_record("x", &owner, 10),
            synced_record("y", &owner, 20),
            synced_record("z", &owner, 30),
            synced_record("y", &owner, 20),
        ];
        let added = store.merge_downloaded(&owner, downloaded.clone()).await.unwrap();
        assert_eq!(added, 2);

        let ids: Vec<String> = store
            .list(&owner)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["z", "y", "x"]);

        // Re-merging the same set is a no-op
        assert_eq!(store.merge_downloaded(&owner, downloaded).await.unwrap(), 0);
        assert_eq!(store.list(&owner).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_advance_cursor_never_moves_backward() {
        let store = LocalRecordStore::new(MemoryKeyValueStore::new());
        let owner = user("u1");
        let later = Utc.timestamp_opt(2_000, 0).unwrap();
        let earlier = Utc.timestamp_opt(1_000, 0).unwrap();

        assert_eq!(store.advance_cursor(&owner, later).await.unwrap(), later);
        assert_eq!(store.advance_cursor(&owner, earlier).await.unwrap(), later);
        assert_eq!(store.last_synced_at(&owner).await.unwrap(), Some(later));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_are_all_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalRecordStore::new(SqliteKeyValueStore::open(tmp.path().join("kv.db")).unwrap());
        let owner = user("u1");

        let handles: Vec<_> = (0..40)
            .map(|index| {
                let store = store.clone();
                let owner = owner.clone();
                tokio::spawn(async move {
                    store
                        .save(NewPrediction::now(format!("/tmp/{index}.jpg"), result("Gir")), &owner)
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let records = store.list(&owner).await.unwrap();
        assert_eq!(records.len(), 40);
        let ids: HashSet<_> = records.iter().map(|record| record.id.clone()).collect();
        assert_eq!(ids.len(), 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_saves_from_separate_connections_interleave_with_sync_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kv.db");
        let writer = LocalRecordStore::new(SqliteKeyValueStore::open(&path).unwrap());
        let syncer = LocalRecordStore::new(SqliteKeyValueStore::open(&path).unwrap());
        let owner = user("u1");

        let first = writer
            .save(NewPrediction::now("/tmp/first.jpg", result("Gir")), &owner)
            .await
            .unwrap();
        let updates = HashMap::from([(first.id.clone(), None)]);
        let downloaded: Vec<PredictionRecord> = (0..10)
            .map(|index| {
                synced_record(
                    &format!("00000000-0000-7000-8000-{index:012}"),
                    &owner,
                    1_000 + index,
                )
            })
            .collect();

        let saves = {
            let writer = writer.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                for index in 0..20 {
                    writer
                        .save(NewPrediction::now(format!("/tmp/{index}.jpg"), result("Sahiwal")), &owner)
                        .await
                        .unwrap();
                }
            })
        };
        let sync_writes = {
            let syncer = syncer.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                assert_eq!(syncer.mark_synced(&owner, &updates).await.unwrap(), 1);
                assert_eq!(syncer.merge_downloaded(&owner, downloaded).await.unwrap(), 10);
            })
        };
        saves.await.unwrap();
        sync_writes.await.unwrap();

        let records = writer.list(&owner).await.unwrap();
        assert_eq!(records.len(), 31);
        assert_eq!(writer.list_pending(&owner).await.unwrap().len(), 20);
        let first_now = records.iter().find(|record| record.id == first.id).unwrap();
        assert_eq!(first_now.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_operations_stay_in_user_namespace() {
        let kv = MemoryKeyValueStore::new();
        let store = LocalRecordStore::new(kv.clone());
        let alice = user("alice");
        let bob = user("bob");
        store
            .save(NewPrediction::now("/tmp/b.jpg", result("Gir")), &bob)
            .await
            .unwrap();
        kv.clear_touched();

        store
            .save(NewPrediction::now("/tmp/a.jpg", result("Gir")), &alice)
            .await
            .unwrap();
        store.list(&alice).await.unwrap();
        store.advance_cursor(&alice, Utc::now()).await.unwrap();
        store.clear(&alice).await.unwrap();

        assert!(kv.touched_keys().iter().all(|key| key.ends_with("_alice")));
        assert_eq!(store.list(&bob).await.unwrap().len(), 1);
    }
}
