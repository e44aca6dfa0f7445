//! Local persistence layer for Breedlog

mod connection;
mod kv;
mod migrations;
mod record_store;

pub use connection::Database;
pub use kv::{KeyValueStore, KvUpdate, KvWrite, MemoryKeyValueStore, SqliteKeyValueStore};
pub use record_store::{last_synced_key, predictions_key, LocalRecordStore};
