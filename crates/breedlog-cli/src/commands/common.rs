use std::env;
use std::path::{Path, PathBuf};

use breedlog_core::config::RemoteConfig;
use breedlog_core::db::{LocalRecordStore, SqliteKeyValueStore};
use breedlog_core::{PredictionRecord, UserId};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::auth::load_stored_session;
use crate::config_profiles::{CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub type CliRecordStore = LocalRecordStore<SqliteKeyValueStore>;

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: String,
    pub breed: String,
    pub confidence: f64,
    pub status: String,
    pub image_uri: String,
    pub timestamp: String,
    pub relative_time: String,
}

/// Profile name plus its stored settings (empty when never configured).
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub name: String,
    pub profile: CliProfile,
}

pub fn resolve_profile(explicit: Option<&str>) -> Result<ResolvedProfile, CliError> {
    let config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let name = config.resolve_profile_name(explicit);
    let profile = config.profile(&name).cloned().unwrap_or_default();
    Ok(ResolvedProfile { name, profile })
}

/// Backend settings for a profile, falling back to `SUPABASE_*` environment variables.
pub fn remote_config_for(profile: &CliProfile) -> Result<Option<RemoteConfig>, CliError> {
    let env_config = RemoteConfig::from_env()?;
    profile.remote_config(env_config).map_err(CliError::Config)
}

/// The account whose records local commands operate on.
pub fn signed_in_user(profile_name: &str) -> Result<UserId, CliError> {
    load_stored_session(profile_name)
        .map_err(|error| CliError::Auth(error.to_string()))?
        .map(|session| session.user.id)
        .ok_or_else(|| CliError::NotSignedIn(profile_name.to_string()))
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("BREEDLOG_DB_PATH").map(PathBuf::from))
    {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("breedlog").join("breedlog.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub fn open_store(path: &Path) -> Result<CliRecordStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(LocalRecordStore::new(SqliteKeyValueStore::open(path)?))
}

pub fn format_record_lines(records: &[PredictionRecord]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let short_id = record.id.as_str().chars().take(13).collect::<String>();
            let top = &record.prediction_result.top_prediction;
            let breed = truncate(&top.breed, 24);
            let confidence = top.confidence * 100.0;
            let status = record.status.as_str();
            let relative_time = format_relative_time(record.timestamp.timestamp_millis(), now_ms);
            format!("{short_id:<13}  {breed:<24}  {confidence:>5.1}%  {status:<12}  {relative_time}")
        })
        .collect()
}

pub fn record_to_list_item(record: &PredictionRecord) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    let top = &record.prediction_result.top_prediction;

    RecordListItem {
        id: record.id.to_string(),
        breed: top.breed.clone(),
        confidence: top.confidence,
        status: record.status.to_string(),
        image_uri: record.image_uri.clone(),
        timestamp: record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        relative_time: format_relative_time(record.timestamp.timestamp_millis(), now_ms),
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated = value
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    truncated.push_str("...");
    truncated
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
