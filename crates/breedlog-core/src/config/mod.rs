//! Remote backend configuration.
//!
//! Values come from the environment (or a CLI profile) and describe where
//! the Supabase project lives and how the sync engine should talk to it.
//! Secret credentials never live here; the per-user access token comes
//! from the auth session.

use std::env;
use std::time::Duration;

use crate::util::{is_http_url, normalize_text_option};
use crate::{Error, Result};

const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
const ENV_SUPABASE_ANON_KEY: &str = "SUPABASE_ANON_KEY";
const ENV_STORAGE_BUCKET: &str = "BREEDLOG_STORAGE_BUCKET";
const ENV_REQUEST_TIMEOUT_SECS: &str = "BREEDLOG_REQUEST_TIMEOUT_SECS";
const ENV_MAX_CONCURRENT_UPLOADS: &str = "BREEDLOG_MAX_CONCURRENT_UPLOADS";

pub const DEFAULT_STORAGE_BUCKET: &str = "prediction-images";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 3;

/// Where the remote record store and blob storage live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Project base URL, without trailing slash.
    pub supabase_url: String,
    /// Public anon key sent as `apikey`.
    pub supabase_anon_key: String,
    /// Blob storage bucket for prediction images.
    pub storage_bucket: String,
    /// Upper bound for any single remote call.
    pub request_timeout: Duration,
    /// How many blob uploads may run at once within a pass.
    pub max_concurrent_uploads: usize,
}

impl RemoteConfig {
    /// Build a configuration with defaults for everything but the project.
    pub fn new(supabase_url: &str, supabase_anon_key: &str) -> Result<Self> {
        let supabase_url = normalize_base_url(supabase_url)?;
        let supabase_anon_key = normalize_text_option(Some(supabase_anon_key.to_string()))
            .ok_or_else(|| {
                Error::InvalidInput(format!("{ENV_SUPABASE_ANON_KEY} must not be empty"))
            })?;

        Ok(Self {
            supabase_url,
            supabase_anon_key,
            storage_bucket: DEFAULT_STORAGE_BUCKET.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no Supabase variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// Override the storage bucket; blank values keep the current one.
    #[must_use]
    pub fn with_storage_bucket(mut self, bucket: Option<String>) -> Self {
        if let Some(bucket) = normalize_text_option(bucket) {
            self.storage_bucket = bucket;
        }
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// PostgREST base URL.
    #[must_use]
    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.supabase_url)
    }

    /// Storage API base URL.
    #[must_use]
    pub fn storage_url(&self) -> String {
        format!("{}/storage/v1", self.supabase_url)
    }

    /// Auth API base URL.
    #[must_use]
    pub fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.supabase_url)
    }

    /// Lightweight endpoint probed to decide whether the backend is reachable.
    #[must_use]
    pub fn connectivity_url(&self) -> String {
        format!("{}/health", self.auth_url())
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<RemoteConfig>> {
    let url = normalize_text_option(lookup(ENV_SUPABASE_URL));
    let anon_key = normalize_text_option(lookup(ENV_SUPABASE_ANON_KEY));
    let bucket = lookup(ENV_STORAGE_BUCKET);
    let timeout = normalize_text_option(lookup(ENV_REQUEST_TIMEOUT_SECS));
    let concurrency = normalize_text_option(lookup(ENV_MAX_CONCURRENT_UPLOADS));

    let (url, anon_key) = match (url, anon_key) {
        (None, None) => return Ok(None),
        (Some(url), Some(anon_key)) => (url, anon_key),
        (url, anon_key) => {
            let mut missing = Vec::new();
            if url.is_none() {
                missing.push(ENV_SUPABASE_URL);
            }
            if anon_key.is_none() {
                missing.push(ENV_SUPABASE_ANON_KEY);
            }
            return Err(Error::InvalidInput(format!(
                "Supabase configuration is incomplete. Missing: {}",
                missing.join(", ")
            )));
        }
    };

    let mut config = RemoteConfig::new(&url, &anon_key)?.with_storage_bucket(bucket);

    if let Some(raw) = timeout {
        let seconds = parse_positive(&raw, ENV_REQUEST_TIMEOUT_SECS)?;
        config.request_timeout = Duration::from_secs(seconds);
    }
    if let Some(raw) = concurrency {
        let limit = parse_positive(&raw, ENV_MAX_CONCURRENT_UPLOADS)?;
        config.max_concurrent_uploads = usize::try_from(limit).unwrap_or(usize::MAX);
    }

    Ok(Some(config))
}

fn parse_positive(raw: &str, name: &str) -> Result<u64> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a positive integer, got '{raw}'"
        ))),
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let value = raw.trim().trim_end_matches('/');
    if value.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{ENV_SUPABASE_URL} must not be empty"
        )));
    }
    if !is_http_url(value) {
        return Err(Error::InvalidInput(format!(
            "{ENV_SUPABASE_URL} must start with http:// or https://"
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn parse_from_map(map: &HashMap<&str, &str>) -> Result<Option<RemoteConfig>> {
        parse_config(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn parse_config_none_returns_none() {
        assert!(parse_from_map(&HashMap::new()).unwrap().is_none());
    }

    #[test]
    fn parse_config_reports_missing_values() {
        let mut map = HashMap::new();
        map.insert(ENV_SUPABASE_URL, "https://project.supabase.co");

        let err = parse_from_map(&map).unwrap_err();
        match err {
            Error::InvalidInput(message) => assert!(message.contains(ENV_SUPABASE_ANON_KEY)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_config_applies_defaults_and_normalizes_url() {
        let mut map = HashMap::new();
        map.insert(ENV_SUPABASE_URL, "https://project.supabase.co/");
        map.insert(ENV_SUPABASE_ANON_KEY, " anon ");

        let config = parse_from_map(&map).unwrap().unwrap();
        assert_eq!(config.supabase_url, "https://project.supabase.co");
        assert_eq!(config.supabase_anon_key, "anon");
        assert_eq!(config.storage_bucket, DEFAULT_STORAGE_BUCKET);
        assert_eq!(
            config.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(config.max_concurrent_uploads, DEFAULT_MAX_CONCURRENT_UPLOADS);
        assert_eq!(
            config.connectivity_url(),
            "https://project.supabase.co/auth/v1/health"
        );
    }

    #[test]
    fn parse_config_reads_overrides() {
        let mut map = HashMap::new();
        map.insert(ENV_SUPABASE_URL, "https://project.supabase.co");
        map.insert(ENV_SUPABASE_ANON_KEY, "anon");
        map.insert(ENV_STORAGE_BUCKET, "cattle");
        map.insert(ENV_REQUEST_TIMEOUT_SECS, "5");
        map.insert(ENV_MAX_CONCURRENT_UPLOADS, "8");

        let config = parse_from_map(&map).unwrap().unwrap();
        assert_eq!(config.storage_bucket, "cattle");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_uploads, 8);
    }

    #[test]
    fn parse_config_rejects_bad_numbers_and_urls() {
        let mut map = HashMap::new();
        map.insert(ENV_SUPABASE_URL, "https://project.supabase.co");
        map.insert(ENV_SUPABASE_ANON_KEY, "anon");
        map.insert(ENV_REQUEST_TIMEOUT_SECS, "0");
        assert!(parse_from_map(&map).is_err());

        let mut map = HashMap::new();
        map.insert(ENV_SUPABASE_URL, "project.supabase.co");
        map.insert(ENV_SUPABASE_ANON_KEY, "anon");
        assert!(parse_from_map(&map).is_err());
    }
}
