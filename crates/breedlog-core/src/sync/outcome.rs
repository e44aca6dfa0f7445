//! Result of one sync pass as reported to the user.

use serde::Serialize;
use thiserror::Error;

/// Why a pass did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum SyncFailure {
    #[error("No internet connection.")]
    NoConnection,
    #[error("You must be logged in to sync.")]
    NotAuthenticated,
    #[error("A sync is already running for this account.")]
    InProgress,
    #[error("Sync failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub message: String,
    pub uploaded_count: usize,
    pub downloaded_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<SyncFailure>,
}

impl SyncOutcome {
    #[must_use]
    pub fn completed(uploaded_count: usize, downloaded_count: usize) -> Self {
        let message = if uploaded_count == 0 && downloaded_count == 0 {
            "Your data is already up to date.".to_string()
        } else {
            format!("Sync successful! Uploaded: {uploaded_count}, Downloaded: {downloaded_count}.")
        };
        Self {
            success: true,
            message,
            uploaded_count,
            downloaded_count,
            failure: None,
        }
    }

    #[must_use]
    pub fn failed(failure: SyncFailure) -> Self {
        Self {
            success: false,
            message: failure.to_string(),
            uploaded_count: 0,
            downloaded_count: 0,
            failure: Some(failure),
        }
    }
}
