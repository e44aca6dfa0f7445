use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] breedlog_core::Error),
    #[error(transparent)]
    Capture(#[from] breedlog_core::capture::CaptureError),
    #[error(transparent)]
    Remote(#[from] breedlog_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Not signed in for profile '{0}'. Run `breedlog auth login --email <email> --password <password>` first.")]
    NotSignedIn(String),
    #[error("Refusing to clear history without --yes")]
    ConfirmationRequired,
    #[error("{0}")]
    SyncFailed(String),
    #[error(
        "Sync is not configured. Run `breedlog config init` + `breedlog auth login`, or set SUPABASE_URL and SUPABASE_ANON_KEY."
    )]
    SyncNotConfigured,
}
