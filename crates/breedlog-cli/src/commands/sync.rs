use std::path::Path;

use breedlog_core::auth::{AuthError, AuthResult, AuthSession};
use breedlog_core::config::RemoteConfig;
use breedlog_core::connectivity::{ConnectivityProbe, ReachabilityProbe};
use breedlog_core::remote::SupabaseRemote;
use breedlog_core::{SyncEngine, SyncOptions, SyncOutcome};

use crate::auth::{load_stored_session, SupabaseAuthService};
use crate::commands::common::{open_store, remote_config_for, resolve_profile};
use crate::error::CliError;

pub async fn run_sync(
    offline: bool,
    as_json: bool,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let profile = resolve_profile(profile)?;
    let config = remote_config_for(&profile.profile)?.ok_or(CliError::SyncNotConfigured)?;

    let probe = ReachabilityProbe::for_config(&config)
        .map_err(|error| CliError::Config(error.to_string()))?;
    if !offline {
        probe.refresh().await;
    }
    let connected = probe.is_connected();

    let session = current_session(&profile.name, &config, connected).await?;
    let access_token = session.as_ref().map_or_else(
        || config.supabase_anon_key.clone(),
        |session| session.access_token.clone(),
    );

    let remote = SupabaseRemote::new(&config, access_token)?;
    let engine = SyncEngine::new(open_store(db_path)?, remote, probe)
        .with_options(SyncOptions::from(&config));

    let outcome = engine
        .manual_sync(session.as_ref().map(|session| &session.user.id))
        .await;
    report_outcome(&outcome, as_json)
}

/// Stored session, refreshed when the backend is reachable.
async fn current_session(
    profile_name: &str,
    config: &RemoteConfig,
    connected: bool,
) -> Result<Option<AuthSession>, CliError> {
    if !connected {
        return load_stored_session(profile_name).map_err(|error| CliError::Auth(error.to_string()));
    }

    let restored = SupabaseAuthService::new(profile_name, config)
        .map_err(|error| CliError::Auth(error.to_string()))?
        .restore_session()
        .await;
    session_after_restore(restored, || load_stored_session(profile_name))
}

/// Decide which session a sync pass runs with after a restore attempt.
///
/// A rejected session means signed out; the pass then reports it. Network
/// and payload failures fall back to the stored session. Only keychain
/// failures abort the command.
pub fn session_after_restore(
    restored: AuthResult<Option<AuthSession>>,
    stored: impl FnOnce() -> AuthResult<Option<AuthSession>>,
) -> Result<Option<AuthSession>, CliError> {
    match restored {
        Ok(session) => Ok(session),
        Err(error) if error.is_rejection() => {
            tracing::warn!("Stored session was rejected: {}", error);
            Ok(None)
        }
        Err(error @ AuthError::SecureStorage(_)) => Err(CliError::Auth(error.to_string())),
        Err(error) => {
            tracing::warn!("Could not restore session, using stored one: {}", error);
            stored().map_err(|error| CliError::Auth(error.to_string()))
        }
    }
}

/// Print the outcome; failed passes become an error so the process exits non-zero.
pub fn report_outcome(outcome: &SyncOutcome, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
    } else if outcome.success {
        println!("{}", outcome.message);
    }

    if outcome.success {
        Ok(())
    } else {
        Err(CliError::SyncFailed(outcome.message.clone()))
    }
}
