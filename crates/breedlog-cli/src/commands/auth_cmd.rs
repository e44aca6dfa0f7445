use breedlog_core::auth::SignUpOutcome;
use breedlog_core::config::RemoteConfig;

use crate::auth::{clear_stored_session, load_stored_session, SupabaseAuthService};
use crate::cli::AuthCommands;
use crate::commands::common::{remote_config_for, resolve_profile, ResolvedProfile};
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        AuthCommands::Signup {
            profile,
            email,
            password,
        } => {
            let resolved = resolve_profile(profile.as_deref().or(global_profile))?;
            let config = required_auth_config(&resolved)?;
            let outcome = auth_service(&resolved.name, &config)?
                .sign_up(&email, &password)
                .await
                .map_err(|error| CliError::Auth(error.to_string()))?;
            println!("{}", describe_sign_up(&resolved.name, &outcome));
            Ok(())
        }
        AuthCommands::Login {
            profile,
            email,
            password,
        } => {
            let resolved = resolve_profile(profile.as_deref().or(global_profile))?;
            let config = required_auth_config(&resolved)?;
            let session = auth_service(&resolved.name, &config)?
                .sign_in(&email, &password)
                .await
                .map_err(|error| CliError::Auth(error.to_string()))?;
            let email_label = session.user.email.as_deref().unwrap_or("(no email)");
            println!("Signed in profile '{}' as {email_label}", resolved.name);
            Ok(())
        }
        AuthCommands::Status { profile } => {
            let resolved = resolve_profile(profile.as_deref().or(global_profile))?;
            let session = match remote_config_for(&resolved.profile)? {
                Some(config) => auth_service(&resolved.name, &config)?
                    .restore_session()
                    .await
                    .map_err(|error| CliError::Auth(error.to_string()))?,
                None => load_stored_session(&resolved.name)
                    .map_err(|error| CliError::Auth(error.to_string()))?,
            };

            if let Some(session) = session {
                let email_label = session.user.email.as_deref().unwrap_or("(no email)");
                println!(
                    "Profile '{}' is signed in as {} (user_id={}, expires_at={})",
                    resolved.name, email_label, session.user.id, session.expires_at
                );
            } else {
                println!("Profile '{}' is not signed in.", resolved.name);
            }
            Ok(())
        }
        AuthCommands::Logout { profile } => {
            let resolved = resolve_profile(profile.as_deref().or(global_profile))?;
            let stored_session = load_stored_session(&resolved.name)
                .map_err(|error| CliError::Auth(error.to_string()))?;

            match (remote_config_for(&resolved.profile)?, stored_session) {
                (Some(config), Some(session)) => {
                    let service = auth_service(&resolved.name, &config)?;
                    if let Err(error) = service.sign_out(&session.access_token).await {
                        tracing::warn!("Remote sign-out failed, clearing local session: {}", error);
                        clear_stored_session(&resolved.name)
                            .map_err(|error| CliError::Auth(error.to_string()))?;
                    }
                }
                _ => clear_stored_session(&resolved.name)
                    .map_err(|error| CliError::Auth(error.to_string()))?,
            }

            println!("Signed out profile '{}'", resolved.name);
            Ok(())
        }
    }
}

pub fn describe_sign_up(profile_name: &str, outcome: &SignUpOutcome) -> String {
    match outcome {
        SignUpOutcome::SignedIn(session) => {
            let email_label = session.user.email.as_deref().unwrap_or("(no email)");
            format!("Signed up and signed in profile '{profile_name}' as {email_label}")
        }
        SignUpOutcome::ConfirmationRequired => format!(
            "Account created. Confirm your email, then run `breedlog auth login --profile {profile_name}`."
        ),
    }
}

fn required_auth_config(resolved: &ResolvedProfile) -> Result<RemoteConfig, CliError> {
    remote_config_for(&resolved.profile)?.ok_or_else(|| {
        CliError::Config(format!(
            "Profile '{}' missing Supabase auth config. Run `breedlog config init --profile {}` or set SUPABASE_URL and SUPABASE_ANON_KEY.",
            resolved.name, resolved.name
        ))
    })
}

fn auth_service(profile_name: &str, config: &RemoteConfig) -> Result<SupabaseAuthService, CliError> {
    SupabaseAuthService::new(profile_name, config).map_err(|error| CliError::Auth(error.to_string()))
}
