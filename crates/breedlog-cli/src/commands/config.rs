use std::env;

use crate::cli::ConfigCommands;
use crate::config_profiles::{is_http_url, normalize_text_option, CliProfile, CliProfilesConfig};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, global_profile: Option<&str>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            supabase_url,
            supabase_anon_key,
            storage_bucket,
            no_activate,
        } => {
            let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
            let profile_name = init_profile(
                &mut config,
                profile.as_deref().or(global_profile),
                ProfileValues {
                    supabase_url,
                    supabase_anon_key,
                    storage_bucket,
                },
                no_activate,
            )?;
            let path = config.save().map_err(CliError::Config)?;
            println!(
                "Profile '{}' initialized at {}",
                profile_name,
                path.display()
            );
            print_readiness(&config, &profile_name);
            Ok(())
        }
        ConfigCommands::Show { profile } => {
            let config = CliProfilesConfig::load().map_err(CliError::Config)?;
            let profile_name = config.resolve_profile_name(profile.as_deref().or(global_profile));
            let Some(profile) = config.profile(&profile_name) else {
                println!("Profile '{profile_name}' is not configured.");
                return Ok(());
            };
            for line in describe_profile(&profile_name, profile) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

/// Values passed on the command line for `config init`.
#[derive(Debug, Default)]
pub struct ProfileValues {
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub storage_bucket: Option<String>,
}

/// Merge explicit values over environment values over what the profile already holds.
///
/// Returns the resolved profile name.
pub fn init_profile(
    config: &mut CliProfilesConfig,
    profile_name: Option<&str>,
    values: ProfileValues,
    no_activate: bool,
) -> Result<String, CliError> {
    let profile_name = config.resolve_profile_name(profile_name);
    let existing_profile = config.profile(&profile_name).cloned().unwrap_or_default();

    let merged_supabase_url = normalize_text_option(values.supabase_url)
        .or_else(|| normalize_text_option(env::var("SUPABASE_URL").ok()))
        .or_else(|| existing_profile.supabase_url());
    let merged_supabase_anon_key = normalize_text_option(values.supabase_anon_key)
        .or_else(|| normalize_text_option(env::var("SUPABASE_ANON_KEY").ok()))
        .or_else(|| existing_profile.supabase_anon_key());
    let merged_storage_bucket = normalize_text_option(values.storage_bucket)
        .or_else(|| normalize_text_option(env::var("BREEDLOG_STORAGE_BUCKET").ok()))
        .or_else(|| existing_profile.storage_bucket());

    let profile = CliProfile {
        supabase_url: merged_supabase_url.map(|url| url.trim_end_matches('/').to_string()),
        supabase_anon_key: merged_supabase_anon_key,
        storage_bucket: merged_storage_bucket,
    };
    validate_profile_urls(&profile)?;
    *config.profile_mut_or_default(&profile_name) = profile;

    if !no_activate {
        config.active_profile = Some(profile_name.clone());
    }

    Ok(profile_name)
}

fn print_readiness(config: &CliProfilesConfig, profile_name: &str) {
    let Some(profile) = config.profile(profile_name) else {
        return;
    };
    let mut missing_fields = Vec::new();
    if profile.supabase_url().is_none() {
        missing_fields.push("supabase_url");
    }
    if profile.supabase_anon_key().is_none() {
        missing_fields.push("supabase_anon_key");
    }
    if missing_fields.is_empty() {
        println!(
            "Profile '{profile_name}' is ready. Run `breedlog auth login --email <email> --password <password>`."
        );
    } else {
        println!(
            "Profile '{}' is missing: {}",
            profile_name,
            missing_fields.join(", ")
        );
    }
}

pub fn describe_profile(profile_name: &str, profile: &CliProfile) -> Vec<String> {
    let unset = || "(not set)".to_string();
    vec![
        format!("profile:           {profile_name}"),
        format!(
            "supabase_url:      {}",
            profile.supabase_url().unwrap_or_else(unset)
        ),
        format!(
            "supabase_anon_key: {}",
            profile
                .supabase_anon_key()
                .map_or_else(unset, |key| mask_secret(&key))
        ),
        format!(
            "storage_bucket:    {}",
            profile.storage_bucket().unwrap_or_else(|| format!(
                "{} (default)",
                breedlog_core::config::DEFAULT_STORAGE_BUCKET
            ))
        ),
    ]
}

fn mask_secret(value: &str) -> String {
    let visible = value.chars().take(6).collect::<String>();
    format!("{visible}...")
}

fn validate_profile_urls(profile: &CliProfile) -> Result<(), CliError> {
    if let Some(url) = profile.supabase_url() {
        if !is_http_url(&url) {
            return Err(CliError::Config(
                "supabase_url must include http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}
