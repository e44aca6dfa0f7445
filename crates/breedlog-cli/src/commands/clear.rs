use std::path::Path;

use breedlog_core::UserId;

use crate::commands::common::{open_store, resolve_profile, signed_in_user};
use crate::error::CliError;

pub async fn run_clear(yes: bool, db_path: &Path, profile: Option<&str>) -> Result<(), CliError> {
    if !yes {
        return Err(CliError::ConfirmationRequired);
    }

    let profile = resolve_profile(profile)?;
    let user_id = signed_in_user(&profile.name)?;
    clear_history(db_path, &user_id).await?;
    println!("Cleared local history for profile '{}'", profile.name);
    Ok(())
}

/// Remove the user's records and sync cursor; other accounts are untouched.
pub async fn clear_history(db_path: &Path, user_id: &UserId) -> Result<(), CliError> {
    open_store(db_path)?.clear(user_id).await?;
    Ok(())
}
