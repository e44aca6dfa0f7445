use std::path::Path;

use breedlog_core::{PredictionRecord, UserId};

use crate::commands::common::{
    format_record_lines, open_store, record_to_list_item, resolve_profile, signed_in_user,
    RecordListItem,
};
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    as_json: bool,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let profile = resolve_profile(profile)?;
    let user_id = signed_in_user(&profile.name)?;
    let records = list_records(limit, db_path, &user_id).await?;

    if as_json {
        let json_items = records
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if records.is_empty() {
        println!("No predictions recorded yet.");
    } else {
        for line in format_record_lines(&records) {
            println!("{line}");
        }
    }

    Ok(())
}

pub async fn list_records(
    limit: usize,
    db_path: &Path,
    user_id: &UserId,
) -> Result<Vec<PredictionRecord>, CliError> {
    let store = open_store(db_path)?;
    let mut records = store.list(user_id).await?;
    records.truncate(limit);
    Ok(records)
}
