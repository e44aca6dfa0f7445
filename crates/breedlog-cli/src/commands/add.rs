use std::path::Path;

use breedlog_core::capture::{load_classifier_with_retry, CaptureService, PrecomputedClassifier};
use breedlog_core::{PredictionRecord, UserId};

use crate::commands::common::{open_store, resolve_profile, signed_in_user};
use crate::error::CliError;

pub async fn run_add(
    image: &Path,
    result: Option<&Path>,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let profile = resolve_profile(profile)?;
    let user_id = signed_in_user(&profile.name)?;
    let record = add_prediction(image, result, db_path, &user_id).await?;

    let top = &record.prediction_result.top_prediction;
    println!(
        "Recorded {} ({:.1}%) as {}",
        top.breed,
        top.confidence * 100.0,
        record.id
    );
    println!("Saved locally; run `breedlog sync` to upload.");
    Ok(())
}

pub async fn add_prediction(
    image: &Path,
    result: Option<&Path>,
    db_path: &Path,
    user_id: &UserId,
) -> Result<PredictionRecord, CliError> {
    let mut classifier = match result {
        Some(path) => PrecomputedClassifier::with_result_path(path),
        None => PrecomputedClassifier::new(),
    };
    load_classifier_with_retry(&mut classifier).await?;

    let service = CaptureService::new(open_store(db_path)?, classifier);
    Ok(service.record(image, user_id).await?)
}
