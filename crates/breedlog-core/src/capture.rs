//! Capture gate: classify an image and record the prediction locally.
//!
//! Only predictions the classifier is reasonably sure about become
//! records; everything else is rejected before touching the store.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::db::{KeyValueStore, LocalRecordStore};
use crate::models::{BreedScore, NewPrediction, PredictionRecord, PredictionResult, UserId};

/// Results whose top confidence falls below this are not recorded.
pub const MIN_CONFIDENCE: f64 = 0.25;
pub const MODEL_LOAD_ATTEMPTS: u32 = 3;
pub const MODEL_LOAD_BACKOFF: Duration = Duration::from_secs(1);

const SIDECAR_SUFFIX: &str = ".prediction.json";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Classifier failed: {0}")]
    Classifier(String),
    #[error("Model failed to load after {attempts} attempts: {last_error}")]
    ModelLoad { attempts: u32, last_error: String },
    #[error("Image not found: {0}")]
    ImageNotFound(PathBuf),
    #[error("Classifier returned no prediction")]
    NoPrediction,
    #[error("Low confidence ({confidence:.2}) for '{breed}'; try another photo")]
    LowConfidence { breed: String, confidence: f64 },
    #[error(transparent)]
    Storage(#[from] crate::Error),
}

/// On-device (or external) image classifier.
#[allow(async_fn_in_trait)]
pub trait Classifier {
    /// Prepare the model. May fail transiently.
    async fn load(&mut self) -> Result<(), CaptureError>;

    async fn predict(&self, image_path: &Path) -> Result<PredictionResult, CaptureError>;
}

/// Load a classifier with the default policy (3 attempts, 1s apart).
pub async fn load_classifier_with_retry<C: Classifier>(
    classifier: &mut C,
) -> Result<(), CaptureError> {
    load_with_policy(classifier, MODEL_LOAD_ATTEMPTS, MODEL_LOAD_BACKOFF).await
}

/// Load a classifier, retrying with a fixed backoff. Returns the last error.
pub async fn load_with_policy<C: Classifier>(
    classifier: &mut C,
    attempts: u32,
    backoff: Duration,
) -> Result<(), CaptureError> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match classifier.load().await {
            Ok(()) => {
                tracing::debug!("Classifier loaded on attempt {}", attempt);
                return Ok(());
            }
            Err(error) => {
                tracing::warn!(
                    "Classifier load attempt {}/{} failed: {}",
                    attempt,
                    attempts,
                    error
                );
                last_error = error.to_string();
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(CaptureError::ModelLoad {
        attempts,
        last_error,
    })
}

/// Classifies images and saves accepted predictions for a user.
pub struct CaptureService<S, C> {
    store: LocalRecordStore<S>,
    classifier: C,
    min_confidence: f64,
}

impl<S: KeyValueStore, C: Classifier> CaptureService<S, C> {
    pub const fn new(store: LocalRecordStore<S>, classifier: C) -> Self {
        Self {
            store,
            classifier,
            min_confidence: MIN_CONFIDENCE,
        }
    }

    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub const fn store(&self) -> &LocalRecordStore<S> {
        &self.store
    }

    /// Classify `image_path` and save it as a pending record for `user_id`.
    pub async fn record(
        &self,
        image_path: &Path,
        user_id: &UserId,
    ) -> Result<PredictionRecord, CaptureError> {
        let image_path = tokio::fs::canonicalize(image_path)
            .await
            .map_err(|_| CaptureError::ImageNotFound(image_path.to_path_buf()))?;

        let result = self.classifier.predict(&image_path).await?;
        self.accept(&result)?;

        let image_uri = format!("file://{}", image_path.display());
        let record = self
            .store
            .save(NewPrediction::now(image_uri, result), user_id)
            .await?;
        tracing::info!(
            "Recorded {} ({:.2}) as {}",
            record.prediction_result.top_prediction.breed,
            record.prediction_result.top_confidence(),
            record.id
        );
        Ok(record)
    }

    fn accept(&self, result: &PredictionResult) -> Result<(), CaptureError> {
        let top = &result.top_prediction;
        if top.breed.trim().is_empty() {
            return Err(CaptureError::NoPrediction);
        }
        let confidence = result.top_confidence();
        if !confidence.is_finite() || confidence < self.min_confidence {
            return Err(CaptureError::LowConfidence {
                breed: top.breed.clone(),
                confidence,
            });
        }
        Ok(())
    }
}

/// Reads predictions written by an external model runner.
///
/// By default the result for `cow.jpg` is expected at
/// `cow.jpg.prediction.json`; an explicit path overrides that.
#[derive(Debug, Clone, Default)]
pub struct PrecomputedClassifier {
    result_path: Option<PathBuf>,
}

impl PrecomputedClassifier {
    #[must_use]
    pub const fn new() -> Self {
        Self { result_path: None }
    }

    #[must_use]
    pub fn with_result_path(path: impl Into<PathBuf>) -> Self {
        Self {
            result_path: Some(path.into()),
        }
    }

    #[must_use]
    pub fn sidecar_path(image_path: &Path) -> PathBuf {
        let mut name: OsString = image_path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }
}

#[derive(Deserialize)]
struct RawPrediction {
    top_prediction: Option<BreedScore>,
    #[serde(default)]
    top_k: Vec<BreedScore>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl RawPrediction {
    fn into_result(self) -> Option<PredictionResult> {
        let mut result = match self.top_prediction {
            Some(top_prediction) => PredictionResult {
                top_prediction,
                top_k: self.top_k,
                extra: serde_json::Map::new(),
            },
            None => PredictionResult::from_ranked(self.top_k)?,
        };
        result.extra = self.extra;
        Some(result)
    }
}

impl Classifier for PrecomputedClassifier {
    async fn load(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    async fn predict(&self, image_path: &Path) -> Result<PredictionResult, CaptureError> {
        let path = self
            .result_path
            .clone()
            .unwrap_or_else(|| Self::sidecar_path(image_path));
        let raw = tokio::fs::read_to_string(&path).await.map_err(|error| {
            CaptureError::Classifier(format!(
                "failed to read prediction file {}: {error}",
                path.display()
            ))
        })?;
        let parsed: RawPrediction = serde_json::from_str(&raw).map_err(|error| {
            CaptureError::Classifier(format!(
                "invalid prediction file {}: {error}",
                path.display()
            ))
        })?;
        parsed.into_result().ok_or(CaptureError::NoPrediction)
    }
}
