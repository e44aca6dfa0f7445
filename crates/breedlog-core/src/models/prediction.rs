//! Classifier output carried by a record

use serde::{Deserialize, Serialize};

/// One label with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreedScore {
    pub breed: String,
    pub confidence: f64,
}

/// Structured payload produced by the inference step.
///
/// The sync engine never interprets it; unknown fields are kept so the
/// payload round-trips unchanged between devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub top_prediction: BreedScore,
    #[serde(default)]
    pub top_k: Vec<BreedScore>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PredictionResult {
    /// Build a result from a top-k list ordered best first.
    ///
    /// Returns `None` for an empty list.
    #[must_use]
    pub fn from_ranked(top_k: Vec<BreedScore>) -> Option<Self> {
        let top_prediction = top_k.first()?.clone();
        Some(Self {
            top_prediction,
            top_k,
            extra: serde_json::Map::new(),
        })
    }

    #[must_use]
    pub fn top_confidence(&self) -> f64 {
        self.top_prediction.confidence
    }
}
