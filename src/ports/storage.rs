//! Storage port: Trait for persisting prediction records.
//!
//! This trait abstracts the storage backend (SQLite) from the application logic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Assessment, RiskTier};

/// Source tag for predictions served over HTTP.
pub const SOURCE_API: &str = "api";

/// One stored prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Random UUID v4
    pub id: String,
    pub patient_id: String,
    /// Raw request values keyed by canonical feature name
    pub features: BTreeMap<String, f64>,
    pub predicted_label: String,
    /// Disease probability
    pub probability: f64,
    pub risk_level: RiskTier,
    /// Audit fingerprint of the assessment
    pub record_hash: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    /// Record for an assembled assessment.
    #[must_use]
    pub fn from_assessment(
        assessment: &Assessment,
        features: BTreeMap<String, f64>,
        source: &str,
    ) -> Self {
        Self {
            id: crate::domain::audit::new_record_id(),
            patient_id: assessment.patient_id.clone(),
            features,
            predicted_label: assessment.prediction.clone(),
            probability: assessment.disease_probability,
            risk_level: assessment.risk_level,
            record_hash: assessment.hash.clone(),
            source: source.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Trait for prediction persistence.
///
/// Sensitive fields are expected to be encrypted at rest by implementations.
pub trait PredictionStore: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Save a prediction record.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn save_prediction(&self, record: &PredictionRecord) -> Result<(), Self::Error>;

    /// Load the most recent records (up to `limit`), newest first.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn load_recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, Self::Error>;

    /// Get the total number of stored predictions.
    ///
    /// # Errors
    /// Returns error if storage operation fails.
    fn count_predictions(&self) -> Result<usize, Self::Error>;
}
