//! The assessment returned for one prediction request.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::attribution::{Attribution, AttributionSet, AttributionSource};
use super::confidence::ConfidenceBundle;
use super::prediction::{SecondOpinion, LOW_CONFIDENCE_THRESHOLD};
use super::risk::{PredictedClass, RiskTier};

/// Note returned instead of a second opinion when no secondary model exists.
pub const NO_SECONDARY_MODEL_NOTE: &str =
    "Prediction confidence is low and no alternative model is available for a second opinion.";

const MEDICAL_WARNING: &str = "Prediction confidence is low. This result is not a diagnosis; \
     please confirm with laboratory retesting and a medical professional.";

/// Full response for one patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub patient_id: String,

    /// Display label of the primary prediction
    pub prediction: String,
    pub predicted_class: PredictedClass,

    pub disease_probability: f64,

    /// Confidence of the primary model (max class probability)
    pub probability_primary: f64,

    pub class_probabilities: BTreeMap<String, f64>,
    pub risk_level: RiskTier,

    pub top_factors: Vec<Attribution>,
    pub explanation_source: AttributionSource,
    pub explanation_text: String,

    pub confidence: ConfidenceBundle,
    pub confidence_final: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_opinion: Option<SecondOpinion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_warning: Option<String>,

    pub food_recommendations: Vec<String>,
    pub model_version: String,

    /// Audit fingerprint
    pub hash: String,
}

/// Warning attached when neither model is confident enough.
#[must_use]
pub fn medical_warning(primary_confidence: f64, second: Option<&SecondOpinion>) -> Option<String> {
    if primary_confidence >= LOW_CONFIDENCE_THRESHOLD {
        return None;
    }
    let reassured = second
        .and_then(SecondOpinion::confidence)
        .is_some_and(|c| c >= LOW_CONFIDENCE_THRESHOLD);
    if reassured {
        None
    } else {
        Some(MEDICAL_WARNING.to_string())
    }
}

/// One-paragraph summary of the prediction and its main factors.
#[must_use]
pub fn explanation_text(
    prediction: &str,
    disease_probability: f64,
    tier: RiskTier,
    attributions: &AttributionSet,
) -> String {
    let mut text = format!(
        "The model predicts {prediction} with a disease probability of {:.1}% (risk level: {tier}, {}).",
        disease_probability * 100.0,
        tier.description()
    );

    if attributions.is_empty() {
        text.push_str(" No individual factor could be singled out.");
    } else {
        let lead = match attributions.source() {
            AttributionSource::Shapley => " Main contributing factors:",
            AttributionSource::Magnitude => " Most prominent lab values:",
        };
        text.push_str(lead);
        for a in attributions.items() {
            text.push(' ');
            text.push_str(&a.explanation);
        }
    }
    text
}
