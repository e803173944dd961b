//! Model prediction types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::risk::PredictedClass;

/// Confidence below which a prediction is considered uncertain.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.70;

/// Output of one classifier for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Output column chosen by the model
    pub predicted_index: usize,

    /// Display label of the predicted column
    pub predicted_label: String,

    pub predicted_class: PredictedClass,

    /// Per-column probabilities (sum to 1)
    pub class_probabilities: Vec<f64>,

    /// Probability of the disease column
    pub disease_probability: f64,
}

impl PredictionResult {
    /// Build a result from validated per-column probabilities.
    ///
    /// `column_labels[i]` is the display label of column `i`. The predicted
    /// column is the most probable one; ties go to the lower index.
    #[must_use]
    pub fn from_probabilities(
        class_probabilities: Vec<f64>,
        disease_index: usize,
        column_labels: &[String],
    ) -> Self {
        let predicted_index = class_probabilities
            .iter()
            .enumerate()
            .fold(0, |best, (i, p)| if *p > class_probabilities[best] { i } else { best });

        let predicted_label = column_labels
            .get(predicted_index)
            .cloned()
            .unwrap_or_else(|| predicted_index.to_string());

        let predicted_class = if predicted_index == disease_index {
            PredictedClass::Disease
        } else {
            PredictedClass::NoDisease
        };

        let disease_probability = class_probabilities
            .get(disease_index)
            .copied()
            .unwrap_or(0.0);

        Self {
            predicted_index,
            predicted_label,
            predicted_class,
            class_probabilities,
            disease_probability,
        }
    }

    /// Probability of the predicted column.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.class_probabilities
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }

    #[must_use]
    pub fn is_low_confidence(&self) -> bool {
        self.confidence() < LOW_CONFIDENCE_THRESHOLD
    }

    /// Probabilities keyed by display label.
    #[must_use]
    pub fn labelled_probabilities(&self, column_labels: &[String]) -> BTreeMap<String, f64> {
        self.class_probabilities
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let label = column_labels.get(i).cloned().unwrap_or_else(|| i.to_string());
                (label, *p)
            })
            .collect()
    }
}

/// Outcome of consulting the secondary model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SecondOpinion {
    /// The secondary model produced a prediction.
    Opinion {
        model: String,
        prediction: String,
        disease_probability: f64,
        confidence: f64,
    },
    /// No secondary model is configured.
    Unavailable { note: String },
    /// The secondary model failed; the primary prediction still stands.
    Failed { model: String, error: String },
}

impl SecondOpinion {
    /// Confidence of a successful second opinion.
    #[must_use]
    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::Opinion { confidence, .. } => Some(*confidence),
            _ => None,
        }
    }
}
