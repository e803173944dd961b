//! Classifier port: Trait for the trained models behind the API.
//!
//! Models are loaded once and evaluated concurrently, so implementations must
//! be immutable after construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::FeatureSpec;

/// What a model can produce, decided once when the model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCapability {
    /// Native per-class probabilities
    Probability,
    /// A single decision score, mapped to probabilities with a logistic link
    DecisionScore,
}

/// Errors raised while evaluating a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Feature dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Operation not supported by model '{0}'")]
    Unsupported(String),

    #[error("Model produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("Invalid model artifact: {0}")]
    InvalidArtifact(String),
}

/// Tolerance for probabilities summing to one.
const SUM_TOLERANCE: f64 = 1e-6;

/// A trained binary classifier.
pub trait Classifier: Send + Sync {
    /// Model name, for logs and second opinions.
    fn name(&self) -> &str;

    /// Version string declared by the artifact, if any.
    fn version(&self) -> Option<&str> {
        None
    }

    fn capability(&self) -> ModelCapability;

    /// Class codes in output-column order.
    fn classes(&self) -> &[i64];

    /// Number of input features.
    fn n_features(&self) -> usize;

    /// Per-class probabilities in `classes()` order.
    ///
    /// # Errors
    /// Returns `Unsupported` unless the model is probability-capable.
    fn predict_proba(&self, _features: &[f64]) -> Result<Vec<f64>, ModelError> {
        Err(ModelError::Unsupported(self.name().to_string()))
    }

    /// Signed decision score; positive favours the second class.
    ///
    /// # Errors
    /// Returns `Unsupported` if the model has no decision function.
    fn decision_function(&self, _features: &[f64]) -> Result<f64, ModelError> {
        Err(ModelError::Unsupported(self.name().to_string()))
    }
}

/// Trait for feature preprocessing fitted alongside the model.
pub trait FeatureScaler: Send + Sync {
    /// Transform a raw feature vector into model space.
    ///
    /// # Errors
    /// Returns `DimensionMismatch` if the vector has the wrong length.
    fn transform(&self, features: &[f64]) -> Result<Vec<f64>, ModelError>;
}

/// Everything loaded from an artifact store.
pub struct ModelBundle {
    pub primary: Arc<dyn Classifier>,
    pub secondary: Option<Arc<dyn Classifier>>,
    pub scaler: Option<Arc<dyn FeatureScaler>>,
    pub feature_spec: FeatureSpec,
    /// Class code → display label
    pub label_mapping: BTreeMap<i64, String>,
}

/// Per-class probabilities for any classifier.
///
/// Probability-capable models are queried directly; decision-only models go
/// through `p = 1 / (1 + e^-score)` and yield `[1 - p, p]`. The output is
/// checked: one finite value in [0, 1] per class, summing to one.
///
/// # Errors
/// Returns `ModelError` if the model fails or its output is malformed.
pub fn class_probabilities(
    model: &dyn Classifier,
    features: &[f64],
) -> Result<Vec<f64>, ModelError> {
    if features.len() != model.n_features() {
        return Err(ModelError::DimensionMismatch {
            expected: model.n_features(),
            got: features.len(),
        });
    }

    let probabilities = match model.capability() {
        ModelCapability::Probability => model.predict_proba(features)?,
        ModelCapability::DecisionScore => {
            let score = model.decision_function(features)?;
            if !score.is_finite() {
                return Err(ModelError::InvalidOutput(format!(
                    "non-finite decision score from '{}'",
                    model.name()
                )));
            }
            let p = sigmoid(score);
            vec![1.0 - p, p]
        }
    };

    validate(model, &probabilities)?;
    Ok(probabilities)
}

/// Logistic link.
#[must_use]
pub fn sigmoid(score: f64) -> f64 {
    1.0 / (1.0 + (-score).exp())
}

fn validate(model: &dyn Classifier, probabilities: &[f64]) -> Result<(), ModelError> {
    if probabilities.len() != model.classes().len() || probabilities.len() < 2 {
        return Err(ModelError::InvalidOutput(format!(
            "'{}' returned {} columns for {} classes",
            model.name(),
            probabilities.len(),
            model.classes().len()
        )));
    }
    if probabilities
        .iter()
        .any(|p| !p.is_finite() || *p < 0.0 || *p > 1.0)
    {
        return Err(ModelError::InvalidOutput(format!(
            "'{}' returned a probability outside [0, 1]",
            model.name()
        )));
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > SUM_TOLERANCE {
        return Err(ModelError::InvalidOutput(format!(
            "'{}' probabilities sum to {sum}",
            model.name()
        )));
    }
    Ok(())
}
