//! Explainer port: per-feature attribution of the disease probability.

use std::sync::Arc;

use thiserror::Error;

use super::classifier::Classifier;

/// Why attributions could not be produced. Every variant has a fallback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExplainerError {
    #[error("Explainer not available for this model")]
    Unavailable,

    #[error("Explainer construction throttled after a recent failure")]
    Throttled,

    #[error("Explainer construction in progress")]
    Busy,

    #[error("Explainer construction failed: {0}")]
    Construction(String),

    #[error("Attribution failed: {0}")]
    Computation(String),
}

/// A constructed explainer bound to one model.
pub trait Attributor: Send + Sync {
    /// Signed attribution per feature, in feature order.
    ///
    /// # Errors
    /// Returns `Computation` if the model cannot be evaluated.
    fn attribute(&self, features: &[f64]) -> Result<Vec<f64>, ExplainerError>;
}

/// Builds explainers. Construction may be expensive.
pub trait ExplainerFactory: Send + Sync {
    /// Whether `model` can be explained at all, checked without building.
    fn supports(&self, _model: &dyn Classifier, _n_features: usize) -> bool {
        true
    }

    /// Build an explainer of `model`'s `target_column` probability.
    ///
    /// # Errors
    /// Returns `Construction` if the explainer cannot be built.
    fn build(
        &self,
        model: Arc<dyn Classifier>,
        n_features: usize,
        target_column: usize,
    ) -> Result<Arc<dyn Attributor>, ExplainerError>;
}
