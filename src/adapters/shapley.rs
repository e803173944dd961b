//! Exact Shapley attributions against an all-zero reference row.
//!
//! The value of a coalition `S` is the target-class probability of the input
//! with features outside `S` replaced by zero. With scaled inputs, zero is the
//! training mean. Every coalition is evaluated, so the feature count is capped.

use std::sync::Arc;

use crate::ports::{class_probabilities, Attributor, Classifier, ExplainerError, ExplainerFactory};

/// Largest feature count for exact enumeration (2^16 model evaluations).
pub const MAX_EXACT_FEATURES: usize = 16;

/// Explainer for one model and one output column.
pub struct ShapleyExplainer {
    model: Arc<dyn Classifier>,
    n_features: usize,
    target_column: usize,
    /// Model output on the reference row
    base_value: f64,
    /// `weights[s] = s! (n - s - 1)! / n!`
    weights: Vec<f64>,
}

impl ShapleyExplainer {
    /// Build the explainer, evaluating the reference row once.
    ///
    /// # Errors
    /// Returns `Construction` if the model does not fit the explainer limits
    /// or cannot be evaluated on the reference row.
    pub fn new(
        model: Arc<dyn Classifier>,
        n_features: usize,
        target_column: usize,
    ) -> Result<Self, ExplainerError> {
        if n_features == 0 || n_features > MAX_EXACT_FEATURES {
            return Err(ExplainerError::Construction(format!(
                "exact attribution supports 1..={MAX_EXACT_FEATURES} features, got {n_features}"
            )));
        }
        if model.n_features() != n_features {
            return Err(ExplainerError::Construction(format!(
                "model '{}' expects {} features, got {n_features}",
                model.name(),
                model.n_features()
            )));
        }
        if target_column >= model.classes().len() {
            return Err(ExplainerError::Construction(format!(
                "target column {target_column} out of range"
            )));
        }

        let reference = vec![0.0; n_features];
        let base_value = evaluate(model.as_ref(), &reference, target_column)
            .map_err(|e| ExplainerError::Construction(e.to_string()))?;

        Ok(Self {
            weights: coalition_weights(n_features),
            model,
            n_features,
            target_column,
            base_value,
        })
    }

    /// Model output on the reference row.
    #[must_use]
    pub fn base_value(&self) -> f64 {
        self.base_value
    }
}

impl Attributor for ShapleyExplainer {
    fn attribute(&self, features: &[f64]) -> Result<Vec<f64>, ExplainerError> {
        let n = self.n_features;
        if features.len() != n {
            return Err(ExplainerError::Computation(format!(
                "expected {n} features, got {}",
                features.len()
            )));
        }

        // Coalition values indexed by bitmask; the empty coalition is cached.
        let coalitions = 1usize << n;
        let mut values = vec![0.0; coalitions];
        values[0] = self.base_value;
        let mut masked = vec![0.0; n];
        for (mask, value) in values.iter_mut().enumerate().skip(1) {
            for (i, slot) in masked.iter_mut().enumerate() {
                *slot = if mask & (1 << i) != 0 { features[i] } else { 0.0 };
            }
            *value = evaluate(self.model.as_ref(), &masked, self.target_column)?;
        }

        let mut phi = vec![0.0; n];
        for mask in 0..coalitions {
            let size = mask.count_ones() as usize;
            if size == n {
                continue;
            }
            let weight = self.weights[size];
            for (i, contribution) in phi.iter_mut().enumerate() {
                let bit = 1 << i;
                if mask & bit == 0 {
                    *contribution += weight * (values[mask | bit] - values[mask]);
                }
            }
        }
        Ok(phi)
    }
}

/// Factory handed to the registry for lazy construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapleyFactory;

impl ExplainerFactory for ShapleyFactory {
    fn supports(&self, model: &dyn Classifier, n_features: usize) -> bool {
        (1..=MAX_EXACT_FEATURES).contains(&n_features) && model.n_features() == n_features
    }

    fn build(
        &self,
        model: Arc<dyn Classifier>,
        n_features: usize,
        target_column: usize,
    ) -> Result<Arc<dyn Attributor>, ExplainerError> {
        let explainer = ShapleyExplainer::new(model, n_features, target_column)?;
        tracing::debug!(
            "Built Shapley explainer ({n_features} features, base value {:.4})",
            explainer.base_value()
        );
        Ok(Arc::new(explainer))
    }
}

fn evaluate(model: &dyn Classifier, features: &[f64], column: usize) -> Result<f64, ExplainerError> {
    let probabilities =
        class_probabilities(model, features).map_err(|e| ExplainerError::Computation(e.to_string()))?;
    probabilities
        .get(column)
        .copied()
        .ok_or_else(|| ExplainerError::Computation(format!("missing output column {column}")))
}

/// `w(s) = 1 / (n * C(n - 1, s))`, equal to `s! (n - s - 1)! / n!`.
fn coalition_weights(n: usize) -> Vec<f64> {
    let mut weights = Vec::with_capacity(n);
    let mut binomial = 1.0_f64;
    for s in 0..n {
        weights.push(1.0 / (n as f64 * binomial));
        // C(n-1, s+1) = C(n-1, s) * (n-1-s) / (s+1)
        binomial = binomial * (n - 1 - s) as f64 / (s + 1) as f64;
    }
    weights
}
