//! Per-feature attribution of a single prediction.

use serde::{Deserialize, Serialize};

use super::features::{FeatureSpec, FeatureVector};

/// Number of factors reported per prediction.
pub const MAX_ATTRIBUTIONS: usize = 3;

const STRONG_IMPACT: f64 = 0.5;
const MODERATE_IMPACT: f64 = 0.2;

/// How the attribution scores were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionSource {
    /// Shapley values of the disease probability
    Shapley,
    /// Scaled feature magnitudes (explainer unavailable)
    Magnitude,
}

/// One contributing factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub feature: String,
    pub impact: f64,
    pub explanation: String,
}

/// Top factors of a prediction, strongest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionSet {
    items: Vec<Attribution>,
    source: AttributionSource,
}

impl AttributionSet {
    /// Select the strongest scores and describe them.
    ///
    /// `scores` and `raw` are laid out in `spec` order. Non-finite scores are
    /// ignored.
    #[must_use]
    pub fn from_scores(
        spec: &FeatureSpec,
        scores: &[f64],
        raw: &FeatureVector,
        source: AttributionSource,
    ) -> Self {
        let mut ranked: Vec<(usize, f64)> = scores
            .iter()
            .copied()
            .enumerate()
            .take(spec.len())
            .filter(|(_, s)| s.is_finite())
            .collect();

        // Stable sort keeps spec order among equal magnitudes.
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));

        let items = ranked
            .into_iter()
            .take(MAX_ATTRIBUTIONS)
            .map(|(i, impact)| {
                let feature = spec.names()[i].clone();
                let value = raw.as_slice().get(i).copied();
                Attribution {
                    explanation: describe(&feature, value, impact),
                    feature,
                    impact,
                }
            })
            .collect();

        Self { items, source }
    }

    #[must_use]
    pub fn empty(source: AttributionSource) -> Self {
        Self {
            items: Vec::new(),
            source,
        }
    }

    #[must_use]
    pub fn items(&self) -> &[Attribution] {
        &self.items
    }

    #[must_use]
    pub fn source(&self) -> AttributionSource {
        self.source
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Mean absolute impact, `None` when empty.
    #[must_use]
    pub fn mean_abs_impact(&self) -> Option<f64> {
        if self.items.is_empty() {
            return None;
        }
        let total: f64 = self.items.iter().map(|a| a.impact.abs()).sum();
        Some(total / self.items.len() as f64)
    }

    #[must_use]
    pub fn into_items(self) -> Vec<Attribution> {
        self.items
    }
}

/// Sentence describing one factor's effect on the prediction.
#[must_use]
pub fn describe(feature: &str, value: Option<f64>, impact: f64) -> String {
    let strength = if impact.abs() > STRONG_IMPACT {
        "strongly"
    } else if impact.abs() > MODERATE_IMPACT {
        "moderately"
    } else {
        "slightly"
    };
    let direction = if impact > 0.0 { "increased" } else { "reduced" };

    match value {
        Some(v) => format!(
            "{feature} ({v}) {strength} {direction} the likelihood of liver disease."
        ),
        None => format!("{feature} {strength} {direction} the likelihood of liver disease."),
    }
}
