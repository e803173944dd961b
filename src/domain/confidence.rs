//! Composite confidence for a single assessment.

use serde::{Deserialize, Serialize};

use super::attribution::AttributionSet;

const PRIMARY_WEIGHT: f64 = 0.50;
const ENTROPY_WEIGHT: f64 = 0.20;
const AGREEMENT_WEIGHT: f64 = 0.20;
const ATTRIBUTION_WEIGHT: f64 = 0.10;

/// Neutral score used when a signal is unavailable.
const NEUTRAL: f64 = 0.5;

const ENTROPY_EPSILON: f64 = 1e-12;

/// Confidence signals and their weighted combination. All values in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBundle {
    pub primary: f64,
    pub entropy_adjusted: f64,
    pub model_agreement: f64,
    pub attribution_strength: f64,
    #[serde(rename = "final")]
    pub final_: f64,
}

impl ConfidenceBundle {
    /// Combine the individual signals.
    ///
    /// Non-finite inputs count as zero and every output is clamped.
    #[must_use]
    pub fn synthesize(
        primary: f64,
        entropy_adjusted: f64,
        model_agreement: f64,
        attribution_strength: f64,
    ) -> Self {
        let primary = unit(primary);
        let entropy_adjusted = unit(entropy_adjusted);
        let model_agreement = unit(model_agreement);
        let attribution_strength = unit(attribution_strength);

        let final_ = unit(
            PRIMARY_WEIGHT * primary
                + ENTROPY_WEIGHT * entropy_adjusted
                + AGREEMENT_WEIGHT * model_agreement
                + ATTRIBUTION_WEIGHT * attribution_strength,
        );

        Self {
            primary,
            entropy_adjusted,
            model_agreement,
            attribution_strength,
            final_,
        }
    }
}

/// One minus the normalized binary entropy of the class distribution.
#[must_use]
pub fn entropy_confidence(probabilities: &[f64]) -> f64 {
    let entropy: f64 = probabilities
        .iter()
        .map(|p| finite_or_zero(*p))
        .map(|p| -p * (p + ENTROPY_EPSILON).ln())
        .sum();
    unit(1.0 - entropy / std::f64::consts::LN_2)
}

/// Agreement between primary and secondary confidence, neutral without a
/// second opinion.
#[must_use]
pub fn model_agreement(primary: f64, secondary: Option<f64>) -> f64 {
    match secondary {
        Some(secondary) => unit(1.0 - (finite_or_zero(primary) - finite_or_zero(secondary)).abs()),
        None => NEUTRAL,
    }
}

/// Mean absolute impact of the reported factors, capped at 1.
#[must_use]
pub fn attribution_strength(attributions: &AttributionSet) -> f64 {
    attributions.mean_abs_impact().map_or(NEUTRAL, unit)
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

fn unit(x: f64) -> f64 {
    finite_or_zero(x).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attribution::AttributionSource;
    use crate::domain::features::{FeatureSpec, FeatureVector};

    #[test]
    fn test_certain_prediction_has_full_entropy_confidence() {
        assert!((entropy_confidence(&[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert!((entropy_confidence(&[1.0, 0.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_uniform_prediction_has_no_entropy_confidence() {
        assert!(entropy_confidence(&[0.5, 0.5]).abs() < 1e-9);
    }

    #[test]
    fn test_weights() {
        let bundle = ConfidenceBundle::synthesize(0.8, 0.4, 0.5, 0.3);
        let expected = 0.5 * 0.8 + 0.2 * 0.4 + 0.2 * 0.5 + 0.1 * 0.3;
        assert!((bundle.final_ - expected).abs() < 1e-12);
    }

    #[test]
    fn test_final_stays_in_unit_interval() {
        let inputs = [-3.0, -0.1, 0.0, 0.3, 1.0, 1.7, 42.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY];
        for a in inputs {
            for b in inputs {
                let bundle = ConfidenceBundle::synthesize(a, b, a, b);
                assert!((0.0..=1.0).contains(&bundle.final_), "{a} {b}");
                assert!((0.0..=1.0).contains(&bundle.primary));
            }
        }
    }

    #[test]
    fn test_model_agreement() {
        assert!((model_agreement(0.65, Some(0.9)) - 0.75).abs() < 1e-12);
        assert!((model_agreement(0.65, None) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_attribution_strength() {
        let spec = FeatureSpec::new(["TB", "ALB"]).expect("spec");
        let raw = FeatureVector::new(vec![3.0, 2.0]);

        let strong = AttributionSet::from_scores(&spec, &[2.5, -1.5], &raw, AttributionSource::Magnitude);
        assert!((attribution_strength(&strong) - 1.0).abs() < f64::EPSILON);

        let weak = AttributionSet::from_scores(&spec, &[0.1, -0.3], &raw, AttributionSource::Shapley);
        assert!((attribution_strength(&weak) - 0.2).abs() < 1e-12);

        let empty = AttributionSet::empty(AttributionSource::Magnitude);
        assert!((attribution_strength(&empty) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_final_serialized_name() {
        let json = serde_json::to_value(ConfidenceBundle::synthesize(1.0, 1.0, 1.0, 1.0)).expect("serialize");
        let final_ = json["final"].as_f64().expect("final is a number");
        assert!((final_ - 1.0).abs() < 1e-12);
        assert!(json.get("final_").is_none());
    }
}
