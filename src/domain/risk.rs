//! Risk tier classification.
//!
//! The tier vocabulary depends on the predicted class: a "no disease"
//! prediction is graded by how healthy the patient looks, a "disease"
//! prediction by how likely the disease is. Boundaries are clinically
//! meaningful and must not drift.

use serde::{Deserialize, Serialize};

/// Binary outcome of the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedClass {
    NoDisease,
    Disease,
}

/// Human-facing risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    /// Confidently healthy
    Low,
    /// Probably healthy
    Medium,
    /// Either branch, near the decision boundary
    Borderline,
    Mild,
    Moderate,
    High,
}

impl RiskTier {
    /// Tier for a "no disease" prediction given the healthy-class probability.
    #[must_use]
    pub fn for_no_disease(healthy_probability: f64) -> Self {
        if healthy_probability > 0.85 {
            Self::Low
        } else if healthy_probability >= 0.60 {
            Self::Medium
        } else {
            Self::Borderline
        }
    }

    /// Tier for a "disease" prediction given the disease probability.
    #[must_use]
    pub fn for_disease(disease_probability: f64) -> Self {
        if disease_probability >= 0.90 {
            Self::High
        } else if disease_probability >= 0.70 {
            Self::Moderate
        } else if disease_probability >= 0.50 {
            Self::Mild
        } else {
            Self::Borderline
        }
    }

    /// Get a human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Low => "Low risk - no significant indicators of liver disease",
            Self::Medium => "Medium risk - routine follow-up recommended",
            Self::Borderline => "Borderline - results close to the decision boundary, retest advised",
            Self::Mild => "Mild risk - early indicators present, follow-up recommended",
            Self::Moderate => "Moderate risk - hepatology consultation recommended",
            Self::High => "High risk - immediate clinical evaluation advised",
        }
    }

    /// Whether the tier belongs to the disease branch vocabulary.
    #[must_use]
    pub fn is_disease_branch(&self) -> bool {
        matches!(self, Self::Borderline | Self::Mild | Self::Moderate | Self::High)
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::Borderline => "Borderline",
            Self::Mild => "Mild",
            Self::Moderate => "Moderate",
            Self::High => "High",
        };
        f.write_str(name)
    }
}

/// Map a prediction and its disease probability to a risk tier.
#[must_use]
pub fn classify(predicted_class: PredictedClass, disease_probability: f64) -> RiskTier {
    match predicted_class {
        PredictedClass::NoDisease => RiskTier::for_no_disease(1.0 - disease_probability),
        PredictedClass::Disease => RiskTier::for_disease(disease_probability),
    }
}
