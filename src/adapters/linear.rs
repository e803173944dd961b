//! Linear models and scalers exported by the training pipeline as JSON.

use serde::{Deserialize, Serialize};

use crate::ports::classifier::sigmoid;
use crate::ports::{Classifier, FeatureScaler, ModelCapability, ModelError};

/// Default class codes when an artifact does not list them.
const DEFAULT_CLASSES: [i64; 2] = [0, 1];

/// How the exported model produces its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Logistic regression with calibrated probabilities
    Logistic,
    /// Margin classifier exposing only a decision score
    DecisionOnly,
}

/// Model parameters as written by the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModelArtifact {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub kind: ModelKind,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    #[serde(default)]
    pub classes: Option<Vec<i64>>,
}

/// Binary linear classifier: `score = w·x + b`.
#[derive(Debug, Clone)]
pub struct LinearModel {
    name: String,
    version: Option<String>,
    capability: ModelCapability,
    coefficients: Vec<f64>,
    intercept: f64,
    classes: Vec<i64>,
}

impl LinearModel {
    /// Validate an artifact and build the model.
    ///
    /// # Errors
    /// Returns `InvalidArtifact` for empty or non-finite parameters, or a
    /// class list that is not two distinct codes.
    pub fn from_artifact(artifact: LinearModelArtifact) -> Result<Self, ModelError> {
        if artifact.name.trim().is_empty() {
            return Err(ModelError::InvalidArtifact("model name is empty".into()));
        }
        if artifact.coefficients.is_empty() {
            return Err(ModelError::InvalidArtifact(format!(
                "'{}' has no coefficients",
                artifact.name
            )));
        }
        if !artifact.intercept.is_finite() || artifact.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::InvalidArtifact(format!(
                "'{}' has non-finite parameters",
                artifact.name
            )));
        }

        let classes = artifact.classes.unwrap_or_else(|| DEFAULT_CLASSES.to_vec());
        if classes.len() != 2 || classes[0] == classes[1] {
            return Err(ModelError::InvalidArtifact(format!(
                "'{}' must declare two distinct classes, got {:?}",
                artifact.name, classes
            )));
        }

        let capability = match artifact.kind {
            ModelKind::Logistic => ModelCapability::Probability,
            ModelKind::DecisionOnly => ModelCapability::DecisionScore,
        };

        Ok(Self {
            name: artifact.name,
            version: artifact.version,
            capability,
            coefficients: artifact.coefficients,
            intercept: artifact.intercept,
            classes,
        })
    }

    fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.coefficients.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.coefficients.len(),
                got: features.len(),
            });
        }
        let dot: f64 = self
            .coefficients
            .iter()
            .zip(features)
            .map(|(w, x)| w * x)
            .sum();
        Ok(dot + self.intercept)
    }
}

impl Classifier for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn capability(&self) -> ModelCapability {
        self.capability
    }

    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>, ModelError> {
        if self.capability != ModelCapability::Probability {
            return Err(ModelError::Unsupported(self.name.clone()));
        }
        let p = sigmoid(self.score(features)?);
        Ok(vec![1.0 - p, p])
    }

    fn decision_function(&self, features: &[f64]) -> Result<f64, ModelError> {
        self.score(features)
    }
}

/// Scaler parameters as written by the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
}

/// `(x - center) / scale`, per feature.
#[derive(Debug, Clone)]
pub struct CenterScaleScaler {
    center: Vec<f64>,
    scale: Vec<f64>,
}

impl CenterScaleScaler {
    /// Validate an artifact and build the scaler.
    ///
    /// A zero scale is treated as 1, leaving the centered value unscaled.
    ///
    /// # Errors
    /// Returns `InvalidArtifact` on length mismatch or non-finite values.
    pub fn from_artifact(artifact: ScalerArtifact) -> Result<Self, ModelError> {
        if artifact.center.len() != artifact.scale.len() || artifact.center.is_empty() {
            return Err(ModelError::InvalidArtifact(format!(
                "scaler has {} centers and {} scales",
                artifact.center.len(),
                artifact.scale.len()
            )));
        }
        if artifact
            .center
            .iter()
            .chain(&artifact.scale)
            .any(|v| !v.is_finite())
        {
            return Err(ModelError::InvalidArtifact("scaler has non-finite values".into()));
        }

        let scale = artifact
            .scale
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();

        Ok(Self {
            center: artifact.center,
            scale,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.center.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.center.is_empty()
    }
}

impl FeatureScaler for CenterScaleScaler {
    fn transform(&self, features: &[f64]) -> Result<Vec<f64>, ModelError> {
        if features.len() != self.center.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.center.len(),
                got: features.len(),
            });
        }
        Ok(features
            .iter()
            .zip(self.center.iter().zip(&self.scale))
            .map(|(x, (c, s))| (x - c) / s)
            .collect())
    }
}
