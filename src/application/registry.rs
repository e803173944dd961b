//! Artifact registry: the loaded models, shared read-only across requests.
//!
//! The only mutable state is the lazily built explainer, kept in an
//! [`ExplainerSlot`]. Its lock is held only to inspect or update the slot,
//! never while an explainer is being built, and a request that finds a build
//! in progress does not wait.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::domain::{FeatureSpec, FeatureVector, PredictionResult};
use crate::ports::{
    class_probabilities, Attributor, Classifier, ExplainerError, ExplainerFactory, FeatureScaler,
    ModelBundle, ModelError,
};

/// Default delay before retrying a failed explainer build.
pub const DEFAULT_EXPLAINER_RETRY: Duration = Duration::from_secs(10);

/// Class code of the disease outcome.
const DISEASE_CLASS_CODE: i64 = 1;

#[derive(Default)]
struct SlotState {
    handle: Option<Arc<dyn Attributor>>,
    in_progress: bool,
    last_failure: Option<Instant>,
    attempts: u32,
}

/// Lazily constructed explainer handle with throttled retries.
pub struct ExplainerSlot {
    state: Mutex<SlotState>,
    factory: Arc<dyn ExplainerFactory>,
    retry_after: Duration,
}

impl ExplainerSlot {
    #[must_use]
    pub fn new(factory: Arc<dyn ExplainerFactory>, retry_after: Duration) -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            factory,
            retry_after,
        }
    }

    /// Return the explainer, building it on first use.
    ///
    /// # Errors
    /// - `Busy` if another request is building it
    /// - `Throttled` if the last build failed within the retry window
    /// - `Construction` if this call's build attempt failed
    pub fn get_or_build(
        &self,
        build: impl FnOnce(&dyn ExplainerFactory) -> Result<Arc<dyn Attributor>, ExplainerError>,
    ) -> Result<Arc<dyn Attributor>, ExplainerError> {
        {
            let mut state = self.state.lock().expect("Lock failed");
            if let Some(handle) = &state.handle {
                return Ok(Arc::clone(handle));
            }
            if state.in_progress {
                return Err(ExplainerError::Busy);
            }
            if let Some(failed_at) = state.last_failure {
                if failed_at.elapsed() < self.retry_after {
                    return Err(ExplainerError::Throttled);
                }
            }
            state.in_progress = true;
            state.attempts += 1;
        }

        tracing::info!("Building explainer");
        let started = Instant::now();
        let guard = BuildGuard {
            state: &self.state,
            armed: true,
        };
        let result = build(self.factory.as_ref());
        guard.disarm();

        let mut state = self.state.lock().expect("Lock failed");
        state.in_progress = false;
        match result {
            Ok(handle) => {
                tracing::info!("Explainer ready in {:?}", started.elapsed());
                state.handle = Some(Arc::clone(&handle));
                state.last_failure = None;
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(
                    "Explainer build failed (attempt {}): {e}; retrying after {:?}",
                    state.attempts,
                    self.retry_after
                );
                state.last_failure = Some(Instant::now());
                Err(e)
            }
        }
    }

    /// Number of build attempts so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.state.lock().expect("Lock failed").attempts
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().expect("Lock failed").handle.is_some()
    }
}

/// Releases the slot if a build unwinds, recording it as a failure so the
/// retry window applies.
struct BuildGuard<'a> {
    state: &'a Mutex<SlotState>,
    armed: bool,
}

impl BuildGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_progress = false;
        state.last_failure = Some(Instant::now());
        tracing::error!("Explainer build panicked (attempt {})", state.attempts);
    }
}

/// Models, preprocessing and metadata loaded at startup.
pub struct ArtifactRegistry {
    primary: Arc<dyn Classifier>,
    secondary: Option<Arc<dyn Classifier>>,
    scaler: Option<Arc<dyn FeatureScaler>>,
    feature_spec: FeatureSpec,
    label_mapping: BTreeMap<i64, String>,
    explainer: ExplainerSlot,
}

impl ArtifactRegistry {
    /// Wrap loaded artifacts.
    #[must_use]
    pub fn new(
        bundle: ModelBundle,
        explainer_factory: Arc<dyn ExplainerFactory>,
        explainer_retry: Duration,
    ) -> Self {
        Self {
            primary: bundle.primary,
            secondary: bundle.secondary,
            scaler: bundle.scaler,
            feature_spec: bundle.feature_spec,
            label_mapping: bundle.label_mapping,
            explainer: ExplainerSlot::new(explainer_factory, explainer_retry),
        }
    }

    #[must_use]
    pub fn feature_spec(&self) -> &FeatureSpec {
        &self.feature_spec
    }

    #[must_use]
    pub fn primary_model(&self) -> &dyn Classifier {
        self.primary.as_ref()
    }

    #[must_use]
    pub fn secondary_model(&self) -> Option<&dyn Classifier> {
        self.secondary.as_deref()
    }

    /// The primary model's declared version, or its name.
    #[must_use]
    pub fn model_version(&self) -> &str {
        self.primary.version().unwrap_or_else(|| self.primary.name())
    }

    #[must_use]
    pub fn has_secondary_model(&self) -> bool {
        self.secondary.is_some()
    }

    #[must_use]
    pub fn has_scaler(&self) -> bool {
        self.scaler.is_some()
    }

    /// Whether the explainer factory can handle the primary model.
    #[must_use]
    pub fn has_explainer_support(&self) -> bool {
        self.explainer
            .factory
            .supports(self.primary.as_ref(), self.feature_spec.len())
    }

    /// Position of the disease class in the primary model's output.
    #[must_use]
    pub fn disease_class_index(&self) -> usize {
        disease_index_of(self.primary.as_ref())
    }

    /// Display labels of a model's output columns.
    #[must_use]
    pub fn column_labels(&self, model: &dyn Classifier) -> Vec<String> {
        model
            .classes()
            .iter()
            .map(|code| {
                self.label_mapping
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| code.to_string())
            })
            .collect()
    }

    /// Apply the fitted scaler, or pass the vector through.
    ///
    /// # Errors
    /// Returns `ModelError` if the scaler rejects the vector.
    pub fn scale(&self, vector: &FeatureVector) -> Result<Vec<f64>, ModelError> {
        match &self.scaler {
            Some(scaler) => scaler.transform(vector.as_slice()),
            None => Ok(vector.as_slice().to_vec()),
        }
    }

    /// Per-class probabilities of `model` for a scaled vector.
    ///
    /// # Errors
    /// Returns `ModelError` if the model fails or returns malformed output.
    pub fn predict_proba(&self, model: &dyn Classifier, scaled: &[f64]) -> Result<Vec<f64>, ModelError> {
        class_probabilities(model, scaled)
    }

    /// Prediction of the primary model.
    ///
    /// # Errors
    /// Returns `ModelError` if the model fails.
    pub fn primary_prediction(&self, scaled: &[f64]) -> Result<PredictionResult, ModelError> {
        self.prediction_of(self.primary.as_ref(), scaled)
    }

    /// Prediction of the secondary model, if one is loaded.
    ///
    /// # Errors
    /// Returns `ModelError` if the secondary model fails.
    pub fn secondary_prediction(
        &self,
        scaled: &[f64],
    ) -> Option<Result<PredictionResult, ModelError>> {
        self.secondary
            .as_deref()
            .map(|model| self.prediction_of(model, scaled))
    }

    fn prediction_of(
        &self,
        model: &dyn Classifier,
        scaled: &[f64],
    ) -> Result<PredictionResult, ModelError> {
        let probabilities = self.predict_proba(model, scaled)?;
        Ok(PredictionResult::from_probabilities(
            probabilities,
            disease_index_of(model),
            &self.column_labels(model),
        ))
    }

    /// The explainer for the primary model, built on first use.
    ///
    /// # Errors
    /// Returns `ExplainerError`; callers fall back to magnitude attribution.
    pub fn explainer(&self) -> Result<Arc<dyn Attributor>, ExplainerError> {
        if !self.has_explainer_support() {
            return Err(ExplainerError::Unavailable);
        }
        let model = Arc::clone(&self.primary);
        let n_features = self.feature_spec.len();
        let target = self.disease_class_index();
        self.explainer
            .get_or_build(|factory| factory.build(model, n_features, target))
    }

    /// Build attempts made by the explainer slot.
    #[must_use]
    pub fn explainer_attempts(&self) -> u32 {
        self.explainer.attempts()
    }
}

fn disease_index_of(model: &dyn Classifier) -> usize {
    model
        .classes()
        .iter()
        .position(|code| *code == DISEASE_CLASS_CODE)
        .unwrap_or(1)
}
