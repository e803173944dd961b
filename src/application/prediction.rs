//! Prediction service: turns one request into one assessment.
//!
//! Pipeline: validate, scale, predict, explain (with fallback), consult the
//! secondary model on low confidence, combine confidence signals, classify
//! risk, attach advice and an audit fingerprint, then persist best-effort.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::registry::ArtifactRegistry;
use crate::domain::assessment::{self, NO_SECONDARY_MODEL_NOTE};
use crate::domain::audit::audit_fingerprint;
use crate::domain::confidence::{attribution_strength, entropy_confidence, model_agreement};
use crate::domain::features::{normalize, NormalizedRequest};
use crate::domain::recommendations::recommend;
use crate::domain::risk::classify;
use crate::domain::{
    Assessment, AttributionSet, AttributionSource, ConfidenceBundle, PredictionResult,
    SecondOpinion,
};
use crate::ports::{PredictionRecord, PredictionStore, SOURCE_API};
use crate::HepacheckError;

/// Service for producing liver-disease assessments.
pub struct PredictionService<S>
where
    S: PredictionStore,
{
    registry: Arc<ArtifactRegistry>,
    storage: Option<Arc<S>>,
}

impl<S> PredictionService<S>
where
    S: PredictionStore,
{
    /// Create a new prediction service. Without storage, nothing is persisted.
    pub fn new(registry: Arc<ArtifactRegistry>, storage: Option<Arc<S>>) -> Self {
        Self { registry, storage }
    }

    #[must_use]
    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    #[must_use]
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Assess one raw request.
    ///
    /// # Errors
    /// Returns `HepacheckError::Validation` listing every offending field, or
    /// `HepacheckError::Model` if the primary model fails. Explainer,
    /// secondary model and storage failures never fail the request.
    pub fn assess(&self, raw: &Map<String, Value>) -> Result<Assessment, HepacheckError> {
        let request = normalize(raw, self.registry.feature_spec())?;
        tracing::debug!("Request validated ({} features)", request.vector.len());

        let scaled = self.registry.scale(&request.vector)?;
        let primary = self.registry.primary_prediction(&scaled)?;
        let primary_confidence = primary.confidence();
        tracing::debug!(
            "Primary prediction: {} (confidence {:.3})",
            primary.predicted_label,
            primary_confidence
        );

        let attributions = self.attribute(&scaled, &request);

        let second_opinion = if primary.is_low_confidence() {
            Some(self.second_opinion(&scaled))
        } else {
            None
        };

        let confidence = ConfidenceBundle::synthesize(
            primary_confidence,
            entropy_confidence(&primary.class_probabilities),
            model_agreement(
                primary_confidence,
                second_opinion.as_ref().and_then(SecondOpinion::confidence),
            ),
            attribution_strength(&attributions),
        );

        let tier = classify(primary.predicted_class, primary.disease_probability);
        let medical_warning = assessment::medical_warning(primary_confidence, second_opinion.as_ref());
        let explanation_text = assessment::explanation_text(
            &primary.predicted_label,
            primary.disease_probability,
            tier,
            &attributions,
        );
        let hash = audit_fingerprint(
            &request.patient_id,
            &request.values,
            &primary.predicted_label,
            primary.disease_probability,
        );
        let column_labels = self.registry.column_labels(self.registry.primary_model());

        let result = Assessment {
            class_probabilities: primary.labelled_probabilities(&column_labels),
            prediction: primary.predicted_label.clone(),
            predicted_class: primary.predicted_class,
            disease_probability: primary.disease_probability,
            probability_primary: primary_confidence,
            risk_level: tier,
            explanation_source: attributions.source(),
            top_factors: attributions.into_items(),
            explanation_text,
            confidence_final: confidence.final_,
            confidence,
            second_opinion,
            medical_warning,
            food_recommendations: recommend(tier, &request.values),
            model_version: self.registry.model_version().to_string(),
            hash,
            patient_id: request.patient_id,
        };

        self.persist(&result, request.values);

        tracing::info!(
            "Assessment complete: prediction={} risk={} disease_probability={:.3} confidence={:.3} explanation={:?}",
            result.prediction,
            result.risk_level,
            result.disease_probability,
            result.confidence_final,
            result.explanation_source
        );
        Ok(result)
    }

    /// Shapley attributions, or scaled magnitudes when the explainer is not
    /// usable.
    fn attribute(&self, scaled: &[f64], request: &NormalizedRequest) -> AttributionSet {
        let spec = self.registry.feature_spec();
        let shapley = self
            .registry
            .explainer()
            .and_then(|explainer| explainer.attribute(scaled));

        match shapley {
            Ok(scores) => {
                AttributionSet::from_scores(spec, &scores, &request.vector, AttributionSource::Shapley)
            }
            Err(e) => {
                tracing::debug!("Using magnitude attributions: {e}");
                AttributionSet::from_scores(spec, scaled, &request.vector, AttributionSource::Magnitude)
            }
        }
    }

    fn second_opinion(&self, scaled: &[f64]) -> SecondOpinion {
        let Some(model) = self.registry.secondary_model() else {
            return SecondOpinion::Unavailable {
                note: NO_SECONDARY_MODEL_NOTE.to_string(),
            };
        };
        let model_name = model.name().to_string();

        match self.registry.secondary_prediction(scaled) {
            Some(Ok(opinion)) => to_opinion(model_name, &opinion),
            Some(Err(e)) => {
                tracing::warn!("Secondary model '{model_name}' failed: {e}");
                SecondOpinion::Failed {
                    model: model_name,
                    error: e.to_string(),
                }
            }
            None => SecondOpinion::Unavailable {
                note: NO_SECONDARY_MODEL_NOTE.to_string(),
            },
        }
    }

    fn persist(&self, result: &Assessment, values: std::collections::BTreeMap<String, f64>) {
        let Some(storage) = &self.storage else {
            return;
        };
        let record = PredictionRecord::from_assessment(result, values, SOURCE_API);
        match storage.save_prediction(&record) {
            Ok(()) => tracing::debug!("Prediction record saved"),
            Err(e) => tracing::warn!("Failed to persist prediction: {e}"),
        }
    }
}

fn to_opinion(model: String, result: &PredictionResult) -> SecondOpinion {
    SecondOpinion::Opinion {
        model,
        prediction: result.predicted_label.clone(),
        disease_probability: result.disease_probability,
        confidence: result.confidence(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::adapters::shapley::ShapleyFactory;
    use crate::application::registry::tests::{bundle, FailingFactory, StubModel};
    use crate::domain::RiskTier;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<PredictionRecord>>,
    }

    impl PredictionStore for MemoryStore {
        type Error = std::io::Error;

        fn save_prediction(&self, record: &PredictionRecord) -> Result<(), Self::Error> {
            self.records.lock().expect("lock").push(record.clone());
            Ok(())
        }

        fn load_recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, Self::Error> {
            let records = self.records.lock().expect("lock");
            Ok(records.iter().rev().take(limit).cloned().collect())
        }

        fn count_predictions(&self) -> Result<usize, Self::Error> {
            Ok(self.records.lock().expect("lock").len())
        }
    }

    #[derive(Default)]
    struct BrokenStore {
        attempts: AtomicUsize,
    }

    impl PredictionStore for BrokenStore {
        type Error = std::io::Error;

        fn save_prediction(&self, _record: &PredictionRecord) -> Result<(), Self::Error> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::other("disk full"))
        }

        fn load_recent_predictions(&self, _limit: usize) -> Result<Vec<PredictionRecord>, Self::Error> {
            Err(std::io::Error::other("disk full"))
        }

        fn count_predictions(&self) -> Result<usize, Self::Error> {
            Err(std::io::Error::other("disk full"))
        }
    }

    fn request() -> Map<String, Value> {
        let value = json!({
            "patient_id": "P-17",
            "f0": 1.5,
            "f1": "2.0",
        });
        value.as_object().cloned().expect("object")
    }

    fn service<S: PredictionStore>(
        primary: StubModel,
        secondary: Option<StubModel>,
        storage: Option<Arc<S>>,
    ) -> PredictionService<S> {
        let registry = ArtifactRegistry::new(
            bundle(primary, secondary),
            Arc::new(FailingFactory::default()),
            Duration::from_secs(60),
        );
        PredictionService::new(Arc::new(registry), storage)
    }

    #[test]
    fn test_confident_prediction() {
        let service = service::<MemoryStore>(StubModel::new(vec![0.08, 0.92], 2), None, None);
        let result = service.assess(&request()).expect("assess");

        assert_eq!(result.prediction, "Disease");
        assert_eq!(result.risk_level, RiskTier::High);
        assert!(result.second_opinion.is_none());
        assert!(result.medical_warning.is_none());
        assert_eq!(result.patient_id, "P-17");
        assert_eq!(result.class_probabilities.get("Disease"), Some(&0.92));
        assert!((result.confidence_final - result.confidence.final_).abs() < f64::EPSILON);
        assert_eq!(result.model_version, "stub");
    }

    #[test]
    fn test_low_confidence_without_secondary_model() {
        let service = service::<MemoryStore>(StubModel::new(vec![0.4, 0.6], 2), None, None);
        let result = service.assess(&request()).expect("assess");

        assert!(matches!(
            result.second_opinion,
            Some(SecondOpinion::Unavailable { .. })
        ));
        assert!(result.medical_warning.is_some());
        assert!((result.confidence.model_agreement - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_low_confidence_with_confident_secondary_model() {
        let service = service::<MemoryStore>(
            StubModel::new(vec![0.35, 0.65], 2),
            Some(StubModel::new(vec![0.1, 0.9], 2)),
            None,
        );
        let result = service.assess(&request()).expect("assess");

        match result.second_opinion {
            Some(SecondOpinion::Opinion { confidence, ref prediction, .. }) => {
                assert!((confidence - 0.9).abs() < f64::EPSILON);
                assert_eq!(prediction, "Disease");
            }
            ref other => panic!("unexpected second opinion: {other:?}"),
        }
        assert!(result.medical_warning.is_none());
        assert!((result.confidence.model_agreement - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_secondary_failure_is_reported_inline() {
        let mut broken = StubModel::new(vec![0.5, 0.5], 2);
        broken.fail = true;
        broken.name = "alt";
        let service = service::<MemoryStore>(StubModel::new(vec![0.45, 0.55], 2), Some(broken), None);

        let result = service.assess(&request()).expect("assess");
        assert!(matches!(
            result.second_opinion,
            Some(SecondOpinion::Failed { ref model, .. }) if model == "alt"
        ));
        assert!(result.medical_warning.is_some());
    }

    #[test]
    fn test_validation_before_model() {
        let mut failing = StubModel::new(vec![0.5, 0.5], 2);
        failing.fail = true;
        let service = service::<MemoryStore>(failing, None, None);

        let raw = json!({ "patient_id": "P-1" });
        let err = service
            .assess(raw.as_object().expect("object"))
            .expect_err("should fail validation");
        match err {
            HepacheckError::Validation(v) => assert_eq!(v.missing, vec!["f0", "f1"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_primary_failure_is_an_error() {
        let mut failing = StubModel::new(vec![0.5, 0.5], 2);
        failing.fail = true;
        let service = service::<MemoryStore>(failing, None, None);
        assert!(matches!(service.assess(&request()), Err(HepacheckError::Model(_))));
    }

    #[test]
    fn test_identical_requests_are_identical() {
        let service = service::<MemoryStore>(StubModel::new(vec![0.2, 0.8], 2), None, None);
        let a = service.assess(&request()).expect("assess");
        let b = service.assess(&request()).expect("assess");
        assert_eq!(a, b);
    }

    #[test]
    fn test_magnitude_fallback_when_explainer_fails() {
        let service = service::<MemoryStore>(StubModel::new(vec![0.2, 0.8], 2), None, None);
        let result = service.assess(&request()).expect("assess");
        assert_eq!(result.explanation_source, AttributionSource::Magnitude);
        assert_eq!(result.top_factors[0].feature, "f1");
        assert!((result.top_factors[0].impact - 2.0).abs() < f64::EPSILON);
        assert_eq!(service.registry().explainer_attempts(), 1);

        // Within the retry window the build is not attempted again.
        service.assess(&request()).expect("assess");
        assert_eq!(service.registry().explainer_attempts(), 1);
    }

    /// Builds fine but fails on every call.
    struct BrokenAttributor;

    impl crate::ports::Attributor for BrokenAttributor {
        fn attribute(&self, _features: &[f64]) -> Result<Vec<f64>, crate::ports::ExplainerError> {
            Err(crate::ports::ExplainerError::Computation("singular coalition".into()))
        }
    }

    struct BrokenAttributorFactory;

    impl crate::ports::ExplainerFactory for BrokenAttributorFactory {
        fn build(
            &self,
            _model: Arc<dyn crate::ports::Classifier>,
            _n_features: usize,
            _target_column: usize,
        ) -> Result<Arc<dyn crate::ports::Attributor>, crate::ports::ExplainerError> {
            Ok(Arc::new(BrokenAttributor))
        }
    }

    #[test]
    fn test_magnitude_fallback_when_attribution_fails_at_call_time() {
        let registry = ArtifactRegistry::new(
            bundle(StubModel::new(vec![0.2, 0.8], 2), None),
            Arc::new(BrokenAttributorFactory),
            Duration::from_secs(60),
        );
        let service: PredictionService<MemoryStore> = PredictionService::new(Arc::new(registry), None);

        for _ in 0..2 {
            let result = service.assess(&request()).expect("assess");
            assert_eq!(result.explanation_source, AttributionSource::Magnitude);
            let factors: Vec<(&str, f64)> = result
                .top_factors
                .iter()
                .map(|f| (f.feature.as_str(), f.impact))
                .collect();
            assert_eq!(factors, vec![("f1", 2.0), ("f0", 1.5)]);
        }
        // The explainer was built once and kept; only the call failed.
        assert_eq!(service.registry().explainer_attempts(), 1);
    }

    #[test]
    fn test_shapley_attributions_when_explainer_available() {
        let registry = ArtifactRegistry::new(
            bundle(StubModel::new(vec![0.2, 0.8], 2), None),
            Arc::new(ShapleyFactory),
            Duration::from_secs(60),
        );
        let service: PredictionService<MemoryStore> = PredictionService::new(Arc::new(registry), None);
        let result = service.assess(&request()).expect("assess");
        assert_eq!(result.explanation_source, AttributionSource::Shapley);
        // A constant model has no attributable effect.
        assert!(result.top_factors.iter().all(|f| f.impact.abs() < 1e-12));
    }

    #[test]
    fn test_assessment_is_persisted() {
        let store = Arc::new(MemoryStore::default());
        let service = service(StubModel::new(vec![0.2, 0.8], 2), None, Some(Arc::clone(&store)));
        let result = service.assess(&request()).expect("assess");

        let records = store.load_recent_predictions(10).expect("load");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].patient_id, "P-17");
        assert_eq!(records[0].record_hash, result.hash);
        assert_eq!(records[0].source, SOURCE_API);
        assert_eq!(records[0].features.get("f1"), Some(&2.0));
    }

    #[test]
    fn test_persistence_failure_does_not_fail_prediction() {
        let store = Arc::new(BrokenStore::default());
        let service = service(StubModel::new(vec![0.2, 0.8], 2), None, Some(Arc::clone(&store)));
        assert!(service.assess(&request()).is_ok());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_shipped_artifacts_end_to_end() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("artifacts");
        let bundle = crate::adapters::artifacts::load_artifacts(&dir).expect("shipped artifacts");
        let registry = ArtifactRegistry::new(bundle, Arc::new(ShapleyFactory), Duration::from_secs(60));
        let service: PredictionService<MemoryStore> = PredictionService::new(Arc::new(registry), None);

        let abnormal = json!({
            "patient_id": "P-100", "age": 65, "Sex": "Male", "Total_Bilirubin": 7.3,
            "Direct_Bilirubin": 4.1, "ALP": 490, "ALT": 60, "AST": 68,
            "Total_Proteins": 7.0, "Albumin": 3.3, "A/G Ratio": 0.9,
        });
        let result = service
            .assess(abnormal.as_object().expect("object"))
            .expect("assess");
        assert_eq!(result.predicted_class, crate::domain::PredictedClass::Disease);
        assert_eq!(result.risk_level, RiskTier::High);
        assert_eq!(result.explanation_source, AttributionSource::Shapley);
        assert_eq!(result.top_factors.len(), 3);
        assert!(result.top_factors[0].impact > 0.0);
        assert!(result.second_opinion.is_none());

        let healthy = json!({
            "patient_id": "P-101", "Age": 30, "Gender": "Female", "TB": 0.7, "DB": 0.1,
            "Alkphos": 150, "Sgpt": 20, "Sgot": 22, "TP": 7.2, "ALB": 4.2, "A_G": 1.4,
        });
        let result = service
            .assess(healthy.as_object().expect("object"))
            .expect("assess");
        assert_eq!(result.predicted_class, crate::domain::PredictedClass::NoDisease);
        assert_eq!(result.risk_level, RiskTier::Medium);
    }
}
