//! HTTP surface: axum routes over [`PredictionService`].
//!
//! The pipeline is CPU-bound and synchronous, so each prediction runs on a
//! blocking worker thread.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;

use crate::application::PredictionService;
use crate::domain::{FieldIssue, ValidationError};
use crate::ports::PredictionStore;
use crate::HepacheckError;

#[derive(Debug, Serialize)]
struct HealthResponse<'a> {
    status: &'static str,
    secondary_model: bool,
    scaler: bool,
    explainer: bool,
    features: &'a [String],
}

#[derive(Debug, Serialize)]
struct ValidationResponse {
    error: String,
    missing_fields: Vec<String>,
    invalid_fields: Vec<FieldIssue>,
}

impl From<ValidationError> for ValidationResponse {
    fn from(err: ValidationError) -> Self {
        Self {
            error: err.to_string(),
            missing_fields: err.missing,
            invalid_fields: err.invalid,
        }
    }
}

/// Build the application router.
pub fn router<S>(service: Arc<PredictionService<S>>) -> Router
where
    S: PredictionStore + 'static,
{
    Router::new()
        .route("/", get(index))
        .route("/health", get(health::<S>))
        .route("/api/predict", post(predict::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn index() -> Json<Value> {
    Json(json!({ "message": "Liver ML API Running" }))
}

async fn health<S>(State(service): State<Arc<PredictionService<S>>>) -> Response
where
    S: PredictionStore + 'static,
{
    let registry = service.registry();
    Json(HealthResponse {
        status: "ok",
        secondary_model: registry.has_secondary_model(),
        scaler: registry.has_scaler(),
        explainer: registry.has_explainer_support(),
        features: registry.feature_spec().names(),
    })
    .into_response()
}

async fn predict<S>(State(service): State<Arc<PredictionService<S>>>, body: Bytes) -> Response
where
    S: PredictionStore + 'static,
{
    let raw = match parse_object(&body) {
        Ok(raw) => raw,
        Err(response) => return response,
    };

    let outcome = tokio::task::spawn_blocking(move || service.assess(&raw)).await;
    match outcome {
        Ok(Ok(assessment)) => (StatusCode::OK, Json(assessment)).into_response(),
        Ok(Err(HepacheckError::Validation(err))) => {
            tracing::debug!("Rejected request with {} offending field(s)", err.fields().len());
            bad_request(err.into())
        }
        Ok(Err(err)) => {
            tracing::error!("Prediction failed: {err}");
            internal_error()
        }
        Err(join_err) => {
            tracing::error!("Prediction worker failed: {join_err}");
            internal_error()
        }
    }
}

/// The body must be a JSON object; anything else is a client error.
fn parse_object(body: &[u8]) -> Result<Map<String, Value>, Response> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(bad_request(ValidationResponse {
            error: "Request body must be a JSON object".to_string(),
            missing_fields: Vec::new(),
            invalid_fields: Vec::new(),
        })),
        Err(err) => Err(bad_request(ValidationResponse {
            error: format!("Invalid JSON: {err}"),
            missing_fields: Vec::new(),
            invalid_fields: Vec::new(),
        })),
    }
}

fn bad_request(body: ValidationResponse) -> Response {
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::adapters::sqlite::SqliteStorage;
    use crate::application::registry::tests::{bundle, FailingFactory, StubModel};
    use crate::application::ArtifactRegistry;

    fn app(primary: StubModel) -> Router {
        let registry = ArtifactRegistry::new(
            bundle(primary, None),
            Arc::new(FailingFactory::default()),
            Duration::from_secs(60),
        );
        let service: PredictionService<SqliteStorage> =
            PredictionService::new(Arc::new(registry), None);
        router(Arc::new(service))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn test_index() {
        let request = Request::get("/").body(Body::empty()).expect("request");
        let (status, body) = send(app(StubModel::new(vec![0.2, 0.8], 2)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "message": "Liver ML API Running" }));
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::get("/health").body(Body::empty()).expect("request");
        let (status, body) = send(app(StubModel::new(vec![0.2, 0.8], 2)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["secondary_model"], false);
        assert_eq!(body["scaler"], false);
        assert_eq!(body["features"], json!(["f0", "f1"]));
    }

    #[tokio::test]
    async fn test_predict_ok() {
        let request = post_json(r#"{"patient_id": "P-9", "f0": 1.0, "f1": "2.5"}"#);
        let (status, body) = send(app(StubModel::new(vec![0.2, 0.8], 2)), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["prediction"], "Disease");
        assert_eq!(body["patient_id"], "P-9");
        assert!(body["confidence"]["final"].as_f64().is_some());
    }

    #[tokio::test]
    async fn test_predict_lists_every_missing_field() {
        let request = post_json(r#"{"patient_id": "P-9"}"#);
        let (status, body) = send(app(StubModel::new(vec![0.2, 0.8], 2)), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["missing_fields"], json!(["f0", "f1"]));
        assert_eq!(body["invalid_fields"], json!([]));
    }

    #[tokio::test]
    async fn test_predict_invalid_field() {
        let request = post_json(r#"{"patient_id": "P-9", "f0": "abc", "f1": 1}"#);
        let (status, body) = send(app(StubModel::new(vec![0.2, 0.8], 2)), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["invalid_fields"][0]["field"], "f0");
    }

    #[tokio::test]
    async fn test_predict_rejects_non_object() {
        for raw in ["[1, 2]", "not json"] {
            let (status, body) =
                send(app(StubModel::new(vec![0.2, 0.8], 2)), post_json(raw)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_model_failure_is_opaque() {
        let mut broken = StubModel::new(vec![0.2, 0.8], 2);
        broken.fail = true;
        let request = post_json(r#"{"patient_id": "P-9", "f0": 1.0, "f1": 2.0}"#);
        let (status, body) = send(app(broken), request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Internal server error" }));
    }
}
