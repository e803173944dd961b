//! Artifact store adapter: loads models and metadata from a directory.
//!
//! Layout:
//! - `model.json` (required): primary classifier
//! - `feature_order.json` (required): ordered feature names
//! - `alt_model.json`: secondary classifier
//! - `scaler.json`: `{ "center": [...], "scale": [...] }`
//! - `label_mapping.json`: `{ "0": "No_Disease", "1": "Disease" }`
//! - `manifest.json`: `{ "files": { "<name>": "<sha256 hex>" } }`
//!
//! Required artifacts and the manifest are fatal when missing or invalid.
//! Optional artifacts that cannot be used are logged and treated as absent.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::linear::{CenterScaleScaler, LinearModel, LinearModelArtifact, ScalerArtifact};
use crate::domain::FeatureSpec;
use crate::ports::{Classifier, FeatureScaler, ModelBundle};

pub const MODEL_FILE: &str = "model.json";
pub const ALT_MODEL_FILE: &str = "alt_model.json";
pub const FEATURE_ORDER_FILE: &str = "feature_order.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const LABEL_MAPPING_FILE: &str = "label_mapping.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Errors while loading artifacts. All of them abort startup.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Required artifact missing: {0:?}")]
    Missing(PathBuf),

    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact {file}: {reason}")]
    Invalid { file: String, reason: String },

    #[error("Digest mismatch for {0}")]
    DigestMismatch(String),
}

#[derive(Debug, Deserialize)]
struct Manifest {
    files: BTreeMap<String, String>,
}

/// Default display labels, used when no label mapping is shipped.
#[must_use]
pub fn default_label_mapping() -> BTreeMap<i64, String> {
    BTreeMap::from([(0, "No_Disease".to_string()), (1, "Disease".to_string())])
}

/// Load every artifact from `dir`.
///
/// # Errors
/// Returns `ArtifactError` if a required artifact is missing or invalid, or
/// if the manifest does not match the files on disk.
pub fn load_artifacts(dir: &Path) -> Result<ModelBundle, ArtifactError> {
    verify_manifest(dir)?;

    let names: Vec<String> = read_json(&dir.join(FEATURE_ORDER_FILE))?;
    let feature_spec = FeatureSpec::new(names).map_err(|reason| ArtifactError::Invalid {
        file: FEATURE_ORDER_FILE.into(),
        reason,
    })?;

    let primary = load_model(&dir.join(MODEL_FILE), &feature_spec)?;
    tracing::info!(
        "Loaded primary model '{}' ({:?}, {} features)",
        primary.name(),
        primary.capability(),
        feature_spec.len()
    );

    let secondary = optional(dir, ALT_MODEL_FILE, |path| load_model(path, &feature_spec));
    if let Some(model) = &secondary {
        tracing::info!("Loaded secondary model '{}' ({:?})", model.name(), model.capability());
    }

    let scaler = optional(dir, SCALER_FILE, |path| load_scaler(path, &feature_spec));
    let label_mapping =
        optional(dir, LABEL_MAPPING_FILE, load_label_mapping).unwrap_or_else(default_label_mapping);

    Ok(ModelBundle {
        primary,
        secondary,
        scaler,
        feature_spec,
        label_mapping,
    })
}

/// Load an optional artifact, degrading to `None` on any problem.
fn optional<T>(
    dir: &Path,
    file: &str,
    load: impl FnOnce(&Path) -> Result<T, ArtifactError>,
) -> Option<T> {
    let path = dir.join(file);
    if !path.exists() {
        tracing::info!("Optional artifact {file} not present");
        return None;
    }
    match load(&path) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring unusable optional artifact {file}: {e}");
            None
        }
    }
}

fn load_model(path: &Path, spec: &FeatureSpec) -> Result<Arc<dyn Classifier>, ArtifactError> {
    let file = file_name(path);
    let artifact: LinearModelArtifact = read_json(path)?;
    let model = LinearModel::from_artifact(artifact).map_err(|e| ArtifactError::Invalid {
        file: file.clone(),
        reason: e.to_string(),
    })?;
    if model.n_features() != spec.len() {
        return Err(ArtifactError::Invalid {
            file,
            reason: format!(
                "model expects {} features, feature order lists {}",
                model.n_features(),
                spec.len()
            ),
        });
    }
    Ok(Arc::new(model))
}

fn load_scaler(path: &Path, spec: &FeatureSpec) -> Result<Arc<dyn FeatureScaler>, ArtifactError> {
    let file = file_name(path);
    let artifact: ScalerArtifact = read_json(path)?;
    let scaler = CenterScaleScaler::from_artifact(artifact).map_err(|e| ArtifactError::Invalid {
        file: file.clone(),
        reason: e.to_string(),
    })?;
    if scaler.len() != spec.len() {
        return Err(ArtifactError::Invalid {
            file,
            reason: format!("scaler has {} features, expected {}", scaler.len(), spec.len()),
        });
    }
    Ok(Arc::new(scaler))
}

fn load_label_mapping(path: &Path) -> Result<BTreeMap<i64, String>, ArtifactError> {
    let raw: BTreeMap<String, String> = read_json(path)?;
    raw.into_iter()
        .map(|(code, label)| {
            let code = code.trim().parse::<i64>().map_err(|_| ArtifactError::Invalid {
                file: LABEL_MAPPING_FILE.into(),
                reason: format!("class code {code:?} is not an integer"),
            })?;
            Ok((code, label))
        })
        .collect()
}

/// Check every file listed in the manifest against its SHA-256 digest.
fn verify_manifest(dir: &Path) -> Result<(), ArtifactError> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        tracing::debug!("No {MANIFEST_FILE}; artifact digests not verified");
        return Ok(());
    }

    let manifest: Manifest = read_json(&manifest_path)?;
    if manifest.files.is_empty() {
        return Err(ArtifactError::Invalid {
            file: MANIFEST_FILE.into(),
            reason: "manifest lists no files".into(),
        });
    }

    for (name, expected_hex) in &manifest.files {
        if name.contains(['/', '\\']) || name == ".." || name == "." {
            return Err(ArtifactError::Invalid {
                file: MANIFEST_FILE.into(),
                reason: format!("entry {name:?} is not a plain file name"),
            });
        }
        let path = dir.join(name);
        let bytes = fs::read(&path).map_err(|source| ArtifactError::Io {
            path: path.clone(),
            source,
        })?;
        let actual_hex = sha256_hex(&bytes);
        if !constant_time_eq_str(&actual_hex, &expected_hex.to_ascii_lowercase()) {
            return Err(ArtifactError::DigestMismatch(name.clone()));
        }
    }

    tracing::info!("Verified {} artifact digest(s)", manifest.files.len());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing(path.to_path_buf()));
    }
    let content = fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&content).map_err(|e| ArtifactError::Invalid {
        file: file_name(path),
        reason: e.to_string(),
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ModelCapability;

    const FEATURES: &str = r#"["Age", "TB", "ALB"]"#;
    const MODEL: &str = r#"{"name":"logreg","version":"1.4.0","kind":"logistic","coefficients":[0.1,0.8,-0.6],"intercept":0.2,"classes":[0,1]}"#;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).expect("write artifact");
    }

    fn minimal_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), FEATURE_ORDER_FILE, FEATURES);
        write(dir.path(), MODEL_FILE, MODEL);
        dir
    }

    #[test]
    fn test_minimal_artifacts() {
        let dir = minimal_dir();
        let bundle = load_artifacts(dir.path()).expect("load");
        assert_eq!(bundle.feature_spec.names(), &["Age", "TB", "ALB"]);
        assert_eq!(bundle.primary.version(), Some("1.4.0"));
        assert!(bundle.secondary.is_none());
        assert!(bundle.scaler.is_none());
        assert_eq!(bundle.label_mapping, default_label_mapping());
    }

    #[test]
    fn test_full_artifacts() {
        let dir = minimal_dir();
        write(
            dir.path(),
            ALT_MODEL_FILE,
            r#"{"name":"svm","kind":"decision_only","coefficients":[0.2,0.5,-0.3],"intercept":0.0}"#,
        );
        write(dir.path(), SCALER_FILE, r#"{"center":[45,1,3],"scale":[20,2,0.8]}"#);
        write(dir.path(), LABEL_MAPPING_FILE, r#"{"0":"Healthy","1":"Liver_Disease"}"#);

        let bundle = load_artifacts(dir.path()).expect("load");
        let secondary = bundle.secondary.expect("secondary model");
        assert_eq!(secondary.capability(), ModelCapability::DecisionScore);
        assert!(bundle.scaler.is_some());
        assert_eq!(bundle.label_mapping.get(&1).map(String::as_str), Some("Liver_Disease"));
    }

    #[test]
    fn test_missing_required_artifacts_are_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), FEATURE_ORDER_FILE, FEATURES);
        assert!(matches!(load_artifacts(dir.path()), Err(ArtifactError::Missing(_))));

        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), MODEL_FILE, MODEL);
        assert!(matches!(load_artifacts(dir.path()), Err(ArtifactError::Missing(_))));
    }

    #[test]
    fn test_feature_count_mismatch_is_fatal() {
        let dir = minimal_dir();
        write(dir.path(), FEATURE_ORDER_FILE, r#"["Age", "TB"]"#);
        assert!(matches!(
            load_artifacts(dir.path()),
            Err(ArtifactError::Invalid { .. })
        ));
    }

    #[test]
    fn test_broken_optional_artifacts_degrade() {
        let dir = minimal_dir();
        write(dir.path(), ALT_MODEL_FILE, "{not json");
        write(dir.path(), SCALER_FILE, r#"{"center":[1],"scale":[1]}"#);
        write(dir.path(), LABEL_MAPPING_FILE, r#"{"zero":"No_Disease"}"#);

        let bundle = load_artifacts(dir.path()).expect("load");
        assert!(bundle.secondary.is_none());
        assert!(bundle.scaler.is_none());
        assert_eq!(bundle.label_mapping, default_label_mapping());
    }

    #[test]
    fn test_manifest_verified() {
        let dir = minimal_dir();
        let manifest = format!(
            r#"{{"files":{{"{MODEL_FILE}":"{}","{FEATURE_ORDER_FILE}":"{}"}}}}"#,
            sha256_hex(MODEL.as_bytes()),
            sha256_hex(FEATURES.as_bytes())
        );
        write(dir.path(), MANIFEST_FILE, &manifest);
        assert!(load_artifacts(dir.path()).is_ok());
    }

    #[test]
    fn test_manifest_mismatch_aborts_loading() {
        let dir = minimal_dir();
        let manifest = format!(
            r#"{{"files":{{"{MODEL_FILE}":"{}"}}}}"#,
            sha256_hex(b"some other model")
        );
        write(dir.path(), MANIFEST_FILE, &manifest);
        assert!(matches!(
            load_artifacts(dir.path()),
            Err(ArtifactError::DigestMismatch(name)) if name == MODEL_FILE
        ));
    }

    #[test]
    fn test_manifest_rejects_paths() {
        let dir = minimal_dir();
        write(dir.path(), MANIFEST_FILE, r#"{"files":{"../model.json":"00"}}"#);
        assert!(matches!(
            load_artifacts(dir.path()),
            Err(ArtifactError::Invalid { .. })
        ));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq_str("abc", "abc"));
        assert!(!constant_time_eq_str("abc", "abd"));
        assert!(!constant_time_eq_str("abc", "ab"));
    }
}
