//! Request normalization: raw JSON fields to an ordered feature vector.
//!
//! The feature order is fixed when artifacts are loaded and is never inferred
//! from the request. Field names are resolved through a declarative alias
//! table; the first key present wins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

/// Canonical feature name → accepted request aliases (tried in order, after
/// the canonical name itself).
const FEATURE_ALIASES: &[(&str, &[&str])] = &[
    ("Age", &["age", "AGE"]),
    ("Gender", &["Sex", "gender", "sex"]),
    ("Sex", &["Gender", "sex", "gender"]),
    ("TB", &["Total_Bilirubin", "total_bilirubin"]),
    ("DB", &["Direct_Bilirubin", "direct_bilirubin"]),
    ("Alkphos", &["ALP", "Alkaline_Phosphotase", "alkphos"]),
    ("Sgpt", &["ALT", "Alamine_Aminotransferase", "sgpt"]),
    ("Sgot", &["AST", "Aspartate_Aminotransferase", "sgot"]),
    ("TP", &["Total_Protiens", "Total_Proteins", "tp"]),
    ("ALB", &["Albumin", "albumin", "alb"]),
    (
        "A_G",
        &["A/G Ratio", "AG_Ratio", "AGRatio", "A_G_Ratio", "Albumin_and_Globulin_Ratio"],
    ),
];

/// Keys accepted for the patient identifier, in priority order.
const PATIENT_ID_KEYS: [&str; 2] = ["patient_id", "patient_name"];

const MALE_TOKENS: [&str; 7] = ["m", "male", "1", "true", "t", "yes", "y"];
const FEMALE_TOKENS: [&str; 6] = ["f", "female", "0", "false", "n", "no"];

/// Ordered feature names expected by the model.
///
/// Cheap to clone; the names are shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureSpec {
    names: Arc<[String]>,
}

impl FeatureSpec {
    /// Build a feature spec from an ordered list of names.
    ///
    /// # Errors
    /// Returns an error if the list is empty or contains duplicates.
    pub fn new<I, S>(names: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err("feature order must not be empty".to_string());
        }
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(format!("feature name at position {i} is blank"));
            }
            if names[..i].contains(name) {
                return Err(format!("duplicate feature name: {name}"));
            }
        }
        Ok(Self {
            names: names.into(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Position of a canonical feature name in the vector layout.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// Aliases accepted for a canonical feature name.
#[must_use]
pub fn aliases_for(name: &str) -> &'static [&'static str] {
    FEATURE_ALIASES
        .iter()
        .find(|(canonical, _)| *canonical == name)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

/// Whether a feature carries a categorical sex/gender encoding.
#[must_use]
pub fn is_sex_feature(name: &str) -> bool {
    matches!(name.to_ascii_lowercase().as_str(), "sex" | "gender")
}

/// Fixed-length feature values laid out in [`FeatureSpec`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One field that was present but could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// Every missing and invalid field of a request, collected in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub missing: Vec<String>,
    pub invalid: Vec<FieldIssue>,
}

impl ValidationError {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }

    /// Names of all offending fields, missing first.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.missing
            .iter()
            .map(String::as_str)
            .chain(self.invalid.iter().map(|i| i.field.as_str()))
            .collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("Missing required fields: {}", self.missing.join(", ")));
        }
        for issue in &self.invalid {
            parts.push(format!(
                "Field {} {} (value: {})",
                issue.field, issue.reason, issue.value
            ));
        }
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// A request that passed validation.
#[derive(Debug, Clone)]
pub struct NormalizedRequest {
    pub patient_id: String,

    /// Values in model order.
    pub vector: FeatureVector,

    /// Same values keyed by canonical feature name.
    pub values: BTreeMap<String, f64>,
}

/// Normalize a raw request against the feature spec.
///
/// # Errors
/// Returns a [`ValidationError`] naming every missing or invalid field,
/// including the patient identifier.
pub fn normalize(
    raw: &Map<String, Value>,
    spec: &FeatureSpec,
) -> Result<NormalizedRequest, ValidationError> {
    let mut errors = ValidationError::default();

    let patient_id = match resolve_patient_id(raw) {
        PatientId::Present(id) => Some(id),
        PatientId::Missing => {
            errors.missing.push(PATIENT_ID_KEYS[0].to_string());
            None
        }
        PatientId::Invalid(value) => {
            errors.invalid.push(FieldIssue {
                field: PATIENT_ID_KEYS[0].to_string(),
                value,
                reason: "must be a non-empty string".to_string(),
            });
            None
        }
    };

    let mut vector = Vec::with_capacity(spec.len());
    let mut values = BTreeMap::new();

    for name in spec.iter() {
        let Some(raw_value) = lookup(raw, name) else {
            errors.missing.push(name.to_string());
            continue;
        };

        let (parsed, reason) = if is_sex_feature(name) {
            (
                parse_sex(raw_value),
                "could not be interpreted as sex (Male/Female, m/f, 1/0)",
            )
        } else {
            (parse_numeric(raw_value), "must be numeric")
        };

        match parsed {
            Some(v) => {
                vector.push(v);
                values.insert(name.to_string(), v);
            }
            None => errors.invalid.push(FieldIssue {
                field: name.to_string(),
                value: render(raw_value),
                reason: reason.to_string(),
            }),
        }
    }

    match patient_id {
        Some(patient_id) if errors.is_empty() => Ok(NormalizedRequest {
            patient_id,
            vector: FeatureVector::new(vector),
            values,
        }),
        _ => Err(errors),
    }
}

enum PatientId {
    Present(String),
    Missing,
    Invalid(String),
}

fn resolve_patient_id(raw: &Map<String, Value>) -> PatientId {
    let Some(value) = PATIENT_ID_KEYS.iter().find_map(|k| raw.get(*k)) else {
        return PatientId::Missing;
    };
    let id = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => return PatientId::Missing,
        other => return PatientId::Invalid(other.to_string()),
    };
    if id.is_empty() {
        PatientId::Invalid(render(value))
    } else {
        PatientId::Present(id)
    }
}

fn lookup<'a>(raw: &'a Map<String, Value>, canonical: &str) -> Option<&'a Value> {
    std::iter::once(canonical)
        .chain(aliases_for(canonical).iter().copied())
        .find_map(|key| raw.get(key))
}

/// Interpret a sex/gender value: 1.0 for male, 0.0 for female.
#[must_use]
pub fn parse_sex(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().and_then(sex_from_number),
        Value::String(s) => {
            let token = s.trim().to_lowercase();
            if MALE_TOKENS.contains(&token.as_str()) {
                Some(1.0)
            } else if FEMALE_TOKENS.contains(&token.as_str()) {
                Some(0.0)
            } else {
                token.parse::<f64>().ok().and_then(sex_from_number)
            }
        }
        _ => None,
    }
}

// Integer part 1 means male, any other finite number female.
fn sex_from_number(v: f64) -> Option<f64> {
    if !v.is_finite() {
        return None;
    }
    Some(if v.trunc() == 1.0 { 1.0 } else { 0.0 })
}

fn parse_numeric(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    v.is_finite().then_some(v)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
