//! Audit fingerprints and record identifiers.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonical payload hashed into the fingerprint.
///
/// Field order is alphabetical and `features` is a `BTreeMap`, so the JSON
/// encoding has sorted keys at every level.
#[derive(Serialize)]
struct FingerprintPayload<'a> {
    disease_probability: f64,
    features: &'a BTreeMap<String, f64>,
    patient_id: &'a str,
    prediction: &'a str,
}

/// SHA-256 hex digest identifying one assessment.
///
/// Deterministic: the same inputs always produce the same fingerprint. No
/// timestamp is included.
#[must_use]
pub fn audit_fingerprint(
    patient_id: &str,
    features: &BTreeMap<String, f64>,
    prediction: &str,
    disease_probability: f64,
) -> String {
    let payload = FingerprintPayload {
        disease_probability,
        features,
        patient_id,
        prediction,
    };
    // Serializing plain data with string keys cannot fail; fall back to the
    // debug form rather than panic.
    let canonical = serde_json::to_string(&payload).unwrap_or_else(|_| {
        format!("{patient_id}|{features:?}|{prediction}|{disease_probability}")
    });

    Sha256::digest(canonical.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Random UUID v4 from a CSPRNG.
#[must_use]
pub fn new_record_id() -> String {
    use rand::Rng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    let mut rng = ChaCha20Rng::from_entropy();
    let mut bytes: [u8; 16] = rng.gen();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
