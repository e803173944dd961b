//! Dietary guidance derived from the risk tier and lab values.

use std::collections::BTreeMap;

use super::risk::RiskTier;

/// Upper reference limits (mg/dL, U/L) and lower limits (g/dL).
const TOTAL_BILIRUBIN_MAX: f64 = 1.2;
const DIRECT_BILIRUBIN_MAX: f64 = 0.3;
const ALT_MAX: f64 = 56.0;
const AST_MAX: f64 = 40.0;
const ALKPHOS_MAX: f64 = 147.0;
const ALBUMIN_MIN: f64 = 3.5;
const TOTAL_PROTEIN_MIN: f64 = 6.0;

const MAINTENANCE: &[&str] = &[
    "Keep a balanced diet rich in vegetables, fruit and whole grains.",
    "Limit alcohol and sugary drinks.",
    "Stay hydrated and keep a healthy body weight.",
];

const LIVER_FRIENDLY: &[&str] = &[
    "Avoid alcohol completely until a follow-up test.",
    "Reduce fried, fatty and heavily processed foods.",
    "Prefer lean proteins such as fish, legumes and poultry.",
    "Include coffee or green tea in moderation, and plenty of leafy greens.",
];

const STRICT: &[&str] = &[
    "Avoid alcohol completely.",
    "Follow a low-fat, low-salt liver diet with small frequent meals.",
    "Avoid raw shellfish and unpasteurized products.",
    "Ask for a referral to a clinical dietitian for a tailored meal plan.",
];

const BILIRUBIN: &str =
    "Elevated bilirubin: favour fibre-rich foods (oats, berries, legumes) and avoid fatty meals.";
const TRANSAMINASES: &str =
    "Elevated liver enzymes: cut refined sugars and saturated fat, and avoid unprescribed supplements.";
const ALKALINE_PHOSPHATASE: &str =
    "Elevated alkaline phosphatase: keep fat intake low and discuss gallbladder health with a doctor.";
const LOW_PROTEIN: &str =
    "Low albumin or protein: add high-quality protein (eggs, fish, dairy, legumes) to each meal.";

/// Deterministic, de-duplicated list of food recommendations.
///
/// `values` holds raw request values keyed by canonical feature name; absent
/// labs produce no lab-specific advice.
#[must_use]
pub fn recommend(tier: RiskTier, values: &BTreeMap<String, f64>) -> Vec<String> {
    let base = match tier {
        RiskTier::Low | RiskTier::Medium => MAINTENANCE,
        RiskTier::Borderline | RiskTier::Mild => LIVER_FRIENDLY,
        RiskTier::Moderate | RiskTier::High => STRICT,
    };

    let above = |name: &str, limit: f64| values.get(name).is_some_and(|v| *v > limit);
    let below = |name: &str, limit: f64| values.get(name).is_some_and(|v| *v < limit);

    let mut advice: Vec<&str> = base.to_vec();
    if above("TB", TOTAL_BILIRUBIN_MAX) || above("DB", DIRECT_BILIRUBIN_MAX) {
        advice.push(BILIRUBIN);
    }
    if above("Sgpt", ALT_MAX) || above("Sgot", AST_MAX) {
        advice.push(TRANSAMINASES);
    }
    if above("Alkphos", ALKPHOS_MAX) {
        advice.push(ALKALINE_PHOSPHATASE);
    }
    if below("ALB", ALBUMIN_MIN) || below("TP", TOTAL_PROTEIN_MIN) {
        advice.push(LOW_PROTEIN);
    }

    let mut out: Vec<String> = Vec::with_capacity(advice.len());
    for line in advice {
        if !out.iter().any(|existing| existing == line) {
            out.push(line.to_string());
        }
    }
    out
}
