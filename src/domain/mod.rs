//! Domain layer: Core types and pure logic.
//!
//! Nothing here performs I/O apart from reading field-key material. All
//! response types are serializable.

pub mod assessment;
pub mod attribution;
pub mod audit;
pub mod confidence;
pub mod features;
pub mod field_crypto;
pub mod prediction;
pub mod recommendations;
pub mod risk;

pub use assessment::Assessment;
pub use attribution::{Attribution, AttributionSet, AttributionSource};
pub use confidence::ConfidenceBundle;
pub use features::{FeatureSpec, FeatureVector, FieldIssue, NormalizedRequest, ValidationError};
pub use field_crypto::{FieldCipher, FieldCryptoError};
pub use prediction::{PredictionResult, SecondOpinion};
pub use risk::{PredictedClass, RiskTier};
