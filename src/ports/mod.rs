//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the application and external systems (model artifacts,
//! explainers, storage).

pub mod classifier;
mod explainer;
mod storage;

pub use classifier::{
    class_probabilities, Classifier, FeatureScaler, ModelBundle, ModelCapability, ModelError,
};
pub use explainer::{Attributor, ExplainerError, ExplainerFactory};
pub use storage::{PredictionRecord, PredictionStore, SOURCE_API};
