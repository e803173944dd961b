//! Application layer: Use cases and services.
//!
//! This module orchestrates domain logic with ports to implement
//! the core use cases of the application.

pub mod prediction;
pub mod registry;

pub use prediction::PredictionService;
pub use registry::{ArtifactRegistry, ExplainerSlot, DEFAULT_EXPLAINER_RETRY};
