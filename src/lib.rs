//! # Hepacheck
//!
//! Liver-disease risk prediction service.
//!
//! This crate provides:
//! - Validation and normalization of raw laboratory panels
//! - Primary and secondary classifier predictions with risk tiers
//! - Exact Shapley attributions with a magnitude fallback
//! - Confidence synthesis, explanations and dietary guidance
//! - Field-encrypted persistence of served predictions
//!
//! ## Architecture
//!
//! The crate follows Hexagonal Architecture:
//! - `domain`: Core business types (features, risk tiers, assessments)
//! - `ports`: Trait definitions for models, explainers and storage
//! - `adapters`: Concrete implementations (artifacts, SQLite, HTTP)
//! - `application`: Use cases orchestrating domain and ports

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use config::Config;
pub use domain::{Assessment, PredictedClass, RiskTier};

/// Result type for Hepacheck operations
pub type Result<T> = std::result::Result<T, HepacheckError>;

/// Main error type for Hepacheck
#[derive(Debug, thiserror::Error)]
pub enum HepacheckError {
    #[error("Invalid input: {0}")]
    Validation(#[from] domain::ValidationError),

    #[error("Model error: {0}")]
    Model(#[from] ports::ModelError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] adapters::artifacts::ArtifactError),

    #[error("Field encryption failed: {0}")]
    Crypto(#[from] domain::FieldCryptoError),

    #[error("Storage operation failed: {0}")]
    Storage(#[from] adapters::StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
