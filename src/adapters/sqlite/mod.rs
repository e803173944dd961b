//! SQLite adapter: Implementation of `PredictionStore`.
//!
//! Provides local persistence for served predictions.
//!
//! # Security
//!
//! Patient identifiers, predicted labels and every feature value are
//! field-encrypted with AES-256-GCM before they reach the database. The
//! probability, risk level, audit hash, source and timestamp are stored in
//! clear for reporting.
//!
//! # Mutex Behavior
//!
//! Database connection is protected by `Mutex`. A poisoned mutex (from panic
//! in another thread) will cause panic. This fail-fast behavior is intentional
//! for data integrity in healthcare applications.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::domain::{FieldCipher, FieldCryptoError, RiskTier};
use crate::ports::{PredictionRecord, PredictionStore};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Field encryption failed: {0}")]
    Crypto(#[from] FieldCryptoError),

    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// SQLite storage adapter.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    cipher: Arc<FieldCipher>,
}

/// A row as stored, before decryption.
struct StoredRow {
    id: String,
    patient_id: String,
    features: String,
    predicted_label: String,
    probability: f64,
    risk_level: String,
    record_hash: String,
    source: String,
    created_at: String,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// # Errors
    /// Returns error if database cannot be opened or initialized.
    pub fn new<P: AsRef<Path>>(path: P, cipher: Arc<FieldCipher>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
            cipher,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (for testing).
    ///
    /// # Errors
    /// Returns error if database cannot be created.
    pub fn in_memory(cipher: Arc<FieldCipher>) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
            cipher,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize the database schema.
    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock().expect("Lock failed");

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS predictions (
                id TEXT PRIMARY KEY,
                patient_id_enc TEXT NOT NULL,
                features_enc TEXT NOT NULL,
                predicted_label_enc TEXT NOT NULL,
                probability REAL NOT NULL,
                risk_level TEXT NOT NULL,
                record_hash TEXT NOT NULL,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_predictions_created
                ON predictions(created_at DESC);
            ",
        )?;

        Ok(())
    }

    /// Encrypt each feature value and serialize the map as JSON.
    fn encrypt_features(&self, features: &BTreeMap<String, f64>) -> Result<String, StorageError> {
        let sealed = features
            .iter()
            .map(|(name, value)| -> Result<(String, String), StorageError> {
                Ok((name.clone(), self.cipher.encrypt(&value.to_string())?))
            })
            .collect::<Result<BTreeMap<String, String>, StorageError>>()?;
        serde_json::to_string(&sealed).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn decrypt_features(&self, id: &str, json: &str) -> Result<BTreeMap<String, f64>, StorageError> {
        let sealed: BTreeMap<String, String> =
            serde_json::from_str(json).map_err(|e| StorageError::Serialization(e.to_string()))?;
        sealed
            .into_iter()
            .map(|(name, ciphertext)| -> Result<(String, f64), StorageError> {
                let text = self.cipher.decrypt(&ciphertext)?;
                let value = text.parse::<f64>().map_err(|_| StorageError::Corrupt {
                    id: id.to_string(),
                    reason: format!("feature {name} is not numeric"),
                })?;
                Ok((name, value))
            })
            .collect()
    }

    fn decrypt_row(&self, row: StoredRow) -> Result<PredictionRecord, StorageError> {
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt {
                id: row.id.clone(),
                reason: format!("bad timestamp: {e}"),
            })?;
        let risk_level = string_to_risk_level(&row.risk_level).ok_or_else(|| StorageError::Corrupt {
            id: row.id.clone(),
            reason: format!("unknown risk level {}", row.risk_level),
        })?;

        Ok(PredictionRecord {
            patient_id: self.cipher.decrypt(&row.patient_id)?,
            features: self.decrypt_features(&row.id, &row.features)?,
            predicted_label: self.cipher.decrypt(&row.predicted_label)?,
            probability: row.probability,
            risk_level,
            record_hash: row.record_hash,
            source: row.source,
            created_at,
            id: row.id,
        })
    }
}

/// Convert string to RiskTier.
fn string_to_risk_level(s: &str) -> Option<RiskTier> {
    match s {
        "Low" => Some(RiskTier::Low),
        "Medium" => Some(RiskTier::Medium),
        "Borderline" => Some(RiskTier::Borderline),
        "Mild" => Some(RiskTier::Mild),
        "Moderate" => Some(RiskTier::Moderate),
        "High" => Some(RiskTier::High),
        _ => None,
    }
}

impl PredictionStore for SqliteStorage {
    type Error = StorageError;

    fn save_prediction(&self, record: &PredictionRecord) -> Result<(), Self::Error> {
        // Encrypt before taking the lock.
        let patient_id = self.cipher.encrypt(&record.patient_id)?;
        let features = self.encrypt_features(&record.features)?;
        let predicted_label = self.cipher.encrypt(&record.predicted_label)?;

        let conn = self.conn.lock().expect("Lock failed");
        conn.execute(
            r"
            INSERT INTO predictions (
                id, patient_id_enc, features_enc, predicted_label_enc, probability,
                risk_level, record_hash, source, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
            params![
                record.id,
                patient_id,
                features,
                predicted_label,
                record.probability,
                record.risk_level.to_string(),
                record.record_hash,
                record.source,
                record.created_at.to_rfc3339(),
            ],
        )?;

        tracing::debug!("Saved prediction {} to storage", record.id);
        Ok(())
    }

    fn load_recent_predictions(&self, limit: usize) -> Result<Vec<PredictionRecord>, Self::Error> {
        let rows = {
            let conn = self.conn.lock().expect("Lock failed");
            let mut stmt = conn.prepare(
                r"
                SELECT id, patient_id_enc, features_enc, predicted_label_enc, probability,
                       risk_level, record_hash, source, created_at
                FROM predictions
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?1
                ",
            )?;

            let rows = stmt
                .query_map(params![limit as i64], |row| {
                    Ok(StoredRow {
                        id: row.get(0)?,
                        patient_id: row.get(1)?,
                        features: row.get(2)?,
                        predicted_label: row.get(3)?,
                        probability: row.get(4)?,
                        risk_level: row.get(5)?,
                        record_hash: row.get(6)?,
                        source: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        rows.into_iter().map(|row| self.decrypt_row(row)).collect()
    }

    fn count_predictions(&self) -> Result<usize, Self::Error> {
        let conn = self.conn.lock().expect("Lock failed");

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM predictions", [], |row| row.get(0))?;

        Ok(count as usize)
    }
}
