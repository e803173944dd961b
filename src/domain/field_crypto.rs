//! Field-level encryption for persisted patient data.
//!
//! Each value is sealed with AES-256-GCM under a fresh random 96-bit nonce
//! and stored as `base64(nonce || ciphertext || tag)`.
//!
//! # Key material
//!
//! The 32-byte key is managed outside the application and supplied as
//! base64. Sources, highest precedence first:
//! - `HEPACHECK_FIELD_KEY_FILE` (path to a file holding the key)
//! - `/run/secrets/hepacheck_field_key` (Docker/Compose secret default)
//! - `HEPACHECK_FIELD_KEY` (debug builds only)

use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

pub const FIELD_KEY_FILE_ENV: &str = "HEPACHECK_FIELD_KEY_FILE";
pub const FIELD_KEY_DOCKER_SECRET_PATH: &str = "/run/secrets/hepacheck_field_key";

// Dev-only escape hatch for local runs.
pub const FIELD_KEY_ENV_DEV: &str = "HEPACHECK_FIELD_KEY";

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Errors during field encryption/decryption.
#[derive(Debug, Error)]
pub enum FieldCryptoError {
    #[error("Invalid field key: expected {KEY_LEN} bytes of base64")]
    InvalidKey,

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("Invalid ciphertext format")]
    InvalidFormat,

    #[error(
        "Missing field key: provide {FIELD_KEY_FILE_ENV} (or mount {FIELD_KEY_DOCKER_SECRET_PATH})"
    )]
    MissingKey,

    #[error("Failed to read field key: {0}")]
    Io(String),
}

/// Authenticated cipher for individual stored fields.
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Build a cipher from raw key bytes.
    ///
    /// # Errors
    /// Returns `InvalidKey` unless exactly 32 bytes are given.
    pub fn from_key_bytes(key: &[u8]) -> Result<Self, FieldCryptoError> {
        if key.len() != KEY_LEN {
            return Err(FieldCryptoError::InvalidKey);
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| FieldCryptoError::InvalidKey)?;
        Ok(Self { cipher })
    }

    /// Build a cipher from a base64-encoded key.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the text is not base64 of a 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, FieldCryptoError> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.trim())
                .map_err(|_| FieldCryptoError::InvalidKey)?,
        );
        Self::from_key_bytes(&bytes)
    }

    /// Load the key from the configured secret sources.
    ///
    /// # Errors
    /// Returns `MissingKey` if no source provides a key, or the error of the
    /// first source that is present but unusable.
    pub fn from_env() -> Result<Self, FieldCryptoError> {
        let key = KeySources::from_env().resolve()?;
        Self::from_base64(&key)
    }

    /// Encrypt a UTF-8 value.
    ///
    /// # Errors
    /// Returns `Encryption` if the AEAD operation fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, FieldCryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| FieldCryptoError::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypt a value produced by [`FieldCipher::encrypt`].
    ///
    /// # Errors
    /// Returns `InvalidFormat` for malformed input and `Decryption` if the key
    /// is wrong or the data was tampered with.
    pub fn decrypt(&self, sealed: &str) -> Result<String, FieldCryptoError> {
        let bytes = STANDARD
            .decode(sealed.trim())
            .map_err(|_| FieldCryptoError::InvalidFormat)?;
        if bytes.len() <= NONCE_LEN {
            return Err(FieldCryptoError::InvalidFormat);
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
                .map_err(|_| FieldCryptoError::Decryption)?,
        );

        String::from_utf8(plaintext.to_vec()).map_err(|_| FieldCryptoError::InvalidFormat)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

/// Generate fresh key material, base64-encoded.
#[must_use]
pub fn generate_key() -> Zeroizing<String> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut *key);
    Zeroizing::new(STANDARD.encode(&*key))
}

/// Where the field key may come from.
#[derive(Clone)]
pub struct KeySources {
    pub key_file: Option<PathBuf>,
    pub docker_secret: PathBuf,
    pub dev_key: Option<Zeroizing<String>>,
}

impl KeySources {
    /// Read the source locations from the environment.
    ///
    /// The dev variable is ignored in release builds.
    #[must_use]
    pub fn from_env() -> Self {
        let dev_key = if cfg!(debug_assertions) {
            std::env::var(FIELD_KEY_ENV_DEV).ok().map(Zeroizing::new)
        } else {
            None
        };
        Self {
            key_file: std::env::var(FIELD_KEY_FILE_ENV)
                .ok()
                .map(|p| PathBuf::from(p.trim())),
            docker_secret: PathBuf::from(FIELD_KEY_DOCKER_SECRET_PATH),
            dev_key,
        }
    }

    /// Return the base64 key text from the first available source.
    ///
    /// # Errors
    /// Returns `MissingKey` when no source is available, `Io` when a
    /// configured file cannot be read.
    pub fn resolve(&self) -> Result<Zeroizing<String>, FieldCryptoError> {
        if let Some(path) = &self.key_file {
            return read_key_file(path);
        }

        if self.docker_secret.exists() {
            return read_key_file(&self.docker_secret);
        }

        if let Some(key) = &self.dev_key {
            let key = key.trim_end_matches(['\n', '\r']);
            if key.is_empty() {
                return Err(FieldCryptoError::MissingKey);
            }
            return Ok(Zeroizing::new(key.to_string()));
        }

        Err(FieldCryptoError::MissingKey)
    }
}

fn read_key_file(path: &Path) -> Result<Zeroizing<String>, FieldCryptoError> {
    let content = Zeroizing::new(
        std::fs::read_to_string(path).map_err(|e| FieldCryptoError::Io(e.to_string()))?,
    );
    let key = content.trim_end_matches(['\n', '\r']);
    if key.is_empty() {
        return Err(FieldCryptoError::MissingKey);
    }
    Ok(Zeroizing::new(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> FieldCipher {
        FieldCipher::from_key_bytes(&[7u8; KEY_LEN]).expect("valid key")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = cipher();
        let sealed = cipher.encrypt("P-000123").expect("Encryption should succeed");
        assert_eq!(cipher.decrypt(&sealed).expect("Decryption should succeed"), "P-000123");
    }

    #[test]
    fn test_same_plaintext_produces_different_ciphertexts() {
        let cipher = cipher();
        let a = cipher.encrypt("Disease").expect("encrypt");
        let b = cipher.encrypt("Disease").expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = cipher().encrypt("3.1").expect("encrypt");
        let other = FieldCipher::from_key_bytes(&[8u8; KEY_LEN]).expect("valid key");
        assert!(matches!(other.decrypt(&sealed), Err(FieldCryptoError::Decryption)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = cipher();
        let sealed = cipher.encrypt("52").expect("encrypt");
        let mut bytes = STANDARD.decode(&sealed).expect("base64");
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = STANDARD.encode(bytes);
        assert!(matches!(cipher.decrypt(&tampered), Err(FieldCryptoError::Decryption)));
    }

    #[test]
    fn test_malformed_input() {
        let cipher = cipher();
        assert!(matches!(cipher.decrypt("not base64!"), Err(FieldCryptoError::InvalidFormat)));
        assert!(matches!(cipher.decrypt("AAAA"), Err(FieldCryptoError::InvalidFormat)));
    }

    #[test]
    fn test_key_validation() {
        assert!(matches!(
            FieldCipher::from_key_bytes(&[1u8; 16]),
            Err(FieldCryptoError::InvalidKey)
        ));
        assert!(FieldCipher::from_base64(&generate_key()).is_ok());
        assert!(FieldCipher::from_base64("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_key_file_takes_precedence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("field.key");
        let key = generate_key();
        std::fs::write(&path, format!("{}\n", key.as_str())).expect("write key");

        let sources = KeySources {
            key_file: Some(path),
            docker_secret: dir.path().join("missing"),
            dev_key: Some(Zeroizing::new("ignored".to_string())),
        };
        assert_eq!(sources.resolve().expect("resolve").as_str(), key.as_str());
    }

    #[test]
    fn test_missing_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sources = KeySources {
            key_file: None,
            docker_secret: dir.path().join("missing"),
            dev_key: None,
        };
        assert!(matches!(sources.resolve(), Err(FieldCryptoError::MissingKey)));
    }

    #[test]
    fn test_debug_does_not_leak() {
        let debug_output = format!("{:?}", cipher());
        assert!(!debug_output.contains("7, 7"));
    }
}
