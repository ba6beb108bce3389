//! Cryptographic primitives for at-rest field encryption.
//!
//! Uses AES-256-GCM for authenticated encryption with per-value key
//! derivation:
//!
//! ```text
//! master_key (from env) ─┬─► HKDF-SHA256 ─► derived_key (per value)
//!                        │
//! per-value salt ────────┘
//! ```
//!
//! Each encrypted value carries its own randomly-generated salt, so two
//! tenants storing the same token never share a ciphertext.

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng},
};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::error::SecretError;

/// Size of the AES-256 key in bytes.
const KEY_SIZE: usize = 32;

/// Size of the GCM nonce in bytes.
const NONCE_SIZE: usize = 12;

/// Size of the per-value salt for key derivation.
const SALT_SIZE: usize = 32;

/// Size of the GCM authentication tag.
const TAG_SIZE: usize = 16;

/// Holds the master key and provides raw encrypt/decrypt operations.
/// The envelope format layered on top lives in the parent module.
pub struct FieldCrypto {
    master_key: SecretString,
}

impl FieldCrypto {
    /// Create a crypto instance from a master key of at least 32 bytes of
    /// high-entropy data, typically loaded from an environment variable.
    pub fn new(master_key: SecretString) -> Result<Self, SecretError> {
        if master_key.expose_secret().len() < KEY_SIZE {
            return Err(SecretError::InvalidMasterKey);
        }
        Ok(Self { master_key })
    }

    /// Generate a random salt for a new value.
    pub fn generate_salt() -> Vec<u8> {
        let mut salt = vec![0u8; SALT_SIZE];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut salt);
        salt
    }

    /// Encrypt a value. Returns `(nonce || ciphertext || tag, salt)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), SecretError> {
        let salt = Self::generate_salt();
        let derived_key = self.derive_key(&salt)?;

        let cipher = Aes256Gcm::new_from_slice(&derived_key)
            .map_err(|e| SecretError::EncryptionFailed(format!("failed to create cipher: {e}")))?;

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| SecretError::EncryptionFailed(e.to_string()))?;

        let mut encrypted = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        encrypted.extend_from_slice(&nonce);
        encrypted.extend_from_slice(&ciphertext);

        Ok((encrypted, salt))
    }

    /// Decrypt `nonce || ciphertext || tag` with the salt used at
    /// encryption time.
    pub fn decrypt(&self, encrypted: &[u8], salt: &[u8]) -> Result<Vec<u8>, SecretError> {
        if encrypted.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecretError::DecryptionFailed(
                "encrypted value too short".to_string(),
            ));
        }

        let derived_key = self.derive_key(salt)?;
        let cipher = Aes256Gcm::new_from_slice(&derived_key)
            .map_err(|e| SecretError::DecryptionFailed(format!("failed to create cipher: {e}")))?;

        let (nonce_bytes, ciphertext) = encrypted.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| SecretError::DecryptionFailed(e.to_string()))
    }

    /// Derive a per-value key using HKDF-SHA256.
    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_SIZE], SecretError> {
        let master_bytes = self.master_key.expose_secret().as_bytes();
        let hk = Hkdf::<Sha256>::new(Some(salt), master_bytes);

        let mut derived = [0u8; KEY_SIZE];
        hk.expand(b"apiary-secrets-v1", &mut derived)
            .map_err(|_| SecretError::EncryptionFailed("HKDF expansion failed".to_string()))?;

        Ok(derived)
    }
}

impl std::fmt::Debug for FieldCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCrypto")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::FieldCrypto;

    fn test_crypto() -> FieldCrypto {
        // 32-byte test key
        let key = "0123456789abcdef0123456789abcdef";
        FieldCrypto::new(SecretString::from(key.to_string())).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let crypto = test_crypto();
        let plaintext = b"sk-ant-tenant-key-12345";

        let (encrypted, salt) = crypto.encrypt(plaintext).unwrap();
        assert!(encrypted.len() > plaintext.len());

        let decrypted = crypto.decrypt(&encrypted, &salt).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn different_salts_different_ciphertext() {
        let crypto = test_crypto();
        let plaintext = b"same_token";

        let (encrypted1, salt1) = crypto.encrypt(plaintext).unwrap();
        let (encrypted2, salt2) = crypto.encrypt(plaintext).unwrap();

        assert_ne!(salt1, salt2);
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn wrong_salt_fails() {
        let crypto = test_crypto();
        let (encrypted, _salt) = crypto.encrypt(b"secret").unwrap();
        let wrong_salt = FieldCrypto::generate_salt();
        assert!(crypto.decrypt(&encrypted, &wrong_salt).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let crypto = test_crypto();
        let (mut encrypted, salt) = crypto.encrypt(b"secret").unwrap();

        if let Some(byte) = encrypted.last_mut() {
            *byte ^= 0xFF;
        }
        assert!(crypto.decrypt(&encrypted, &salt).is_err());
    }

    #[test]
    fn master_key_too_short() {
        let result = FieldCrypto::new(SecretString::from("tooshort".to_string()));
        assert!(result.is_err());
    }
}
