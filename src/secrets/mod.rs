//! At-rest field encryption for tenant credentials.
//!
//! The configuration store holds sensitive fields (provider API keys,
//! channel bot tokens) in a string envelope:
//!
//! ```text
//! enc:v1:<base64 salt>:<base64 nonce||ciphertext||tag>
//! ```
//!
//! The supervisor consumes this as an opaque decrypt capability via
//! [`SecretCodec`]; values without the envelope prefix (legacy plaintext
//! rows, test fixtures) pass through unchanged.

mod crypto;

pub use crypto::FieldCrypto;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use secrecy::SecretString;

use crate::error::SecretError;
use crate::store::TenantConfig;

/// Envelope prefix marking an encrypted value.
pub const ENVELOPE_PREFIX: &str = "enc:v1:";

/// Decrypt/encrypt capability over the known sensitive fields of a
/// [`TenantConfig`].
pub trait SecretCodec: Send + Sync {
    /// Decrypt the field allowlist in place: provider API key and channel
    /// tokens. Unrecognized or already-plaintext values pass through.
    fn decrypt_fields(&self, config: TenantConfig) -> Result<TenantConfig, SecretError>;

    /// Decrypt a single value, passing plaintext through unchanged.
    fn decrypt_value(&self, value: &str) -> Result<String, SecretError>;

    /// Encrypt a single value into the envelope format. Exposed for the
    /// API layer's write path.
    fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretError>;
}

/// Production codec backed by [`FieldCrypto`].
#[derive(Debug)]
pub struct FieldCodec {
    crypto: FieldCrypto,
}

impl FieldCodec {
    pub fn new(master_key: SecretString) -> Result<Self, SecretError> {
        Ok(Self {
            crypto: FieldCrypto::new(master_key)?,
        })
    }
}

impl SecretCodec for FieldCodec {
    fn decrypt_fields(&self, mut config: TenantConfig) -> Result<TenantConfig, SecretError> {
        config.api_key = config
            .api_key
            .map(|v| self.decrypt_value(&v))
            .transpose()?;
        config.channels.telegram_token = config
            .channels
            .telegram_token
            .map(|v| self.decrypt_value(&v))
            .transpose()?;
        config.channels.whatsapp_token = config
            .channels
            .whatsapp_token
            .map(|v| self.decrypt_value(&v))
            .transpose()?;
        Ok(config)
    }

    fn decrypt_value(&self, value: &str) -> Result<String, SecretError> {
        let Some(body) = value.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(value.to_string());
        };

        let (salt_b64, payload_b64) = body.split_once(':').ok_or_else(|| {
            SecretError::MalformedEnvelope("expected <salt>:<payload>".to_string())
        })?;
        let salt = BASE64
            .decode(salt_b64)
            .map_err(|e| SecretError::MalformedEnvelope(format!("bad salt encoding: {e}")))?;
        let payload = BASE64
            .decode(payload_b64)
            .map_err(|e| SecretError::MalformedEnvelope(format!("bad payload encoding: {e}")))?;

        let plaintext = self.crypto.decrypt(&payload, &salt)?;
        String::from_utf8(plaintext)
            .map_err(|_| SecretError::DecryptionFailed("value is not valid UTF-8".to_string()))
    }

    fn encrypt_value(&self, plaintext: &str) -> Result<String, SecretError> {
        let (payload, salt) = self.crypto.encrypt(plaintext.as_bytes())?;
        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            BASE64.encode(salt),
            BASE64.encode(payload)
        ))
    }
}
