//! Error types for the orchestration core.
//!
//! Each area has its own `thiserror` enum; everything that can cross the
//! supervisor's public boundary is folded into [`SupervisorError`] so the
//! API layer receives structured results instead of panics.

use rust_decimal::Decimal;
use uuid::Uuid;

/// Errors surfaced by the process supervisor's public operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// No configuration exists for this tenant. Not retried.
    #[error("no configuration found for tenant {tenant_id}")]
    ConfigurationMissing { tenant_id: Uuid },

    /// Platform-credential billing mode was requested but no platform key
    /// is configured on this deployment.
    #[error("tenant {tenant_id} requested platform-credential mode but PLATFORM_API_KEY is not set")]
    PlatformCredentialUnconfigured { tenant_id: Uuid },

    /// The tenant bills against its own key but none is stored.
    #[error("tenant {tenant_id} has no provider API key configured")]
    ProviderCredentialMissing { tenant_id: Uuid },

    /// The OS refused to spawn the agent or bridge process.
    #[error("failed to launch {process} for tenant {tenant_id}: {reason}")]
    LaunchFailed {
        tenant_id: Uuid,
        process: &'static str,
        reason: String,
    },

    /// A stored secret could not be decrypted.
    #[error("secret decryption failed for tenant {tenant_id}: {reason}")]
    Decrypt { tenant_id: Uuid, reason: String },

    /// Workspace directory or default documents could not be created.
    #[error("workspace bootstrap failed for tenant {tenant_id}: {reason}")]
    Workspace { tenant_id: Uuid, reason: String },

    /// Configuration store failure other than a missing tenant.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the external configuration store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("tenant {0} not found")]
    NotFound(Uuid),

    #[error("configuration store backend error: {0}")]
    Backend(String),
}

/// Errors from the external credit ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The debit would take the balance negative.
    #[error("insufficient credits for tenant {tenant_id}: debit of {amount} refused")]
    InsufficientCredits { tenant_id: Uuid, amount: Decimal },

    #[error("credit ledger backend error: {0}")]
    Backend(String),
}

/// Errors from the model pricing catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("pricing catalog unreachable: {0}")]
    Unreachable(String),

    #[error("pricing catalog returned a malformed payload: {0}")]
    Malformed(String),
}

/// Errors from the field-level secret codec.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("master key must be at least 32 bytes")]
    InvalidMasterKey,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("malformed secret envelope: {0}")]
    MalformedEnvelope(String),
}

/// Errors from supervisor configuration resolution.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required configuration {key}: {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
