//! Interfaces to the external collaborators.
//!
//! The relational configuration store, the credit ledger, and the model
//! pricing catalog all live outside this crate (they belong to the API
//! layer's deployment). The supervisor only depends on the traits here;
//! tests drive it with in-memory implementations.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{CatalogError, LedgerError, StoreError};

/// Subscription tier of a tenant. Only paid tenants are eligible for
/// automatic crash recovery and usage metering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Free,
    Paid,
}

impl Tier {
    pub fn is_paid(self) -> bool {
        matches!(self, Self::Paid)
    }
}

/// Persisted lifecycle status of a tenant runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantStatus {
    Running,
    Stopped,
    Restarting,
}

impl std::fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Restarting => write!(f, "restarting"),
        }
    }
}

/// Per-channel enablement and credentials.
///
/// Token fields may hold either plaintext or an `enc:v1:` envelope; the
/// supervisor runs them through the [`crate::secrets::SecretCodec`] before
/// building a launch spec.
#[derive(Debug, Clone, Default)]
pub struct ChannelSettings {
    pub telegram_enabled: bool,
    pub telegram_token: Option<String>,
    pub whatsapp_enabled: bool,
    pub whatsapp_token: Option<String>,
}

/// Tool enablement flags passed through to the agent runtime.
#[derive(Debug, Clone, Default)]
pub struct ToolToggles {
    pub web_search: bool,
    pub code_exec: bool,
    pub scheduler: bool,
}

impl ToolToggles {
    /// Names of the enabled tools, for the agent's environment.
    pub fn enabled_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.web_search {
            names.push("web_search");
        }
        if self.code_exec {
            names.push("code_exec");
        }
        if self.scheduler {
            names.push("scheduler");
        }
        names
    }
}

/// One tenant's stored configuration, as returned by the store.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub tenant_id: Uuid,
    /// Provider name as stored; normalized through the alias table at launch.
    pub provider: String,
    pub model: String,
    /// Tenant-owned provider key (possibly an `enc:v1:` envelope).
    pub api_key: Option<String>,
    pub channels: ChannelSettings,
    pub tools: ToolToggles,
    /// Platform-credential billing mode: substitute the platform's own key
    /// and meter usage against the tenant's credit balance.
    pub use_platform_credential: bool,
    pub tier: Tier,
    /// Pinned agent port, or the shared default sentinel when unassigned.
    pub agent_port: u16,
}

/// Partial update written back to the configuration store.
#[derive(Debug, Clone, Default)]
pub struct TenantConfigPatch {
    /// Persist a derived agent port so it is stable across restarts.
    pub agent_port: Option<u16>,
}

/// The relational configuration/subscription store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, tenant_id: Uuid) -> Result<TenantConfig, StoreError>;

    async fn update(&self, tenant_id: Uuid, patch: TenantConfigPatch) -> Result<(), StoreError>;

    async fn set_status(&self, tenant_id: Uuid, status: TenantStatus) -> Result<(), StoreError>;
}

/// The credit ledger debited for metered usage.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Debit `amount` from the tenant's balance, returning the new balance.
    /// Fails with [`LedgerError::InsufficientCredits`] rather than going
    /// negative.
    async fn debit(&self, tenant_id: Uuid, amount: Decimal, memo: &str)
        -> Result<Decimal, LedgerError>;
}

/// One model's per-token rates as published by the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogModel {
    pub id: String,
    pub prompt_rate: Decimal,
    pub completion_rate: Decimal,
}

/// The external model pricing catalog. May be unreachable; callers must
/// tolerate failure.
#[async_trait]
pub trait PricingCatalog: Send + Sync {
    async fn list_models(&self) -> Result<Vec<CatalogModel>, CatalogError>;
}
