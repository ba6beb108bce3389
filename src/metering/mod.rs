//! Usage metering for platform-credential billing.
//!
//! The agent runtime emits single-line usage markers on stdout:
//!
//! ```text
//! [USAGE]{"model":"claude-sonnet-4-20250514","prompt_tokens":1000,"completion_tokens":500}
//! ```
//!
//! The meter parses those lines, converts token counts to cost via the
//! pricing cache, and debits the tenant's credit ledger. Metering is
//! best-effort telemetry by policy: malformed lines are skipped, and
//! pricing or ledger failures are logged on the `apiary::metering` target
//! without ever propagating into the supervision pipeline.

pub mod pricing;

pub use pricing::{HttpPricingCatalog, ModelRates, PricingCache};

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::store::{CreditLedger, Tier};

/// Log target for the non-propagating metering error channel.
pub const METERING_TARGET: &str = "apiary::metering";

/// Marker prefix for usage lines.
pub const USAGE_MARKER: &str = "[USAGE]";

/// One parsed usage marker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UsageEvent {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A tenant's billing posture, captured at launch time.
#[derive(Debug, Clone, Copy)]
pub struct BillingProfile {
    /// Whether the runtime uses the platform's provider credential.
    pub platform_credential: bool,
    pub tier: Tier,
}

impl BillingProfile {
    /// Usage is metered only for paid tenants on the platform credential.
    /// Free-tier usage under the platform key is deliberately unmetered
    /// (trial credits funded by the platform).
    pub fn metered(&self) -> bool {
        self.platform_credential && self.tier.is_paid()
    }
}

/// Parse a usage marker line. Anything else, including a marker with
/// missing fields or broken JSON, yields `None`.
pub fn parse_usage_line(line: &str) -> Option<UsageEvent> {
    let payload = line.trim().strip_prefix(USAGE_MARKER)?;
    match serde_json::from_str(payload.trim()) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::trace!(target: METERING_TARGET, error = %e, "skipping malformed usage line");
            None
        }
    }
}

/// Converts usage events into ledger debits.
pub struct UsageMeter {
    pricing: Arc<PricingCache>,
    ledger: Arc<dyn CreditLedger>,
}

impl UsageMeter {
    pub fn new(pricing: Arc<PricingCache>, ledger: Arc<dyn CreditLedger>) -> Self {
        Self { pricing, ledger }
    }

    /// Feed one raw stdout line from a tenant's agent process.
    pub async fn record_line(&self, tenant_id: Uuid, profile: BillingProfile, line: &str) {
        if let Some(event) = parse_usage_line(line) {
            self.meter(tenant_id, profile, event).await;
        }
    }

    /// Convert an event to cost and debit the ledger asynchronously.
    pub async fn meter(&self, tenant_id: Uuid, profile: BillingProfile, event: UsageEvent) {
        if !profile.metered() {
            return;
        }

        let rates = self.pricing.rates(&event.model).await;
        let amount = rates.prompt * Decimal::from(event.prompt_tokens)
            + rates.completion * Decimal::from(event.completion_tokens);
        if amount <= Decimal::ZERO {
            return;
        }

        // The debit runs detached so a slow or failing ledger can never
        // stall the stdout pipeline.
        let ledger = Arc::clone(&self.ledger);
        let model = event.model;
        tokio::spawn(async move {
            let memo = format!("usage:{model}");
            match ledger.debit(tenant_id, amount, &memo).await {
                Ok(balance) => {
                    tracing::debug!(
                        target: METERING_TARGET,
                        tenant_id = %tenant_id,
                        %amount,
                        %balance,
                        model,
                        "debited usage"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        target: METERING_TARGET,
                        tenant_id = %tenant_id,
                        %amount,
                        model,
                        error = %e,
                        "usage debit failed"
                    );
                }
            }
        });
    }
}

impl std::fmt::Debug for UsageMeter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageMeter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Mutex;

    use crate::error::{CatalogError, LedgerError};
    use crate::store::{CatalogModel, PricingCatalog};

    use super::*;

    struct RecordingLedger {
        debits: Mutex<Vec<(Uuid, Decimal, String)>>,
    }

    impl RecordingLedger {
        fn new() -> Self {
            Self {
                debits: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CreditLedger for RecordingLedger {
        async fn debit(
            &self,
            tenant_id: Uuid,
            amount: Decimal,
            memo: &str,
        ) -> Result<Decimal, LedgerError> {
            self.debits
                .lock()
                .await
                .push((tenant_id, amount, memo.to_string()));
            Ok(dec!(10) - amount)
        }
    }

    struct FixedCatalog;

    #[async_trait]
    impl PricingCatalog for FixedCatalog {
        async fn list_models(&self) -> Result<Vec<CatalogModel>, CatalogError> {
            Ok(vec![CatalogModel {
                id: "m".to_string(),
                prompt_rate: dec!(0.000002),
                completion_rate: dec!(0.000004),
            }])
        }
    }

    fn meter_with_ledger() -> (UsageMeter, Arc<RecordingLedger>) {
        let ledger = Arc::new(RecordingLedger::new());
        let pricing = Arc::new(PricingCache::new(Arc::new(FixedCatalog)));
        (UsageMeter::new(pricing, ledger.clone()), ledger)
    }

    fn metered_profile() -> BillingProfile {
        BillingProfile {
            platform_credential: true,
            tier: Tier::Paid,
        }
    }

    async fn settle() {
        // Let the detached debit task run.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn parses_a_valid_usage_line() {
        let line = r#"[USAGE]{"model":"m","prompt_tokens":1000,"completion_tokens":500}"#;
        assert_eq!(
            parse_usage_line(line),
            Some(UsageEvent {
                model: "m".to_string(),
                prompt_tokens: 1000,
                completion_tokens: 500,
            })
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_usage_line("plain log output"), None);
        assert_eq!(parse_usage_line("[USAGE]not-json"), None);
        assert_eq!(parse_usage_line(r#"[USAGE]{"model":"m"}"#), None);
        assert_eq!(
            parse_usage_line(r#"[USAGE]{"prompt_tokens":1,"completion_tokens":2}"#),
            None
        );
    }

    #[tokio::test]
    async fn debits_exact_cost_for_metered_tenant() {
        let (meter, ledger) = meter_with_ledger();
        let tenant = Uuid::new_v4();

        meter
            .record_line(
                tenant,
                metered_profile(),
                r#"[USAGE]{"model":"m","prompt_tokens":1000,"completion_tokens":500}"#,
            )
            .await;
        settle().await;

        let debits = ledger.debits.lock().await;
        assert_eq!(debits.len(), 1);
        let (debited_tenant, amount, memo) = &debits[0];
        assert_eq!(*debited_tenant, tenant);
        assert_eq!(*amount, dec!(0.004));
        assert_eq!(memo, "usage:m");
    }

    #[tokio::test]
    async fn free_tier_is_not_metered() {
        let (meter, ledger) = meter_with_ledger();
        let profile = BillingProfile {
            platform_credential: true,
            tier: Tier::Free,
        };

        meter
            .record_line(
                Uuid::new_v4(),
                profile,
                r#"[USAGE]{"model":"m","prompt_tokens":1000,"completion_tokens":500}"#,
            )
            .await;
        settle().await;

        assert!(ledger.debits.lock().await.is_empty());
    }

    #[tokio::test]
    async fn own_key_tenants_are_not_metered() {
        let (meter, ledger) = meter_with_ledger();
        let profile = BillingProfile {
            platform_credential: false,
            tier: Tier::Paid,
        };

        meter
            .record_line(
                Uuid::new_v4(),
                profile,
                r#"[USAGE]{"model":"m","prompt_tokens":1000,"completion_tokens":500}"#,
            )
            .await;
        settle().await;

        assert!(ledger.debits.lock().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_never_reach_the_ledger() {
        let (meter, ledger) = meter_with_ledger();

        for line in ["[USAGE]{", "[USAGE]", "noise", r#"[USAGE]{"model":3}"#] {
            meter
                .record_line(Uuid::new_v4(), metered_profile(), line)
                .await;
        }
        settle().await;

        assert!(ledger.debits.lock().await.is_empty());
    }

    #[tokio::test]
    async fn zero_token_events_are_not_debited() {
        let (meter, ledger) = meter_with_ledger();

        meter
            .record_line(
                Uuid::new_v4(),
                metered_profile(),
                r#"[USAGE]{"model":"m","prompt_tokens":0,"completion_tokens":0}"#,
            )
            .await;
        settle().await;

        assert!(ledger.debits.lock().await.is_empty());
    }
}
