//! Time-boxed cache of per-token model rates.
//!
//! The whole cache refreshes atomically from the external catalog; entries
//! are never updated individually. A refresh failure serves the stale
//! cache, and a model missing after refresh gets a fixed conservative
//! fallback so metering over-charges rather than silently under-charges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::CatalogError;
use crate::metering::METERING_TARGET;
use crate::store::{CatalogModel, PricingCatalog};

/// How long a fetched cache stays fresh.
pub const PRICING_TTL: Duration = Duration::from_secs(3600);

/// Per-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelRates {
    pub prompt: Decimal,
    pub completion: Decimal,
}

/// Conservative rates applied when a model is absent from the catalog
/// (roughly frontier-model pricing).
pub fn fallback_rates() -> ModelRates {
    ModelRates {
        prompt: dec!(0.000015),
        completion: dec!(0.000075),
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    rates: HashMap<String, ModelRates>,
    fetched_at: Option<Instant>,
}

/// The cache itself. Cheap to share via `Arc`.
pub struct PricingCache {
    catalog: Arc<dyn PricingCatalog>,
    ttl: Duration,
    inner: Mutex<CacheInner>,
}

impl PricingCache {
    pub fn new(catalog: Arc<dyn PricingCatalog>) -> Self {
        Self::with_ttl(catalog, PRICING_TTL)
    }

    pub fn with_ttl(catalog: Arc<dyn PricingCatalog>, ttl: Duration) -> Self {
        Self {
            catalog,
            ttl,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Rates for one model, refreshing the whole cache first when it is
    /// empty or older than the TTL. Never fails: refresh errors fall back
    /// to the stale cache, and a miss falls back to [`fallback_rates`].
    pub async fn rates(&self, model: &str) -> ModelRates {
        let mut inner = self.inner.lock().await;

        let stale = inner.rates.is_empty()
            || !inner.fetched_at.is_some_and(|at| at.elapsed() <= self.ttl);
        if stale {
            match self.catalog.list_models().await {
                Ok(models) => {
                    inner.rates = models
                        .into_iter()
                        .map(|m| {
                            (
                                m.id,
                                ModelRates {
                                    prompt: m.prompt_rate,
                                    completion: m.completion_rate,
                                },
                            )
                        })
                        .collect();
                    inner.fetched_at = Some(Instant::now());
                    tracing::debug!(
                        target: METERING_TARGET,
                        models = inner.rates.len(),
                        "refreshed pricing cache"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        target: METERING_TARGET,
                        error = %e,
                        "pricing catalog refresh failed; serving stale cache"
                    );
                }
            }
        }

        inner.rates.get(model).copied().unwrap_or_else(|| {
            tracing::debug!(target: METERING_TARGET, model, "model not in catalog; using fallback rates");
            fallback_rates()
        })
    }
}

impl std::fmt::Debug for PricingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingCache").field("ttl", &self.ttl).finish()
    }
}

/// Production catalog client fetching rates over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPricingCatalog {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    data: Vec<CatalogModel>,
}

impl HttpPricingCatalog {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl PricingCatalog for HttpPricingCatalog {
    async fn list_models(&self) -> Result<Vec<CatalogModel>, CatalogError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| CatalogError::Unreachable(e.to_string()))?;

        let body: CatalogResponse = response
            .json()
            .await
            .map_err(|e| CatalogError::Malformed(e.to_string()))?;
        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    struct ScriptedCatalog {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl ScriptedCatalog {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl PricingCatalog for ScriptedCatalog {
        async fn list_models(&self) -> Result<Vec<CatalogModel>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CatalogError::Unreachable("scripted outage".to_string()));
            }
            Ok(vec![CatalogModel {
                id: "claude-sonnet-4-20250514".to_string(),
                prompt_rate: dec!(0.000003),
                completion_rate: dec!(0.000015),
            }])
        }
    }

    #[tokio::test]
    async fn fresh_cache_skips_refetch() {
        let catalog = Arc::new(ScriptedCatalog::new());
        let cache = PricingCache::new(catalog.clone());

        let first = cache.rates("claude-sonnet-4-20250514").await;
        let second = cache.rates("claude-sonnet-4-20250514").await;

        assert_eq!(first.prompt, dec!(0.000003));
        assert_eq!(first, second);
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_ttl_refreshes_whole_cache() {
        let catalog = Arc::new(ScriptedCatalog::new());
        let cache = PricingCache::with_ttl(catalog.clone(), Duration::from_millis(5));

        cache.rates("claude-sonnet-4-20250514").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.rates("claude-sonnet-4-20250514").await;

        assert_eq!(catalog.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn refresh_failure_serves_stale_rates() {
        let catalog = Arc::new(ScriptedCatalog::new());
        let cache = PricingCache::with_ttl(catalog.clone(), Duration::from_millis(5));

        let fresh = cache.rates("claude-sonnet-4-20250514").await;
        catalog.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stale = cache.rates("claude-sonnet-4-20250514").await;
        assert_eq!(fresh, stale);
    }

    #[tokio::test]
    async fn unknown_model_gets_fallback_rates() {
        let catalog = Arc::new(ScriptedCatalog::new());
        let cache = PricingCache::new(catalog);

        let rates = cache.rates("totally-unknown-model").await;
        assert_eq!(rates, fallback_rates());
    }
}
