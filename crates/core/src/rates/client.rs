use crate::domain::currency::{Currency, CurrencyPair};
use crate::domain::rates::RateHistory;
use crate::error::FetchError;
use crate::rates::cache::RateCache;
use crate::rates::provider::{RateProvider, RateTable};
use crate::rates::synthetic::{Granularity, HistorySource, SyntheticHistory};
use crate::time::Clock;
use std::sync::Arc;
use std::time::Duration;

/// What the orchestrator and alarm manager need from the rate layer.
#[async_trait::async_trait]
pub trait RateService: Send + Sync {
    async fn latest_rate(&self, pair: CurrencyPair) -> Result<f64, FetchError>;

    /// Daily history.
    async fn rate_history(&self, pair: CurrencyPair) -> Result<RateHistory, FetchError>;
}

/// Cached front for a [`RateProvider`] plus one [`HistorySource`] per granularity.
///
/// Latest rates are cached per base currency (the whole table) and shared by
/// every history granularity; histories are cached per pair and granularity.
pub struct RateClient {
    provider: Arc<dyn RateProvider>,
    daily: Arc<dyn HistorySource>,
    monthly: Arc<dyn HistorySource>,
    clock: Arc<dyn Clock>,
    tables: RateCache<Currency, Arc<RateTable>>,
    histories: RateCache<(CurrencyPair, Granularity), RateHistory>,
}

impl RateClient {
    /// Uses synthetic daily and monthly histories.
    pub fn new(provider: Arc<dyn RateProvider>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            provider,
            daily: Arc::new(SyntheticHistory::daily()),
            monthly: Arc::new(SyntheticHistory::monthly()),
            tables: RateCache::new(ttl, clock.clone()),
            histories: RateCache::new(ttl, clock.clone()),
            clock,
        }
    }

    pub fn with_history_source(
        mut self,
        granularity: Granularity,
        source: Arc<dyn HistorySource>,
    ) -> Self {
        match granularity {
            Granularity::Daily => self.daily = source,
            Granularity::Monthly => self.monthly = source,
        }
        self
    }

    async fn table(&self, base: Currency) -> Result<Arc<RateTable>, FetchError> {
        if let Some(table) = self.tables.get(&base) {
            return Ok(table);
        }

        let table = match self.provider.latest_rates(base).await {
            Ok(table) => Arc::new(table),
            Err(err) => {
                tracing::warn!(
                    %base,
                    provider = self.provider.provider_name(),
                    error = %err,
                    "latest rates fetch failed"
                );
                return Err(err);
            }
        };
        self.tables.put(base, table.clone());
        Ok(table)
    }

    pub async fn history(
        &self,
        pair: CurrencyPair,
        granularity: Granularity,
    ) -> Result<RateHistory, FetchError> {
        let key = (pair, granularity);
        if let Some(history) = self.histories.get(&key) {
            return Ok(history);
        }

        let source = match granularity {
            Granularity::Daily => &self.daily,
            Granularity::Monthly => &self.monthly,
        };
        let anchor = self.latest_rate(pair).await?;
        let today = self.clock.now().date_naive();
        let history = source.history(pair, anchor, today).await?;

        tracing::debug!(
            %pair,
            ?granularity,
            source = source.source_name(),
            points = history.len(),
            "rate history refreshed"
        );
        self.histories.put(key, history.clone());
        Ok(history)
    }
}

#[async_trait::async_trait]
impl RateService for RateClient {
    async fn latest_rate(&self, pair: CurrencyPair) -> Result<f64, FetchError> {
        let table = self.table(pair.from).await?;
        table.rate(pair.to).ok_or(FetchError::MissingRate(pair.to))
    }

    async fn rate_history(&self, pair: CurrencyPair) -> Result<RateHistory, FetchError> {
        self.history(pair, Granularity::Daily).await
    }
}
