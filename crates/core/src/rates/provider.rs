use crate::config::{env_or, Settings};
use crate::domain::currency::Currency;
use crate::error::FetchError;
use crate::http;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://v6.exchangerate-api.com";
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Latest rates quoted against one base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    pub base: Currency,
    pub rates: BTreeMap<Currency, f64>,
}

impl RateTable {
    pub fn rate(&self, to: Currency) -> Option<f64> {
        self.rates.get(&to).copied()
    }
}

/// Transport seam for "latest rates for a base currency".
#[async_trait::async_trait]
pub trait RateProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn latest_rates(&self, base: Currency) -> Result<RateTable, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ExchangeRateApi {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ExchangeRateApi {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .exchange_rate_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout = Duration::from_millis(env_or("RATE_TIMEOUT_MS", DEFAULT_TIMEOUT_MS));

        Self::new(base_url, settings.exchange_rate_api_key.clone(), timeout)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: http::build_client(timeout)?,
            base_url: base_url.into(),
            api_key,
            timeout,
        })
    }
}

#[async_trait::async_trait]
impl RateProvider for ExchangeRateApi {
    fn provider_name(&self) -> &'static str {
        "exchangerate_api"
    }

    async fn latest_rates(&self, base: Currency) -> Result<RateTable, FetchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::Configuration("EXCHANGE_RATE_API_KEY"))?;

        let url = http::join_url(&self.base_url, &format!("v6/{api_key}/latest/{base}"));
        tracing::debug!(%base, provider = self.provider_name(), "fetching latest rates");

        let raw = http::get_json(self.http.get(url), self.timeout).await?;
        parse_latest(base, raw)
    }
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(rename = "error-type", default)]
    error_type: Option<String>,
    #[serde(default)]
    conversion_rates: Option<HashMap<String, f64>>,
}

fn parse_latest(base: Currency, raw: Value) -> Result<RateTable, FetchError> {
    let body = serde_json::from_value::<LatestResponse>(raw)
        .map_err(|err| FetchError::Malformed(format!("unexpected latest-rates shape: {err}")))?;

    if body.result.as_deref() == Some("error") {
        let kind = body.error_type.unwrap_or_default();
        return Err(match kind.as_str() {
            "invalid-key" | "inactive-account" => FetchError::Auth,
            "quota-reached" => FetchError::RateLimit,
            _ => FetchError::Network(format!("provider error: {kind}")),
        });
    }

    let conversion_rates = body
        .conversion_rates
        .ok_or_else(|| FetchError::Malformed("conversion_rates missing".to_string()))?;

    // Codes outside the supported set are dropped.
    let rates = conversion_rates
        .into_iter()
        .filter_map(|(code, rate)| {
            let currency = code.parse::<Currency>().ok()?;
            (rate.is_finite() && rate > 0.0).then_some((currency, rate))
        })
        .collect();

    Ok(RateTable { base, rates })
}
