use crate::config::{env_or, Settings};
use crate::domain::currency::CurrencyPair;
use crate::error::FetchError;
use crate::http;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";
const DEFAULT_TIMEOUT_MS: u64 = 8_000;
const SERIES_KEY: &str = "Time Series FX (Daily)";
pub const DEFAULT_BAR_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForexBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

/// Alpha Vantage `FX_DAILY` reader.
#[derive(Debug, Clone)]
pub struct ForexClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl ForexClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let base_url = settings
            .alpha_vantage_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout = Duration::from_millis(env_or("FOREX_TIMEOUT_MS", DEFAULT_TIMEOUT_MS));
        Self::new(base_url, settings.alpha_vantage_api_key.clone(), timeout)
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

    /// The `limit` most recent daily bars, newest first.
    pub async fn daily(
        &self,
        pair: CurrencyPair,
        limit: usize,
    ) -> Result<Vec<ForexBar>, FetchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::Configuration("ALPHA_VANTAGE_API_KEY"))?;

        let query = [
            ("function", "FX_DAILY"),
            ("from_symbol", pair.from.code()),
            ("to_symbol", pair.to.code()),
            ("apikey", api_key),
        ];
        tracing::debug!(%pair, limit, "fetching daily forex bars");

        let url = http::join_url(&self.base_url, "query");
        let raw = http::get_json(self.http.get(url).query(&query), self.timeout).await?;
        parse_daily(raw, limit)
    }
}

#[derive(Debug, Deserialize)]
struct RawBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume", default)]
    volume: Option<String>,
}

fn number(field: &str, raw: &str) -> Result<f64, FetchError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| FetchError::Malformed(format!("{field} is not a number: {raw}")))
}

fn parse_daily(raw: Value, limit: usize) -> Result<Vec<ForexBar>, FetchError> {
    let Some(series) = raw.get(SERIES_KEY) else {
        // Throttling arrives as a 200 with an explanatory note instead of data.
        if let Some(note) = raw.get("Note").or_else(|| raw.get("Information")) {
            tracing::warn!(%note, "forex provider throttled the request");
            return Err(FetchError::RateLimit);
        }
        if let Some(msg) = raw.get("Error Message").and_then(Value::as_str) {
            return Err(FetchError::Malformed(msg.to_string()));
        }
        return Err(FetchError::Malformed(format!("{SERIES_KEY} missing")));
    };

    let series = serde_json::from_value::<BTreeMap<NaiveDate, RawBar>>(series.clone())
        .map_err(|err| FetchError::Malformed(format!("unexpected forex series shape: {err}")))?;

    series
        .into_iter()
        .rev()
        .take(limit)
        .map(|(date, bar)| {
            Ok(ForexBar {
                date,
                open: number("open", &bar.open)?,
                high: number("high", &bar.high)?,
                low: number("low", &bar.low)?,
                close: number("close", &bar.close)?,
                volume: bar.volume.as_deref().map(|v| number("volume", v)).transpose()?,
            })
        })
        .collect()
}
