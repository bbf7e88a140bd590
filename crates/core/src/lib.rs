pub mod alarms;
pub mod analysis;
pub mod convert;
pub mod domain;
pub mod error;
pub mod forex;
pub mod format;
pub mod news;
pub mod notify;
pub mod rates;
pub mod session;
pub mod storage;
pub mod time;
mod http;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub exchange_rate_api_key: Option<String>,
        pub exchange_rate_base_url: Option<String>,
        pub gnews_api_key: Option<String>,
        pub gnews_base_url: Option<String>,
        pub alpha_vantage_api_key: Option<String>,
        pub alpha_vantage_base_url: Option<String>,
        pub notify_webhook_url: Option<String>,
        pub state_path: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                exchange_rate_api_key: non_empty_var("EXCHANGE_RATE_API_KEY"),
                exchange_rate_base_url: non_empty_var("EXCHANGE_RATE_BASE_URL"),
                gnews_api_key: non_empty_var("GNEWS_API_KEY"),
                gnews_base_url: non_empty_var("GNEWS_BASE_URL"),
                alpha_vantage_api_key: non_empty_var("ALPHA_VANTAGE_API_KEY"),
                alpha_vantage_base_url: non_empty_var("ALPHA_VANTAGE_BASE_URL"),
                notify_webhook_url: non_empty_var("NOTIFY_WEBHOOK_URL"),
                state_path: non_empty_var("FXDASH_STATE_PATH"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }

        pub fn require_exchange_rate_api_key(&self) -> anyhow::Result<&str> {
            self.exchange_rate_api_key
                .as_deref()
                .context("EXCHANGE_RATE_API_KEY is required")
        }

        pub fn require_gnews_api_key(&self) -> anyhow::Result<&str> {
            self.gnews_api_key
                .as_deref()
                .context("GNEWS_API_KEY is required")
        }
    }

    /// Reads a numeric tuning knob, falling back to `default` when unset or unparsable.
    pub fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
        std::env::var(name)
            .ok()
            .and_then(|s| s.trim().parse::<T>().ok())
            .unwrap_or(default)
    }

    fn non_empty_var(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|s| !s.trim().is_empty())
    }

}
