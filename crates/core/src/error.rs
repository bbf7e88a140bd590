use crate::domain::currency::Currency;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Failures of the outbound HTTP layer (rates, news, forex).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("{0} is not configured")]
    Configuration(&'static str),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("credentials rejected by provider")]
    Auth,

    #[error("network error: {0}")]
    Network(String),

    #[error("rate for {0} missing from provider response")]
    MissingRate(Currency),

    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimit,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth,
            _ => Self::Network(format!("HTTP {status}: {}", truncate(body, 200))),
        }
    }

    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Single message shown to the user; details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(what) => format!("{what} is not configured."),
            Self::RateLimit => "Too many requests. Please wait a moment and try again.".to_string(),
            Self::Timeout(_) => "The request timed out. Please try again.".to_string(),
            Self::Auth => "The API key was rejected by the provider.".to_string(),
            Self::Network(_) | Self::MissingRate(_) | Self::Malformed(_) => {
                "Failed to fetch data from the provider. Please try again.".to_string()
            }
        }
    }
}

/// Rejected user input. Never causes a network call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Please enter an amount")]
    EmptyAmount,

    #[error("Please enter a valid amount")]
    NotANumber(String),

    #[error("Amount must be greater than zero")]
    NotPositive,

    #[error("Amount must not exceed 999,999,999.99")]
    TooLarge,

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
