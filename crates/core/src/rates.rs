//! Exchange-rate retrieval: provider transport, TTL cache, synthetic history.

pub mod cache;
pub mod client;
pub mod provider;
pub mod synthetic;

pub use client::{RateClient, RateService};
pub use provider::{ExchangeRateApi, RateProvider, RateTable};
pub use synthetic::{Granularity, HistorySource, SyntheticHistory};
