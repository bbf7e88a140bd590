use crate::domain::currency::CurrencyPair;
use crate::domain::rates::{RateHistory, RatePoint};
use crate::error::FetchError;
use chrono::{Months, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Monthly,
}

/// Source of a pair's rate history.
///
/// `anchor_rate` is the current rate and `today` the last date of the series.
/// A real historical feed may ignore the anchor.
#[async_trait::async_trait]
pub trait HistorySource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn history(
        &self,
        pair: CurrencyPair,
        anchor_rate: f64,
        today: NaiveDate,
    ) -> Result<RateHistory, FetchError>;
}

/// Random-walk stand-in for a historical feed.
///
/// The output is NOT market data: it walks backward from the current rate,
/// multiplying each step by `1 + δ` with `δ` uniform in `[-volatility, volatility]`.
/// Use it only while no real history endpoint is available.
#[derive(Debug, Clone)]
pub struct SyntheticHistory {
    granularity: Granularity,
    points: usize,
    volatility: f64,
    seed: Option<u64>,
}

impl SyntheticHistory {
    pub fn daily() -> Self {
        Self {
            granularity: Granularity::Daily,
            points: 60,
            volatility: 0.02,
            seed: None,
        }
    }

    pub fn monthly() -> Self {
        Self {
            granularity: Granularity::Monthly,
            points: 36,
            volatility: 0.05,
            seed: None,
        }
    }

    /// Deterministic walk, for tests and reproducible demos.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn date_back(&self, today: NaiveDate, steps: usize) -> Option<NaiveDate> {
        match self.granularity {
            Granularity::Daily => today.checked_sub_days(chrono::Days::new(steps as u64)),
            Granularity::Monthly => today.checked_sub_months(Months::new(steps as u32)),
        }
    }

    pub fn generate(&self, anchor_rate: f64, today: NaiveDate) -> RateHistory {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut points = Vec::with_capacity(self.points);
        let mut rate = anchor_rate;
        for step in 0..self.points {
            let Some(date) = self.date_back(today, step) else {
                break;
            };
            points.push(RatePoint::new(date, rate));
            let delta = rng.gen_range(-self.volatility..=self.volatility);
            rate *= 1.0 + delta;
        }

        RateHistory::new(points)
    }
}

#[async_trait::async_trait]
impl HistorySource for SyntheticHistory {
    fn source_name(&self) -> &'static str {
        "synthetic_random_walk"
    }

    async fn history(
        &self,
        pair: CurrencyPair,
        anchor_rate: f64,
        today: NaiveDate,
    ) -> Result<RateHistory, FetchError> {
        tracing::debug!(
            %pair,
            anchor_rate,
            granularity = ?self.granularity,
            points = self.points,
            "synthesizing rate history"
        );
        Ok(self.generate(anchor_rate, today))
    }
}
