use crate::analysis::analyze;
use crate::domain::conversion::ConversionRecord;
use crate::domain::currency::CurrencyPair;
use crate::domain::rates::{RateAnalysis, RateHistory};
use crate::error::{FetchError, ValidationError};
use crate::format::{round_to, AMOUNT_DECIMALS, RATE_DECIMALS};
use crate::rates::RateService;
use crate::storage::conversions::ConversionHistory;
use crate::time::Clock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

pub const MAX_AMOUNT: f64 = 999_999_999.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Validating,
    Fetching,
    Analyzing,
    Done,
    Error,
}

/// Raw form input; `amount` is kept as typed.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionRequest {
    pub amount: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionOutcome {
    pub record: ConversionRecord,
    pub display_result: f64,
    pub display_rate: f64,
    pub history: Option<RateHistory>,
    pub analysis: Option<RateAnalysis>,
    /// Set when the rate was fetched but the history panel could not be filled.
    pub analysis_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ConvertError {
    pub fn user_message(&self) -> String {
        match self {
            ConvertError::Validation(err) => err.to_string(),
            ConvertError::Fetch(err) => err.user_message(),
        }
    }
}

pub fn validate_amount(raw: &str) -> Result<f64, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyAmount);
    }

    let amount = trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::NotANumber(trimmed.to_string()))?;

    if amount <= 0.0 {
        return Err(ValidationError::NotPositive);
    }
    if amount > MAX_AMOUNT {
        return Err(ValidationError::TooLarge);
    }
    Ok(amount)
}

pub fn validate(req: &ConversionRequest) -> Result<(CurrencyPair, f64), ValidationError> {
    let amount = validate_amount(&req.amount)?;
    let pair = CurrencyPair::parse(&req.from, &req.to)?;
    Ok((pair, amount))
}

#[derive(Debug)]
struct SessionView {
    phase: Phase,
    latest: Option<Arc<ConversionOutcome>>,
    error: Option<String>,
}

/// Drives one conversion: validate, fetch the rate, record it, then analyze history.
///
/// Requests may overlap; only the most recently started one updates the
/// published phase, result and error.
pub struct ConversionOrchestrator {
    rates: Arc<dyn RateService>,
    history: Arc<ConversionHistory>,
    clock: Arc<dyn Clock>,
    view: RwLock<SessionView>,
    started: AtomicU64,
}

impl ConversionOrchestrator {
    pub fn new(
        rates: Arc<dyn RateService>,
        history: Arc<ConversionHistory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            rates,
            history,
            clock,
            view: RwLock::new(SessionView {
                phase: Phase::Idle,
                latest: None,
                error: None,
            }),
            started: AtomicU64::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        self.view.read().unwrap_or_else(PoisonError::into_inner).phase
    }

    pub fn latest(&self) -> Option<Arc<ConversionOutcome>> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .error
            .clone()
    }

    pub fn history(&self) -> Arc<Vec<ConversionRecord>> {
        self.history.snapshot()
    }

    pub fn swap(pair: CurrencyPair) -> CurrencyPair {
        pair.reversed()
    }

    pub async fn convert(&self, req: ConversionRequest) -> Result<ConversionOutcome, ConvertError> {
        let seq = self.started.fetch_add(1, Ordering::SeqCst) + 1;

        self.set_phase(seq, Phase::Validating);
        let (pair, amount) = match validate(&req) {
            Ok(valid) => valid,
            Err(err) => {
                tracing::debug!(
                    amount = %req.amount,
                    from = %req.from,
                    to = %req.to,
                    error = %err,
                    "conversion input rejected"
                );
                let err = ConvertError::from(err);
                self.fail(seq, &err);
                return Err(err);
            }
        };

        self.set_phase(seq, Phase::Fetching);
        let rate = match self.rates.latest_rate(pair).await {
            Ok(rate) => rate,
            Err(err) => {
                tracing::warn!(%pair, error = %err, "conversion rate fetch failed");
                let err = ConvertError::from(err);
                self.fail(seq, &err);
                return Err(err);
            }
        };

        let record = ConversionRecord {
            from: pair.from,
            to: pair.to,
            amount,
            result: amount * rate,
            rate,
            timestamp: self.clock.now(),
        };
        if let Err(err) = self.history.push(record.clone()) {
            tracing::warn!(error = %err, "failed to persist conversion history");
        }

        self.set_phase(seq, Phase::Analyzing);
        let (history, analysis, analysis_error) = match self.rates.rate_history(pair).await {
            Ok(history) => match analyze(history.points()) {
                Ok(analysis) => (Some(history), Some(analysis), None),
                Err(err) => (Some(history), None, Some(err.to_string())),
            },
            Err(err) => {
                tracing::warn!(
                    %pair,
                    error = %err,
                    "rate history fetch failed; keeping conversion result"
                );
                (None, None, Some(err.user_message()))
            }
        };

        let outcome = ConversionOutcome {
            display_result: round_to(record.result, AMOUNT_DECIMALS),
            display_rate: round_to(record.rate, RATE_DECIMALS),
            record,
            history,
            analysis,
            analysis_error,
        };

        tracing::info!(
            %pair,
            amount,
            rate,
            result = outcome.display_result,
            trend = ?outcome.analysis.as_ref().map(|a| a.trend),
            "conversion completed"
        );

        self.publish(seq, &outcome);
        Ok(outcome)
    }

    fn is_current(&self, seq: u64) -> bool {
        self.started.load(Ordering::SeqCst) == seq
    }

    fn with_view(&self, seq: u64, f: impl FnOnce(&mut SessionView)) {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so a newer request cannot publish in between.
        if self.is_current(seq) {
            f(&mut view);
        } else {
            tracing::debug!(seq, "superseded conversion; not publishing");
        }
    }

    fn set_phase(&self, seq: u64, phase: Phase) {
        self.with_view(seq, |view| view.phase = phase);
    }

    fn fail(&self, seq: u64, err: &ConvertError) {
        let message = err.user_message();
        self.with_view(seq, |view| {
            view.phase = Phase::Error;
            view.error = Some(message);
        });
    }

    fn publish(&self, seq: u64, outcome: &ConversionOutcome) {
        let outcome = Arc::new(outcome.clone());
        self.with_view(seq, |view| {
            view.phase = Phase::Done;
            view.latest = Some(outcome);
            view.error = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::currency::Currency;
    use crate::domain::rates::{RatePoint, Trend};
    use crate::storage::MemoryStore;
    use crate::time::ManualClock;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct FakeRates {
        rate: Mutex<Result<f64, FetchError>>,
        history: Mutex<Result<RateHistory, FetchError>>,
        rate_calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeRates {
        fn at(rate: f64) -> Self {
            let d = |day| NaiveDate::from_ymd_opt(2026, 7, day).unwrap();
            Self {
                rate: Mutex::new(Ok(rate)),
                history: Mutex::new(Ok(RateHistory::new(vec![
                    RatePoint::new(d(1), rate),
                    RatePoint::new(d(2), rate * 1.02),
                ]))),
                rate_calls: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn calls(&self) -> usize {
            self.rate_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl RateService for FakeRates {
        async fn latest_rate(&self, _pair: CurrencyPair) -> Result<f64, FetchError> {
            let n = self.rate_calls.fetch_add(1, Ordering::SeqCst);
            // The first call waits on the gate when one is installed.
            if let (0, Some(gate)) = (n, &self.gate) {
                gate.notified().await;
            }
            self.rate.lock().unwrap().clone()
        }

        async fn rate_history(&self, _pair: CurrencyPair) -> Result<RateHistory, FetchError> {
            self.history.lock().unwrap().clone()
        }
    }

    fn orchestrator(rates: Arc<FakeRates>, cap: usize) -> ConversionOrchestrator {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 7, 2, 12, 0, 0).unwrap(),
        ));
        let history = Arc::new(ConversionHistory::load(Arc::new(MemoryStore::new()), cap));
        ConversionOrchestrator::new(rates, history, clock)
    }

    fn req(amount: &str, from: &str, to: &str) -> ConversionRequest {
        ConversionRequest {
            amount: amount.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn amount_validation() {
        assert_eq!(validate_amount(""), Err(ValidationError::EmptyAmount));
        assert_eq!(validate_amount("   "), Err(ValidationError::EmptyAmount));
        assert!(matches!(validate_amount("abc"), Err(ValidationError::NotANumber(_))));
        assert!(matches!(validate_amount("NaN"), Err(ValidationError::NotANumber(_))));
        assert!(matches!(validate_amount("inf"), Err(ValidationError::NotANumber(_))));
        assert_eq!(validate_amount("0"), Err(ValidationError::NotPositive));
        assert_eq!(validate_amount("-5"), Err(ValidationError::NotPositive));
        assert_eq!(validate_amount("1000000000"), Err(ValidationError::TooLarge));
        assert_eq!(validate_amount("999999999.99"), Ok(MAX_AMOUNT));
        assert_eq!(validate_amount(" 12.5 "), Ok(12.5));
    }

    #[tokio::test]
    async fn negative_amount_never_reaches_the_network() {
        let rates = Arc::new(FakeRates::at(0.9));
        let orch = orchestrator(rates.clone(), 10);

        let err = orch.convert(req("-5", "USD", "EUR")).await.unwrap_err();
        assert_eq!(err, ConvertError::Validation(ValidationError::NotPositive));
        assert_eq!(rates.calls(), 0);
        assert_eq!(orch.phase(), Phase::Error);
        assert_eq!(orch.last_error().as_deref(), Some("Amount must be greater than zero"));
    }

    #[tokio::test]
    async fn unknown_currency_is_rejected_before_fetching() {
        let rates = Arc::new(FakeRates::at(0.9));
        let orch = orchestrator(rates.clone(), 10);

        let err = orch.convert(req("10", "USD", "XAU")).await.unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Validation(ValidationError::UnsupportedCurrency(_))
        ));
        assert_eq!(rates.calls(), 0);
    }

    #[tokio::test]
    async fn converts_and_records_newest_first() {
        let rates = Arc::new(FakeRates::at(0.9));
        let orch = orchestrator(rates, 10);

        let outcome = orch.convert(req("100", "USD", "EUR")).await.unwrap();
        assert_eq!(outcome.display_result, 90.00);
        assert_eq!(outcome.record.rate, 0.9);
        assert_eq!(outcome.analysis.as_ref().unwrap().trend, Trend::Up);
        assert!(outcome.analysis_error.is_none());

        let history = orch.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, 100.0);
        assert_eq!(orch.phase(), Phase::Done);
        assert_eq!(orch.latest().unwrap().record, outcome.record);
    }

    #[tokio::test]
    async fn eleventh_conversion_evicts_the_oldest() {
        let rates = Arc::new(FakeRates::at(0.9));
        let orch = orchestrator(rates, 10);

        for amount in 1..=11 {
            orch.convert(req(&amount.to_string(), "USD", "EUR")).await.unwrap();
        }
        let history = orch.history();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].amount, 11.0);
        assert_eq!(history[9].amount, 2.0);
        assert!(history.iter().all(|r| r.amount != 1.0));
    }

    #[tokio::test]
    async fn rate_failure_keeps_previous_result_and_history() {
        let rates = Arc::new(FakeRates::at(0.9));
        let orch = orchestrator(rates.clone(), 10);
        let first = orch.convert(req("100", "USD", "EUR")).await.unwrap();

        *rates.rate.lock().unwrap() = Err(FetchError::RateLimit);
        let err = orch.convert(req("50", "USD", "EUR")).await.unwrap_err();
        assert_eq!(err, ConvertError::Fetch(FetchError::RateLimit));

        assert_eq!(orch.phase(), Phase::Error);
        assert_eq!(orch.latest().unwrap().record, first.record);
        assert_eq!(orch.history().len(), 1);
        assert!(orch.last_error().unwrap().contains("Too many requests"));
    }

    #[tokio::test]
    async fn history_failure_still_returns_the_conversion() {
        let rates = Arc::new(FakeRates::at(0.9));
        *rates.history.lock().unwrap() =
            Err(FetchError::Timeout(std::time::Duration::from_secs(5)));
        let orch = orchestrator(rates, 10);

        let outcome = orch.convert(req("10", "USD", "EUR")).await.unwrap();
        assert_eq!(outcome.display_result, 9.0);
        assert!(outcome.analysis.is_none());
        assert!(outcome.analysis_error.unwrap().contains("timed out"));
        assert_eq!(orch.history().len(), 1);
        assert_eq!(orch.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn empty_history_reports_analysis_error() {
        let rates = Arc::new(FakeRates::at(0.9));
        *rates.history.lock().unwrap() = Ok(RateHistory::default());
        let orch = orchestrator(rates, 10);

        let outcome = orch.convert(req("10", "USD", "EUR")).await.unwrap();
        assert_eq!(outcome.analysis_error.as_deref(), Some("no rates to analyze"));
    }

    #[tokio::test]
    async fn slower_older_request_does_not_overwrite_newer_result() {
        let gate = Arc::new(Notify::new());
        let mut fake = FakeRates::at(0.9);
        fake.gate = Some(gate.clone());
        let rates = Arc::new(fake);
        let orch = Arc::new(orchestrator(rates, 10));

        let slow = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.convert(req("1", "USD", "EUR")).await })
        };
        // Let the first request park on the gate.
        while orch.phase() != Phase::Fetching {
            tokio::task::yield_now().await;
        }

        let fast = orch.convert(req("2", "USD", "EUR")).await.unwrap();
        gate.notify_one();
        let slow = slow.await.unwrap().unwrap();

        assert_eq!(slow.record.amount, 1.0);
        assert_eq!(orch.latest().unwrap().record, fast.record);
        assert_eq!(orch.history().len(), 2);
    }

    #[test]
    fn swap_reverses_pair() {
        let pair = CurrencyPair::new(Currency::Usd, Currency::Try);
        assert_eq!(
            ConversionOrchestrator::swap(pair),
            CurrencyPair::new(Currency::Try, Currency::Usd)
        );
    }
}
