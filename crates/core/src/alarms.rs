use crate::domain::alarm::{AlarmCondition, RateAlarm};
use crate::domain::currency::CurrencyPair;
use crate::format::display_rate;
use crate::notify::NotificationService;
use crate::rates::RateService;
use crate::time::Clock;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// An alarm with the same pair, target and condition is refused.
    #[default]
    Reject,
    Allow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerPolicy {
    /// A fired alarm is switched off so it does not fire on every tick.
    #[default]
    Deactivate,
    KeepActive,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlarmPolicy {
    pub duplicates: DuplicatePolicy,
    pub on_trigger: TriggerPolicy,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AlarmError {
    #[error("Target rate must be a positive number (got {0})")]
    InvalidTarget(f64),

    #[error("An alarm needs two different currencies (got {0})")]
    SameCurrency(CurrencyPair),

    #[error("An alarm for {pair} {} {target_rate} already exists", .condition.as_str())]
    Duplicate {
        pair: CurrencyPair,
        target_rate: f64,
        condition: AlarmCondition,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggeredAlarm {
    pub alarm: RateAlarm,
    pub current_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlarmFailure {
    pub alarm_id: String,
    pub pair: CurrencyPair,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub checked: usize,
    pub triggered: Vec<TriggeredAlarm>,
    pub failures: Vec<AlarmFailure>,
}

/// Threshold alarms over live rates.
///
/// The alarm list is replaced wholesale on every mutation, so a check pass
/// works on a consistent snapshot while the user keeps editing.
pub struct AlarmManager {
    rates: Arc<dyn RateService>,
    notifications: Arc<NotificationService>,
    clock: Arc<dyn Clock>,
    policy: AlarmPolicy,
    alarms: RwLock<Arc<Vec<RateAlarm>>>,
    check_lock: tokio::sync::Mutex<()>,
    last_id: AtomicI64,
}

impl AlarmManager {
    pub fn new(
        rates: Arc<dyn RateService>,
        notifications: Arc<NotificationService>,
        clock: Arc<dyn Clock>,
        policy: AlarmPolicy,
    ) -> Self {
        Self {
            rates,
            notifications,
            clock,
            policy,
            alarms: RwLock::new(Arc::new(Vec::new())),
            check_lock: tokio::sync::Mutex::new(()),
            last_id: AtomicI64::new(0),
        }
    }

    pub fn list(&self) -> Arc<Vec<RateAlarm>> {
        self.alarms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<RateAlarm> {
        self.list().iter().find(|a| a.id == id).cloned()
    }

    pub fn add(
        &self,
        pair: CurrencyPair,
        target_rate: f64,
        condition: AlarmCondition,
    ) -> Result<RateAlarm, AlarmError> {
        if !(target_rate.is_finite() && target_rate > 0.0) {
            return Err(AlarmError::InvalidTarget(target_rate));
        }
        if pair.from == pair.to {
            return Err(AlarmError::SameCurrency(pair));
        }

        let mut guard = self.alarms.write().unwrap_or_else(PoisonError::into_inner);
        if self.policy.duplicates == DuplicatePolicy::Reject
            && guard.iter().any(|a| a.same_rule(pair, target_rate, condition))
        {
            return Err(AlarmError::Duplicate {
                pair,
                target_rate,
                condition,
            });
        }

        let created_at = self.clock.now();
        let alarm = RateAlarm {
            id: self.next_id(created_at.timestamp_millis()).to_string(),
            pair,
            target_rate,
            condition,
            is_active: true,
            created_at,
        };

        let mut next = (**guard).clone();
        next.push(alarm.clone());
        *guard = Arc::new(next);

        tracing::info!(
            alarm_id = %alarm.id,
            %pair,
            target_rate,
            condition = condition.as_str(),
            "alarm added"
        );
        Ok(alarm)
    }

    pub fn delete(&self, id: &str) -> bool {
        let mut guard = self.alarms.write().unwrap_or_else(PoisonError::into_inner);
        let next: Vec<RateAlarm> = guard.iter().filter(|a| a.id != id).cloned().collect();
        let removed = next.len() != guard.len();
        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Flips `is_active`; returns the updated alarm.
    pub fn toggle(&self, id: &str) -> Option<RateAlarm> {
        self.update(id, |a| a.is_active = !a.is_active)
    }

    fn update(&self, id: &str, f: impl Fn(&mut RateAlarm)) -> Option<RateAlarm> {
        let mut guard = self.alarms.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = None;
        let next: Vec<RateAlarm> = guard
            .iter()
            .map(|a| {
                let mut a = a.clone();
                if a.id == id {
                    f(&mut a);
                    updated = Some(a.clone());
                }
                a
            })
            .collect();
        if updated.is_some() {
            *guard = Arc::new(next);
        }
        updated
    }

    /// Current version of an alarm that is still active, switched off first
    /// under [`TriggerPolicy::Deactivate`]. `None` once it was deleted or
    /// toggled off, so a concurrent edit is never undone.
    fn claim_trigger(&self, id: &str) -> Option<RateAlarm> {
        let mut guard = self.alarms.write().unwrap_or_else(PoisonError::into_inner);
        let index = guard.iter().position(|a| a.id == id && a.is_active)?;
        if self.policy.on_trigger == TriggerPolicy::KeepActive {
            return Some(guard[index].clone());
        }
        let mut next = (**guard).clone();
        next[index].is_active = false;
        let fired = next[index].clone();
        *guard = Arc::new(next);
        Some(fired)
    }

    // Millisecond timestamps, bumped when two alarms land in the same millisecond.
    fn next_id(&self, now_ms: i64) -> i64 {
        let mut prev = self.last_id.load(Ordering::SeqCst);
        loop {
            let candidate = now_ms.max(prev + 1);
            match self
                .last_id
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Evaluates every active alarm once. A failing pair is logged and skipped.
    ///
    /// Passes never overlap: a second caller waits for the running pass.
    pub async fn check_all(&self) -> CheckReport {
        let _pass = self.check_lock.lock().await;
        let snapshot = self.list();
        let mut report = CheckReport::default();

        for alarm in snapshot.iter().filter(|a| a.is_active) {
            let current_rate = match self.rates.latest_rate(alarm.pair).await {
                Ok(rate) => rate,
                Err(err) => {
                    tracing::warn!(
                        alarm_id = %alarm.id,
                        pair = %alarm.pair,
                        error = %err,
                        "alarm check failed"
                    );
                    report.failures.push(AlarmFailure {
                        alarm_id: alarm.id.clone(),
                        pair: alarm.pair,
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            report.checked += 1;

            if !alarm.condition.is_met(current_rate, alarm.target_rate) {
                continue;
            }

            tracing::info!(
                alarm_id = %alarm.id,
                pair = %alarm.pair,
                current_rate,
                target_rate = alarm.target_rate,
                condition = alarm.condition.as_str(),
                "alarm triggered"
            );

            let Some(fired) = self.claim_trigger(&alarm.id) else {
                tracing::debug!(alarm_id = %alarm.id, "alarm changed during the pass");
                continue;
            };

            self.notifications
                .notify(
                    format!("Rate alarm: {}", alarm.pair),
                    format!(
                        "{} is {}, {} your target of {}",
                        alarm.pair,
                        display_rate(current_rate),
                        alarm.condition.as_str(),
                        display_rate(alarm.target_rate)
                    ),
                )
                .await;

            report.triggered.push(TriggeredAlarm {
                alarm: fired,
                current_rate,
            });
        }

        report
    }

    /// Runs [`check_all`](Self::check_all) every `period` until the handle is
    /// shut down or dropped. The first check happens one period after start.
    pub fn spawn_check_loop(self: &Arc<Self>, period: Duration) -> AlarmLoopHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(?period, "alarm check loop started");

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let report = manager.check_all().await;
                        tracing::debug!(
                            checked = report.checked,
                            triggered = report.triggered.len(),
                            failures = report.failures.len(),
                            "alarm check pass finished"
                        );
                    }
                }
            }

            tracing::info!("alarm check loop stopped");
        });

        AlarmLoopHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

pub struct AlarmLoopHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AlarmLoopHandle {
    /// Stops the loop, letting an in-flight pass finish first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "alarm check loop ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::currency::Currency;
    use crate::domain::rates::RateHistory;
    use crate::error::FetchError;
    use crate::notify::testing::RecordingNotifier;
    use crate::time::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeRates {
        rates: Mutex<HashMap<CurrencyPair, Result<f64, FetchError>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        hold: AtomicBool,
        release: Notify,
    }

    impl FakeRates {
        fn set(&self, pair: CurrencyPair, rate: Result<f64, FetchError>) {
            self.rates.lock().unwrap().insert(pair, rate);
        }
    }

    #[async_trait::async_trait]
    impl RateService for FakeRates {
        async fn latest_rate(&self, pair: CurrencyPair) -> Result<f64, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.hold.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.rates
                .lock()
                .unwrap()
                .get(&pair)
                .cloned()
                .unwrap_or(Err(FetchError::Network("no rate".to_string())))
        }

        async fn rate_history(&self, _pair: CurrencyPair) -> Result<RateHistory, FetchError> {
            Ok(RateHistory::default())
        }
    }

    fn eur_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::Eur, Currency::Usd)
    }

    fn gbp_usd() -> CurrencyPair {
        CurrencyPair::new(Currency::Gbp, Currency::Usd)
    }

    fn manager(policy: AlarmPolicy) -> (Arc<FakeRates>, Arc<RecordingNotifier>, Arc<AlarmManager>) {
        let rates = Arc::new(FakeRates::default());
        let notifier = Arc::new(RecordingNotifier::granted());
        let notifications = Arc::new(NotificationService::new(notifier.clone(), false));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap(),
        ));
        let manager = Arc::new(AlarmManager::new(rates.clone(), notifications, clock, policy));
        (rates, notifier, manager)
    }

    #[test]
    fn rejects_non_positive_targets() {
        let (_, _, m) = manager(AlarmPolicy::default());
        assert_eq!(
            m.add(eur_usd(), 0.0, AlarmCondition::Above),
            Err(AlarmError::InvalidTarget(0.0))
        );
        assert!(m.add(eur_usd(), -1.0, AlarmCondition::Below).is_err());
        assert!(m.add(eur_usd(), f64::NAN, AlarmCondition::Below).is_err());
        assert!(m.list().is_empty());
    }

    #[test]
    fn rejects_pair_of_one_currency() {
        let (_, _, m) = manager(AlarmPolicy::default());
        let usd_usd = CurrencyPair::new(Currency::Usd, Currency::Usd);
        assert_eq!(
            m.add(usd_usd, 1.0, AlarmCondition::Above),
            Err(AlarmError::SameCurrency(usd_usd))
        );
    }

    #[test]
    fn duplicate_rule_rejected_by_default() {
        let (_, _, m) = manager(AlarmPolicy::default());
        m.add(eur_usd(), 1.10, AlarmCondition::Above).unwrap();
        assert!(matches!(
            m.add(eur_usd(), 1.10, AlarmCondition::Above),
            Err(AlarmError::Duplicate { .. })
        ));
        // Different condition is a different rule.
        m.add(eur_usd(), 1.10, AlarmCondition::Below).unwrap();
        assert_eq!(m.list().len(), 2);
    }

    #[test]
    fn duplicate_rule_allowed_when_configured() {
        let (_, _, m) = manager(AlarmPolicy {
            duplicates: DuplicatePolicy::Allow,
            ..Default::default()
        });
        let a = m.add(eur_usd(), 1.10, AlarmCondition::Above).unwrap();
        let b = m.add(eur_usd(), 1.10, AlarmCondition::Above).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(m.list().len(), 2);
    }

    #[test]
    fn ids_are_time_based_and_unique() {
        let (_, _, m) = manager(AlarmPolicy::default());
        let a = m.add(eur_usd(), 1.1, AlarmCondition::Above).unwrap();
        let b = m.add(eur_usd(), 1.2, AlarmCondition::Above).unwrap();
        let ms = Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap().timestamp_millis();
        assert_eq!(a.id, ms.to_string());
        assert_eq!(b.id, (ms + 1).to_string());
    }

    #[test]
    fn toggle_and_delete() {
        let (_, _, m) = manager(AlarmPolicy::default());
        let a = m.add(eur_usd(), 1.1, AlarmCondition::Above).unwrap();
        let before = m.list();

        assert!(!m.toggle(&a.id).unwrap().is_active);
        assert!(before[0].is_active, "earlier snapshot must not change");
        assert!(m.toggle(&a.id).unwrap().is_active);
        assert!(m.toggle("missing").is_none());

        assert!(m.delete(&a.id));
        assert!(!m.delete(&a.id));
        assert!(m.list().is_empty());
    }

    #[tokio::test]
    async fn above_fires_at_and_over_target_only() {
        let (rates, notifier, m) = manager(AlarmPolicy {
            on_trigger: TriggerPolicy::KeepActive,
            ..Default::default()
        });
        m.add(eur_usd(), 1.10, AlarmCondition::Above).unwrap();

        rates.set(eur_usd(), Ok(1.09));
        assert!(m.check_all().await.triggered.is_empty());

        rates.set(eur_usd(), Ok(1.10));
        assert_eq!(m.check_all().await.triggered.len(), 1);

        rates.set(eur_usd(), Ok(1.11));
        assert_eq!(m.check_all().await.triggered.len(), 1);

        assert_eq!(notifier.sent().len(), 2);
        assert_eq!(notifier.sent()[0].title, "Rate alarm: EUR/USD");
    }

    #[tokio::test]
    async fn triggered_alarm_is_deactivated_by_default() {
        let (rates, notifier, m) = manager(AlarmPolicy::default());
        let alarm = m.add(eur_usd(), 1.10, AlarmCondition::Below).unwrap();
        rates.set(eur_usd(), Ok(1.05));

        let report = m.check_all().await;
        assert_eq!(report.triggered.len(), 1);
        assert!(!report.triggered[0].alarm.is_active);
        assert!(!m.get(&alarm.id).unwrap().is_active);

        let report = m.check_all().await;
        assert_eq!(report.checked, 0);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn keep_active_policy_fires_every_pass() {
        let (rates, notifier, m) = manager(AlarmPolicy {
            on_trigger: TriggerPolicy::KeepActive,
            ..Default::default()
        });
        let alarm = m.add(eur_usd(), 1.10, AlarmCondition::Below).unwrap();
        rates.set(eur_usd(), Ok(1.05));

        m.check_all().await;
        m.check_all().await;
        assert!(m.get(&alarm.id).unwrap().is_active);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn inactive_alarms_are_skipped() {
        let (rates, _, m) = manager(AlarmPolicy::default());
        let alarm = m.add(eur_usd(), 1.10, AlarmCondition::Above).unwrap();
        m.toggle(&alarm.id);
        rates.set(eur_usd(), Ok(2.0));

        let report = m.check_all().await;
        assert_eq!(report.checked, 0);
        assert!(report.triggered.is_empty());
    }

    #[tokio::test]
    async fn one_failing_pair_does_not_stop_the_others() {
        let (rates, notifier, m) = manager(AlarmPolicy::default());
        m.add(gbp_usd(), 1.20, AlarmCondition::Above).unwrap();
        m.add(eur_usd(), 1.10, AlarmCondition::Above).unwrap();
        rates.set(gbp_usd(), Err(FetchError::Timeout(Duration::from_secs(5))));
        rates.set(eur_usd(), Ok(1.15));

        let report = m.check_all().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].pair, gbp_usd());
        assert_eq!(report.triggered.len(), 1);
        assert_eq!(report.triggered[0].alarm.pair, eur_usd());
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn passes_never_overlap() {
        let (rates, _, m) = manager(AlarmPolicy {
            on_trigger: TriggerPolicy::KeepActive,
            ..Default::default()
        });
        m.add(eur_usd(), 5.0, AlarmCondition::Above).unwrap();
        m.add(gbp_usd(), 5.0, AlarmCondition::Above).unwrap();
        rates.set(eur_usd(), Ok(1.0));
        rates.set(gbp_usd(), Ok(1.0));

        tokio::join!(m.check_all(), m.check_all(), m.check_all());
        assert_eq!(rates.max_in_flight.load(Ordering::SeqCst), 1);
    }

    async fn edits_during_a_pass_win(policy: TriggerPolicy) {
        let (rates, notifier, m) = manager(AlarmPolicy {
            on_trigger: policy,
            ..Default::default()
        });
        let deleted = m.add(eur_usd(), 1.10, AlarmCondition::Above).unwrap();
        let switched_off = m.add(gbp_usd(), 1.20, AlarmCondition::Above).unwrap();
        rates.set(eur_usd(), Ok(1.15));
        rates.set(gbp_usd(), Ok(1.25));
        rates.hold.store(true, Ordering::SeqCst);

        let pass = tokio::spawn({
            let m = m.clone();
            async move { m.check_all().await }
        });
        while rates.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(m.delete(&deleted.id));
        assert!(!m.toggle(&switched_off.id).unwrap().is_active);
        rates.hold.store(false, Ordering::SeqCst);
        rates.release.notify_one();

        let report = pass.await.unwrap();
        assert_eq!(report.checked, 2);
        assert!(report.triggered.is_empty());
        assert!(notifier.sent().is_empty());
        assert!(m.get(&deleted.id).is_none());
        assert!(!m.get(&switched_off.id).unwrap().is_active);
    }

    #[tokio::test]
    async fn alarm_edited_mid_pass_stays_quiet_when_kept_active() {
        edits_during_a_pass_win(TriggerPolicy::KeepActive).await;
    }

    #[tokio::test]
    async fn alarm_edited_mid_pass_stays_quiet_when_deactivated() {
        edits_during_a_pass_win(TriggerPolicy::Deactivate).await;
    }

    #[tokio::test(start_paused = true)]
    async fn loop_checks_on_each_period_and_stops_on_shutdown() {
        let (rates, notifier, m) = manager(AlarmPolicy {
            on_trigger: TriggerPolicy::KeepActive,
            ..Default::default()
        });
        m.add(eur_usd(), 1.0, AlarmCondition::Above).unwrap();
        rates.set(eur_usd(), Ok(1.2));

        let handle = m.spawn_check_loop(DEFAULT_CHECK_INTERVAL);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(notifier.sent().is_empty(), "no check before the first period");

        tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
        assert_eq!(notifier.sent().len(), 1);

        handle.shutdown().await;
        tokio::time::sleep(DEFAULT_CHECK_INTERVAL * 3).await;
        assert_eq!(notifier.sent().len(), 1);
    }
}
