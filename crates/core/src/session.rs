use crate::alarms::{
    AlarmLoopHandle, AlarmManager, AlarmPolicy, DuplicatePolicy, TriggerPolicy,
    DEFAULT_CHECK_INTERVAL,
};
use crate::config::{env_or, Settings};
use crate::convert::ConversionOrchestrator;
use crate::forex::ForexClient;
use crate::news::{NewsClient, NewsFavorites};
use crate::notify::NotificationService;
use crate::rates::cache::DEFAULT_TTL;
use crate::rates::{ExchangeRateApi, RateClient, RateProvider, RateService};
use crate::storage::conversions::{ConversionHistory, DEFAULT_HISTORY_CAP};
use crate::storage::favorites::FavoritePairs;
use crate::storage::{FileStore, KeyValueStore, DEFAULT_STATE_PATH};
use crate::time::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Tuning knobs read from the environment.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub cache_ttl: Duration,
    pub history_cap: usize,
    pub check_interval: Duration,
    pub alarm_policy: AlarmPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            history_cap: DEFAULT_HISTORY_CAP,
            check_interval: DEFAULT_CHECK_INTERVAL,
            alarm_policy: AlarmPolicy::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let allow_duplicates: bool = env_or("ALARM_ALLOW_DUPLICATES", false);
        let keep_active: bool = env_or("ALARM_KEEP_ACTIVE", false);

        Self {
            cache_ttl: Duration::from_secs(env_or(
                "RATE_CACHE_TTL_SECS",
                defaults.cache_ttl.as_secs(),
            )),
            history_cap: env_or("HISTORY_CAP", defaults.history_cap),
            check_interval: Duration::from_secs(
                env_or("ALARM_CHECK_INTERVAL_SECS", defaults.check_interval.as_secs()).max(1),
            ),
            alarm_policy: AlarmPolicy {
                duplicates: if allow_duplicates {
                    DuplicatePolicy::Allow
                } else {
                    DuplicatePolicy::Reject
                },
                on_trigger: if keep_active {
                    TriggerPolicy::KeepActive
                } else {
                    TriggerPolicy::Deactivate
                },
            },
        }
    }
}

/// Everything one dashboard user works with, wired once at startup.
pub struct Session {
    pub rates: Arc<RateClient>,
    pub converter: Arc<ConversionOrchestrator>,
    pub conversions: Arc<ConversionHistory>,
    pub favorite_pairs: Arc<FavoritePairs>,
    pub alarms: Arc<AlarmManager>,
    pub notifications: Arc<NotificationService>,
    pub news: NewsClient,
    pub favorite_news: Arc<NewsFavorites>,
    pub forex: ForexClient,
    options: SessionOptions,
}

impl Session {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let path = settings.state_path.as_deref().unwrap_or(DEFAULT_STATE_PATH);
        let store = FileStore::open(path);
        tracing::info!(path = %store.path().display(), "state store opened");

        let provider = ExchangeRateApi::from_settings(settings)?;
        Self::build(
            settings,
            Arc::new(provider),
            Arc::new(store),
            Arc::new(SystemClock),
            SessionOptions::from_env(),
        )
    }

    pub fn build(
        settings: &Settings,
        provider: Arc<dyn RateProvider>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        options: SessionOptions,
    ) -> anyhow::Result<Self> {
        let rates = Arc::new(RateClient::new(provider, clock.clone(), options.cache_ttl));

        let conversions = Arc::new(ConversionHistory::load(store.clone(), options.history_cap));
        let converter = Arc::new(ConversionOrchestrator::new(
            rates.clone() as Arc<dyn RateService>,
            conversions.clone(),
            clock.clone(),
        ));

        let notifications = Arc::new(NotificationService::from_settings(settings)?);
        let alarms = Arc::new(AlarmManager::new(
            rates.clone() as Arc<dyn RateService>,
            notifications.clone(),
            clock.clone(),
            options.alarm_policy,
        ));

        Ok(Self {
            favorite_pairs: Arc::new(FavoritePairs::load(store.clone(), clock)),
            favorite_news: Arc::new(NewsFavorites::load(store)),
            news: NewsClient::from_settings(settings)?,
            forex: ForexClient::from_settings(settings)?,
            rates,
            converter,
            conversions,
            alarms,
            notifications,
            options,
        })
    }

    /// Resolves notification permission, then starts the periodic alarm check.
    pub async fn start_alarm_loop(&self) -> AlarmLoopHandle {
        self.notifications.init().await;
        self.alarms.spawn_check_loop(self.options.check_interval)
    }
}
