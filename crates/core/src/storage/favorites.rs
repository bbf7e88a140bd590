use crate::domain::currency::CurrencyPair;
use crate::storage::{load_or_default, save, KeyValueStore, FAVORITE_PAIRS_KEY};
use crate::time::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

pub const DEFAULT_RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoritePair {
    pub pair: CurrencyPair,
    pub last_used: DateTime<Utc>,
}

/// Pairs the user converts often, most recently used first.
pub struct FavoritePairs {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    pairs: RwLock<Arc<Vec<FavoritePair>>>,
}

impl FavoritePairs {
    pub fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let pairs: Vec<FavoritePair> = load_or_default(store.as_ref(), FAVORITE_PAIRS_KEY);
        Self {
            store,
            clock,
            pairs: RwLock::new(Arc::new(pairs)),
        }
    }

    /// Adds the pair, or refreshes its `last_used` if already present.
    pub fn add(&self, pair: CurrencyPair) -> anyhow::Result<()> {
        let now = self.clock.now();
        let mut guard = self.pairs.write().unwrap_or_else(PoisonError::into_inner);

        let mut next: Vec<FavoritePair> =
            guard.iter().filter(|f| f.pair != pair).cloned().collect();
        next.push(FavoritePair { pair, last_used: now });
        *guard = Arc::new(next);

        save(self.store.as_ref(), FAVORITE_PAIRS_KEY, guard.as_slice())
    }

    pub fn remove(&self, pair: CurrencyPair) -> anyhow::Result<bool> {
        let mut guard = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
        let next: Vec<FavoritePair> = guard.iter().filter(|f| f.pair != pair).cloned().collect();
        let removed = next.len() != guard.len();
        if removed {
            *guard = Arc::new(next);
            save(self.store.as_ref(), FAVORITE_PAIRS_KEY, guard.as_slice())?;
        }
        Ok(removed)
    }

    pub fn recent(&self, limit: usize) -> Vec<FavoritePair> {
        let snapshot = self.pairs.read().unwrap_or_else(PoisonError::into_inner).clone();
        let mut out: Vec<FavoritePair> = (*snapshot).clone();
        out.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        out.truncate(limit);
        out
    }
}
