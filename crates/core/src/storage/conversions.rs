use crate::domain::conversion::ConversionRecord;
use crate::storage::{load_or_default, save, KeyValueStore, CONVERSION_HISTORY_KEY};
use std::sync::{Arc, PoisonError, RwLock};

pub const DEFAULT_HISTORY_CAP: usize = 10;

/// Newest-first list of recent conversions, capped and persisted.
///
/// Every mutation swaps in a new list; readers holding an older snapshot keep
/// seeing a consistent value.
pub struct ConversionHistory {
    store: Arc<dyn KeyValueStore>,
    cap: usize,
    records: RwLock<Arc<Vec<ConversionRecord>>>,
}

impl ConversionHistory {
    pub fn load(store: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        let cap = cap.max(1);
        let mut records: Vec<ConversionRecord> =
            load_or_default(store.as_ref(), CONVERSION_HISTORY_KEY);
        records.truncate(cap);

        Self {
            store,
            cap,
            records: RwLock::new(Arc::new(records)),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<ConversionRecord>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Prepends `record`, evicting the oldest beyond the cap. The in-memory list
    /// is updated even when persisting fails.
    pub fn push(&self, record: ConversionRecord) -> anyhow::Result<()> {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);

        let mut next = Vec::with_capacity(self.cap);
        next.push(record);
        next.extend(guard.iter().take(self.cap - 1).cloned());
        *guard = Arc::new(next);

        save(self.store.as_ref(), CONVERSION_HISTORY_KEY, guard.as_slice())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let mut guard = self.records.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(Vec::new());
        save(self.store.as_ref(), CONVERSION_HISTORY_KEY, guard.as_slice())
    }
}
