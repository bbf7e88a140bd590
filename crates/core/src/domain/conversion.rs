use crate::domain::currency::Currency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One successful conversion. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub from: Currency,
    pub to: Currency,
    pub amount: f64,
    pub result: f64,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}
