use crate::domain::currency::CurrencyPair;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmCondition {
    Above,
    Below,
}

impl AlarmCondition {
    /// Both directions are inclusive of the target.
    pub fn is_met(self, current: f64, target: f64) -> bool {
        match self {
            AlarmCondition::Above => current >= target,
            AlarmCondition::Below => current <= target,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlarmCondition::Above => "above",
            AlarmCondition::Below => "below",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateAlarm {
    pub id: String,
    pub pair: CurrencyPair,
    pub target_rate: f64,
    pub condition: AlarmCondition,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl RateAlarm {
    pub fn same_rule(
        &self,
        pair: CurrencyPair,
        target_rate: f64,
        condition: AlarmCondition,
    ) -> bool {
        self.pair == pair && self.target_rate == target_rate && self.condition == condition
    }
}
