use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    pub date: NaiveDate,
    pub rate: f64,
}

impl RatePoint {
    pub fn new(date: NaiveDate, rate: f64) -> Self {
        Self { date, rate }
    }
}

/// Chronologically ascending series with at most one point per date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<RatePoint>", into = "Vec<RatePoint>")]
pub struct RateHistory(Vec<RatePoint>);

impl RateHistory {
    /// Sorts by date; when a date repeats the later point in the input wins.
    pub fn new(mut points: Vec<RatePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        let mut out: Vec<RatePoint> = Vec::with_capacity(points.len());
        for p in points {
            match out.last_mut() {
                Some(last) if last.date == p.date => *last = p,
                _ => out.push(p),
            }
        }
        Self(out)
    }

    pub fn points(&self) -> &[RatePoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<RatePoint>> for RateHistory {
    fn from(points: Vec<RatePoint>) -> Self {
        Self::new(points)
    }
}

impl From<RateHistory> for Vec<RatePoint> {
    fn from(history: RateHistory) -> Self {
        history.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Summary of a history. Always recomputed wholesale from its source series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateAnalysis {
    pub highest: RatePoint,
    pub lowest: RatePoint,
    pub average: f64,
    pub percentage_change: f64,
    pub trend: Trend,
}
