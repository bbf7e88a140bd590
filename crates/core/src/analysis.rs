use crate::domain::rates::{RateAnalysis, RatePoint, Trend};
use thiserror::Error;

/// Percentage change beyond which a series counts as trending.
pub const TREND_THRESHOLD_PCT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("no rates to analyze")]
    EmptyHistory,

    #[error("rate on {date} is not a positive number: {rate}")]
    InvalidRate { date: chrono::NaiveDate, rate: f64 },
}

pub fn classify_trend(percentage_change: f64) -> Trend {
    if percentage_change > TREND_THRESHOLD_PCT {
        Trend::Up
    } else if percentage_change < -TREND_THRESHOLD_PCT {
        Trend::Down
    } else {
        Trend::Stable
    }
}

/// Summarizes a series. Input order does not matter; points are sorted by date first.
pub fn analyze(points: &[RatePoint]) -> Result<RateAnalysis, AnalysisError> {
    if let Some(bad) = points.iter().find(|p| !(p.rate.is_finite() && p.rate > 0.0)) {
        return Err(AnalysisError::InvalidRate {
            date: bad.date,
            rate: bad.rate,
        });
    }

    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.date);

    let (first, last) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => return Err(AnalysisError::EmptyHistory),
    };

    // Strict comparisons keep the earliest point on ties.
    let highest = sorted
        .iter()
        .fold(first, |max, p| if p.rate > max.rate { *p } else { max });
    let lowest = sorted
        .iter()
        .fold(first, |min, p| if p.rate < min.rate { *p } else { min });

    let average = sorted.iter().map(|p| p.rate).sum::<f64>() / sorted.len() as f64;
    let percentage_change = (last.rate - first.rate) / first.rate * 100.0;

    Ok(RateAnalysis {
        highest,
        lowest,
        average,
        percentage_change,
        trend: classify_trend(percentage_change),
    })
}
