//! Metric roll-up windows

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Aggregation windows built by the background roll-up task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RollupInterval {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
    SixHours,
    OneDay,
}

impl RollupInterval {
    pub fn all() -> &'static [RollupInterval] {
        &[
            RollupInterval::OneMinute,
            RollupInterval::FiveMinutes,
            RollupInterval::FifteenMinutes,
            RollupInterval::OneHour,
            RollupInterval::SixHours,
            RollupInterval::OneDay,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RollupInterval::OneMinute => "1m",
            RollupInterval::FiveMinutes => "5m",
            RollupInterval::FifteenMinutes => "15m",
            RollupInterval::OneHour => "1h",
            RollupInterval::SixHours => "6h",
            RollupInterval::OneDay => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            RollupInterval::OneMinute => Duration::minutes(1),
            RollupInterval::FiveMinutes => Duration::minutes(5),
            RollupInterval::FifteenMinutes => Duration::minutes(15),
            RollupInterval::OneHour => Duration::hours(1),
            RollupInterval::SixHours => Duration::hours(6),
            RollupInterval::OneDay => Duration::days(1),
        }
    }

    /// How long buckets of this window are retained
    pub fn retention(&self) -> Duration {
        match self {
            // Sub-hourly windows share the hourly retention.
            RollupInterval::OneMinute
            | RollupInterval::FiveMinutes
            | RollupInterval::FifteenMinutes
            | RollupInterval::OneHour => Duration::days(7),
            RollupInterval::SixHours => Duration::days(30),
            RollupInterval::OneDay => Duration::days(365),
        }
    }
}

/// Statistics of one roll-up bucket
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct RollupBucket {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub p95: f64,
    pub sum: f64,
    pub count: u64,
}

/// Builds a bucket from raw values; returns `None` for an empty slice
pub fn compute_bucket(values: &[f64]) -> Option<RollupBucket> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let sum: f64 = sorted.iter().sum();
    let count = sorted.len() as u64;
    Some(RollupBucket {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        avg: sum / count as f64,
        median: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        sum,
        count,
    })
}

/// Nearest-rank percentile over a pre-sorted slice
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil().max(1.0) as usize;
    sorted[rank.min(sorted.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_bucket() {
        let values: Vec<f64> = (1..=100).map(|n| n as f64).collect();
        let bucket = compute_bucket(&values).unwrap();
        assert_eq!(bucket.min, 1.0);
        assert_eq!(bucket.max, 100.0);
        assert_eq!(bucket.count, 100);
        assert_eq!(bucket.avg, 50.5);
        assert_eq!(bucket.median, 50.0);
        assert_eq!(bucket.p95, 95.0);
        assert_eq!(bucket.sum, 5050.0);
    }

    #[test]
    fn test_empty_bucket() {
        assert!(compute_bucket(&[]).is_none());
    }

    #[test]
    fn test_single_value_bucket() {
        let bucket = compute_bucket(&[7.0]).unwrap();
        assert_eq!(bucket.min, 7.0);
        assert_eq!(bucket.p95, 7.0);
        assert_eq!(bucket.median, 7.0);
    }

    #[test]
    fn test_interval_properties() {
        for interval in RollupInterval::all() {
            assert!(interval.duration() > Duration::zero());
            assert!(interval.retention() >= Duration::days(7));
        }
        assert_eq!(RollupInterval::FiveMinutes.as_str(), "5m");
    }
}
