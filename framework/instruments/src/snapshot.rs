use std::collections::BTreeMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use surge_summary_model::{CheckSummary, MetricSummary};

use crate::metrics::MetricKey;

/// An aggregate that can be read from a metric series, as used in threshold expressions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in the range `0..=100`
    Percentile(f64),
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregate::Count => write!(f, "count"),
            Aggregate::Rate => write!(f, "rate"),
            Aggregate::Avg => write!(f, "avg"),
            Aggregate::Min => write!(f, "min"),
            Aggregate::Max => write!(f, "max"),
            Aggregate::Med => write!(f, "med"),
            Aggregate::Percentile(p) => write!(f, "p({p})"),
        }
    }
}

/// The result of reading an [Aggregate] from a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateValue {
    Value(f64),
    /// The aggregate applies to the series but nothing has been recorded that it can be computed
    /// from.
    NoData,
    /// The aggregate does not apply to this kind of series, such as `p(95)` on a counter.
    Unsupported,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckCounts {
    pub passes: u64,
    pub fails: u64,
}

/// Trend values are stored in microseconds and read back in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSnapshot {
    histogram: Histogram<u64>,
}

impl From<Histogram<u64>> for TrendSnapshot {
    fn from(histogram: Histogram<u64>) -> Self {
        Self { histogram }
    }
}

impl TrendSnapshot {
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    pub fn avg(&self) -> Option<f64> {
        self.non_empty().map(|h| h.mean() / 1000.0)
    }

    pub fn min(&self) -> Option<f64> {
        self.non_empty().map(|h| h.min() as f64 / 1000.0)
    }

    pub fn max(&self) -> Option<f64> {
        self.non_empty().map(|h| h.max() as f64 / 1000.0)
    }

    /// `percentile` is in the range `0..=100`.
    pub fn percentile(&self, percentile: f64) -> Option<f64> {
        self.non_empty()
            .map(|h| h.value_at_quantile((percentile / 100.0).clamp(0.0, 1.0)) as f64 / 1000.0)
    }

    fn non_empty(&self) -> Option<&Histogram<u64>> {
        if self.histogram.is_empty() {
            None
        } else {
            Some(&self.histogram)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeriesSnapshot {
    Counter { count: u64 },
    Rate { passes: u64, total: u64 },
    Trend(TrendSnapshot),
}

impl SeriesSnapshot {
    pub fn as_trend(&self) -> Option<&TrendSnapshot> {
        match self {
            SeriesSnapshot::Trend(trend) => Some(trend),
            _ => None,
        }
    }

    /// Whether any sample was recorded for this series.
    pub fn has_data(&self) -> bool {
        match self {
            SeriesSnapshot::Counter { .. } => true,
            SeriesSnapshot::Rate { total, .. } => *total > 0,
            SeriesSnapshot::Trend(trend) => !trend.is_empty(),
        }
    }

    /// Read an aggregate from this series.
    pub fn aggregate(&self, aggregate: Aggregate, elapsed: Duration) -> AggregateValue {
        let value = match (self, aggregate) {
            (SeriesSnapshot::Counter { count }, Aggregate::Count) => Some(*count as f64),
            (SeriesSnapshot::Counter { count }, Aggregate::Rate) => {
                if elapsed.is_zero() {
                    None
                } else {
                    Some(*count as f64 / elapsed.as_secs_f64())
                }
            }
            (SeriesSnapshot::Rate { passes, total }, Aggregate::Rate) => {
                if *total == 0 {
                    None
                } else {
                    Some(*passes as f64 / *total as f64)
                }
            }
            (SeriesSnapshot::Rate { total, .. }, Aggregate::Count) => Some(*total as f64),
            (SeriesSnapshot::Trend(trend), Aggregate::Count) => Some(trend.count() as f64),
            (SeriesSnapshot::Trend(trend), Aggregate::Avg) => trend.avg(),
            (SeriesSnapshot::Trend(trend), Aggregate::Min) => trend.min(),
            (SeriesSnapshot::Trend(trend), Aggregate::Max) => trend.max(),
            (SeriesSnapshot::Trend(trend), Aggregate::Med) => trend.percentile(50.0),
            (SeriesSnapshot::Trend(trend), Aggregate::Percentile(p)) => trend.percentile(p),
            _ => return AggregateValue::Unsupported,
        };

        match value {
            Some(value) => AggregateValue::Value(value),
            None => AggregateValue::NoData,
        }
    }

    pub fn to_summary(&self, elapsed: Duration) -> MetricSummary {
        match self {
            SeriesSnapshot::Counter { count } => MetricSummary::Counter {
                count: *count,
                rate: if elapsed.is_zero() {
                    0.0
                } else {
                    *count as f64 / elapsed.as_secs_f64()
                },
            },
            SeriesSnapshot::Rate { passes, total } => MetricSummary::Rate {
                passes: *passes,
                total: *total,
                rate: if *total == 0 {
                    0.0
                } else {
                    *passes as f64 / *total as f64
                },
            },
            SeriesSnapshot::Trend(trend) => MetricSummary::Trend {
                count: trend.count(),
                avg: trend.avg().unwrap_or_default(),
                min: trend.min().unwrap_or_default(),
                med: trend.percentile(50.0).unwrap_or_default(),
                max: trend.max().unwrap_or_default(),
                p90: trend.percentile(90.0).unwrap_or_default(),
                p95: trend.percentile(95.0).unwrap_or_default(),
                p99: trend.percentile(99.0).unwrap_or_default(),
            },
        }
    }
}

/// A point in time copy of every series in a [crate::MetricsAggregator].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    elapsed: Duration,
    series: BTreeMap<MetricKey, SeriesSnapshot>,
    checks: BTreeMap<(String, String), CheckCounts>,
}

impl MetricsSnapshot {
    pub(crate) fn new(
        elapsed: Duration,
        series: BTreeMap<MetricKey, SeriesSnapshot>,
        checks: BTreeMap<(String, String), CheckCounts>,
    ) -> Self {
        Self {
            elapsed,
            series,
            checks,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn get(&self, key: &MetricKey) -> Option<&SeriesSnapshot> {
        self.series.get(key)
    }

    pub fn check(&self, scenario: &str, name: &str) -> Option<&CheckCounts> {
        self.checks.get(&(scenario.to_string(), name.to_string()))
    }

    /// Counter value for a key, zero if nothing was recorded.
    pub fn counter(&self, key: &MetricKey) -> u64 {
        match self.series.get(key) {
            Some(SeriesSnapshot::Counter { count }) => *count,
            _ => 0,
        }
    }

    /// Rate series passes and total for a key, zeros if nothing was recorded.
    pub fn rate_counts(&self, key: &MetricKey) -> (u64, u64) {
        match self.series.get(key) {
            Some(SeriesSnapshot::Rate { passes, total }) => (*passes, *total),
            _ => (0, 0),
        }
    }

    pub fn metric_summaries(&self) -> BTreeMap<String, MetricSummary> {
        self.series
            .iter()
            .map(|(key, series)| (key.to_string(), series.to_summary(self.elapsed)))
            .collect()
    }

    pub fn check_summaries(&self) -> Vec<CheckSummary> {
        self.checks
            .iter()
            .map(|((scenario, name), counts)| CheckSummary {
                scenario: scenario.clone(),
                name: name.clone(),
                passes: counts.passes,
                fails: counts.fails,
            })
            .collect()
    }
}
