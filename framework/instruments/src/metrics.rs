use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};

use crate::snapshot::{CheckCounts, MetricsSnapshot, SeriesSnapshot};

/// Number of completed iterations.
pub const ITERATIONS: &str = "iterations";
/// Wall-clock iteration time in milliseconds.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Share of iterations that failed.
pub const ITERATION_FAILED: &str = "iteration_failed";
/// Arrivals that were dropped because no VU was available.
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
/// Share of checks that passed.
pub const CHECKS: &str = "checks";

/// Largest trend value that is tracked exactly, one hour in microseconds. Larger values are
/// clamped.
const TREND_MAX_MICROS: u64 = 3_600_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    /// A monotonically increasing count.
    Counter,
    /// A ratio of `true` samples to all samples.
    Rate,
    /// A distribution of millisecond values.
    Trend,
}

/// Identifies a metric series, optionally narrowed to a single scenario.
///
/// Displayed as `name` or `name{scenario:<scenario>}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub name: String,
    pub scenario: Option<String>,
}

impl MetricKey {
    pub fn global(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scenario: None,
        }
    }

    pub fn scenario(name: &str, scenario: &str) -> Self {
        Self {
            name: name.to_string(),
            scenario: Some(scenario.to_string()),
        }
    }

    /// Parse `name` or `name{scenario:<scenario>}`. `scenario=<scenario>` is also accepted.
    pub fn parse(key: &str) -> Option<Self> {
        let key = key.trim();
        match key.split_once('{') {
            None => {
                if key.is_empty() || key.contains('}') {
                    None
                } else {
                    Some(Self::global(key))
                }
            }
            Some((name, selector)) => {
                let selector = selector.strip_suffix('}')?;
                let (tag, value) = selector.split_once([':', '='])?;
                let name = name.trim();
                let value = value.trim();
                if name.is_empty() || tag.trim() != "scenario" || value.is_empty() {
                    return None;
                }
                Some(Self::scenario(name, value))
            }
        }
    }
}

impl Display for MetricKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.scenario {
            Some(scenario) => write!(f, "{}{{scenario:{}}}", self.name, scenario),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleValue {
    Counter(u64),
    Rate(bool),
    /// Milliseconds
    Trend(f64),
}

impl SampleValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            SampleValue::Counter(_) => MetricKind::Counter,
            SampleValue::Rate(_) => MetricKind::Rate,
            SampleValue::Trend(_) => MetricKind::Trend,
        }
    }
}

/// A single measurement. It is folded into the aggregate when recorded and not kept.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub scenario: Option<String>,
    pub name: String,
    pub value: SampleValue,
    pub timestamp: SystemTime,
}

impl MetricSample {
    pub fn new(scenario: Option<&str>, name: &str, value: SampleValue) -> Self {
        Self {
            scenario: scenario.map(str::to_string),
            name: name.to_string(),
            value,
            timestamp: SystemTime::now(),
        }
    }
}

enum Series {
    Counter(AtomicU64),
    Rate { passes: AtomicU64, total: AtomicU64 },
    Trend(Mutex<Histogram<u64>>),
}

impl Series {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Series::Counter(AtomicU64::new(0)),
            MetricKind::Rate => Series::Rate {
                passes: AtomicU64::new(0),
                total: AtomicU64::new(0),
            },
            MetricKind::Trend => Series::Trend(Mutex::new(new_trend_histogram())),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Series::Counter(_) => MetricKind::Counter,
            Series::Rate { .. } => MetricKind::Rate,
            Series::Trend(_) => MetricKind::Trend,
        }
    }

    fn record(&self, value: SampleValue) {
        match (self, value) {
            (Series::Counter(count), SampleValue::Counter(v)) => {
                count.fetch_add(v, Ordering::Relaxed);
            }
            (Series::Rate { passes, total }, SampleValue::Rate(v)) => {
                if v {
                    passes.fetch_add(1, Ordering::Relaxed);
                }
                total.fetch_add(1, Ordering::Relaxed);
            }
            (Series::Trend(histogram), SampleValue::Trend(ms)) => {
                histogram.lock().saturating_record(ms_to_micros(ms));
            }
            _ => unreachable!("sample kind checked before recording"),
        }
    }

    fn snapshot(&self) -> SeriesSnapshot {
        match self {
            Series::Counter(count) => SeriesSnapshot::Counter {
                count: count.load(Ordering::Relaxed),
            },
            Series::Rate { passes, total } => {
                // Writers bump passes before total, so a concurrent pass may be seen without its
                // total.
                let total = total.load(Ordering::Relaxed);
                let passes = passes.load(Ordering::Relaxed).min(total);
                SeriesSnapshot::Rate { passes, total }
            }
            Series::Trend(histogram) => SeriesSnapshot::Trend(histogram.lock().clone().into()),
        }
    }
}

#[derive(Default)]
struct CheckCounter {
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Accumulates samples from every VU of every scenario in the run.
///
/// Counters and rates are lock-free. Trends take a short lock on their own histogram. Every
/// sample with a scenario is recorded twice, once under the global key and once under the
/// scenario key, so thresholds can target either.
#[derive(Default)]
pub struct MetricsAggregator {
    series: RwLock<HashMap<MetricKey, Arc<Series>>>,
    checks: RwLock<HashMap<(String, String), Arc<CheckCounter>>>,
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("series", &self.series.read().len())
            .field("checks", &self.checks.read().len())
            .finish()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a sample into the aggregate.
    pub fn record(&self, sample: &MetricSample) {
        self.record_value(None, &sample.name, sample.value);
        if let Some(scenario) = &sample.scenario {
            self.record_value(Some(scenario), &sample.name, sample.value);
        }
    }

    pub fn add_counter(&self, scenario: Option<&str>, name: &str, value: u64) {
        self.record(&MetricSample::new(scenario, name, SampleValue::Counter(value)));
    }

    pub fn record_rate(&self, scenario: Option<&str>, name: &str, value: bool) {
        self.record(&MetricSample::new(scenario, name, SampleValue::Rate(value)));
    }

    pub fn record_trend(&self, scenario: Option<&str>, name: &str, value_ms: f64) {
        self.record(&MetricSample::new(scenario, name, SampleValue::Trend(value_ms)));
    }

    /// Record the outcome of one completed iteration.
    pub fn record_iteration(&self, scenario: &str, duration: Duration, failed: bool) {
        self.add_counter(Some(scenario), ITERATIONS, 1);
        self.record_trend(
            Some(scenario),
            ITERATION_DURATION,
            duration.as_secs_f64() * 1000.0,
        );
        self.record_rate(Some(scenario), ITERATION_FAILED, failed);
    }

    pub fn record_dropped_iteration(&self, scenario: &str) {
        self.add_counter(Some(scenario), DROPPED_ITERATIONS, 1);
    }

    /// Record a named check. The result also feeds the `checks` rate.
    pub fn record_check(&self, scenario: &str, name: &str, passed: bool) {
        let counter = self.get_or_create_check(scenario, name);
        if passed {
            counter.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            counter.fails.fetch_add(1, Ordering::Relaxed);
        }

        self.record_rate(Some(scenario), CHECKS, passed);
    }

    /// The kind of a metric, if anything has been recorded for it.
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.series
            .read()
            .get(&MetricKey::global(name))
            .map(|s| s.kind())
    }

    /// Copy the current aggregate. `elapsed` is the run time used to compute counter rates.
    pub fn snapshot(&self, elapsed: Duration) -> MetricsSnapshot {
        let series = self
            .series
            .read()
            .iter()
            .map(|(key, series)| (key.clone(), series.snapshot()))
            .collect::<BTreeMap<_, _>>();

        let checks = self
            .checks
            .read()
            .iter()
            .map(|(key, counter)| {
                (
                    key.clone(),
                    CheckCounts {
                        passes: counter.passes.load(Ordering::Relaxed),
                        fails: counter.fails.load(Ordering::Relaxed),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        MetricsSnapshot::new(elapsed, series, checks)
    }

    fn record_value(&self, scenario: Option<&str>, name: &str, value: SampleValue) {
        let key = MetricKey {
            name: name.to_string(),
            scenario: scenario.map(str::to_string),
        };
        let series = self.get_or_create_series(key, value.kind());

        if series.kind() != value.kind() {
            log::warn!(
                "Dropping {:?} sample for metric [{}] which is a {:?}",
                value.kind(),
                name,
                series.kind()
            );
            return;
        }

        series.record(value);
    }

    fn get_or_create_series(&self, key: MetricKey, kind: MetricKind) -> Arc<Series> {
        if let Some(series) = self.series.read().get(&key) {
            return series.clone();
        }

        self.series
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Series::new(kind)))
            .clone()
    }

    fn get_or_create_check(&self, scenario: &str, name: &str) -> Arc<CheckCounter> {
        let key = (scenario.to_string(), name.to_string());
        if let Some(counter) = self.checks.read().get(&key) {
            return counter.clone();
        }

        self.checks.write().entry(key).or_default().clone()
    }
}

fn new_trend_histogram() -> Histogram<u64> {
    Histogram::new_with_max(TREND_MAX_MICROS, 3).expect("Trend histogram bounds are valid")
}

fn ms_to_micros(ms: f64) -> u64 {
    if ms.is_finite() && ms > 0.0 {
        (ms * 1000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn metric_key_round_trip() {
        let key = MetricKey::parse("dropped_iterations{scenario:create_pr}").unwrap();
        assert_eq!(MetricKey::scenario("dropped_iterations", "create_pr"), key);
        assert_eq!("dropped_iterations{scenario:create_pr}", key.to_string());

        assert_eq!(
            Some(MetricKey::scenario("checks", "get_review")),
            MetricKey::parse("checks{scenario=get_review}")
        );
        assert_eq!(
            Some(MetricKey::global("http_req_failed")),
            MetricKey::parse(" http_req_failed ")
        );
    }

    #[test]
    fn metric_key_rejects_bad_selectors() {
        assert_eq!(None, MetricKey::parse(""));
        assert_eq!(None, MetricKey::parse("checks{vu:1}"));
        assert_eq!(None, MetricKey::parse("checks{scenario:x"));
        assert_eq!(None, MetricKey::parse("{scenario:x}"));
    }

    #[test]
    fn records_globally_and_per_scenario() {
        let metrics = MetricsAggregator::new();
        metrics.record_iteration("a", Duration::from_millis(10), false);
        metrics.record_iteration("b", Duration::from_millis(20), true);

        let snapshot = metrics.snapshot(Duration::from_secs(1));
        assert_eq!(
            Some(&SeriesSnapshot::Counter { count: 2 }),
            snapshot.get(&MetricKey::global(ITERATIONS))
        );
        assert_eq!(
            Some(&SeriesSnapshot::Counter { count: 1 }),
            snapshot.get(&MetricKey::scenario(ITERATIONS, "a"))
        );
        assert_eq!(
            Some(&SeriesSnapshot::Rate {
                passes: 1,
                total: 2
            }),
            snapshot.get(&MetricKey::global(ITERATION_FAILED))
        );
    }

    #[test]
    fn mismatched_kind_is_ignored() {
        let metrics = MetricsAggregator::new();
        metrics.add_counter(None, "requests", 3);
        metrics.record_rate(None, "requests", true);

        let snapshot = metrics.snapshot(Duration::from_secs(1));
        assert_eq!(Some(MetricKind::Counter), metrics.kind_of("requests"));
        assert_eq!(
            Some(&SeriesSnapshot::Counter { count: 3 }),
            snapshot.get(&MetricKey::global("requests"))
        );
    }

    #[test]
    fn checks_are_counted_independently() {
        let metrics = MetricsAggregator::new();
        metrics.record_check("create_pr", "status is 201", true);
        metrics.record_check("create_pr", "status is 201", false);
        metrics.record_check("create_pr", "has reviewers", true);

        let snapshot = metrics.snapshot(Duration::from_secs(1));
        assert_eq!(
            Some(&CheckCounts {
                passes: 1,
                fails: 1
            }),
            snapshot.check("create_pr", "status is 201")
        );
        assert_eq!(
            Some(&SeriesSnapshot::Rate {
                passes: 2,
                total: 3
            }),
            snapshot.get(&MetricKey::global(CHECKS))
        );
    }

    #[test]
    fn rate_snapshot_never_exceeds_total() {
        let metrics = Arc::new(MetricsAggregator::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let metrics = metrics.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                for _ in 0..100_000 {
                    metrics.record_rate(None, "always", true);
                }
                done.store(true, Ordering::Relaxed);
            })
        };

        while !done.load(Ordering::Relaxed) {
            let snapshot = metrics.snapshot(Duration::from_secs(1));
            if let Some(SeriesSnapshot::Rate { passes, total }) =
                snapshot.get(&MetricKey::global("always"))
            {
                assert!(passes <= total, "{passes} > {total}");
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let metrics = Arc::new(MetricsAggregator::new());

        let handles = (0..8)
            .map(|i| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    let scenario = format!("scenario-{}", i % 2);
                    for n in 0..1000u64 {
                        metrics.record_iteration(
                            &scenario,
                            Duration::from_millis(n % 50),
                            n % 10 == 0,
                        );
                        metrics.record_check(&scenario, "ok", n % 4 != 0);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot(Duration::from_secs(1));
        assert_eq!(
            Some(&SeriesSnapshot::Counter { count: 8000 }),
            snapshot.get(&MetricKey::global(ITERATIONS))
        );
        assert_eq!(
            Some(&SeriesSnapshot::Rate {
                passes: 800,
                total: 8000
            }),
            snapshot.get(&MetricKey::global(ITERATION_FAILED))
        );
        assert_eq!(
            Some(8000),
            snapshot
                .get(&MetricKey::global(ITERATION_DURATION))
                .and_then(|s| s.as_trend())
                .map(|t| t.count())
        );
        assert_eq!(
            Some(&CheckCounts {
                passes: 3000,
                fails: 1000
            }),
            snapshot.check("scenario-0", "ok")
        );
    }
}
