mod metrics;
mod report;
mod snapshot;
mod threshold;

pub use metrics::{
    MetricKey, MetricKind, MetricSample, MetricsAggregator, SampleValue, CHECKS,
    DROPPED_ITERATIONS, ITERATIONS, ITERATION_DURATION, ITERATION_FAILED,
};
pub use report::{render_summary, ReportCollector, ReportConfig, Reporter, SummaryReportCollector};
pub use snapshot::{
    Aggregate, AggregateValue, CheckCounts, MetricsSnapshot, SeriesSnapshot, TrendSnapshot,
};
pub use threshold::{
    evaluate_thresholds, first_abort_breach, Comparison, Threshold, ThresholdExpr,
    ThresholdParseError,
};
