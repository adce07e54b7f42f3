mod tables;

use std::fmt::Write;

use surge_summary_model::{MetricSummary, RunStatus, RunSummary, ThresholdStatus};
use tabled::settings::Style;
use tabled::Table;

use crate::report::summary_report::tables::{CheckRow, MetricRow, ScenarioRow, ThresholdRow};
use crate::report::ReportCollector;

/// Prints the run summary as a set of tables when the run finishes.
#[derive(Debug, Default)]
pub struct SummaryReportCollector;

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self
    }
}

impl ReportCollector for SummaryReportCollector {
    fn finalize(&self, summary: &RunSummary) {
        println!("{}", render_summary(summary));
    }
}

/// Render the summary tables that [SummaryReportCollector] prints.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    let started = chrono::DateTime::from_timestamp(summary.started_at, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| summary.started_at.to_string());
    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "\nRun {} [{}] started at {started}, ran for {:.1}s",
        summary.run_name,
        summary.run_id,
        summary.elapsed_ms as f64 / 1000.0
    );

    if !summary.scenarios.is_empty() {
        let rows = summary.scenarios.iter().map(|s| ScenarioRow {
            scenario: s.name.clone(),
            executor: s.policy.clone(),
            started: s.iterations_started,
            completed: s.iterations_completed,
            failed: s.iterations_failed,
            dropped: s.dropped_iterations,
            vus: format!("{}/{}", s.peak_active_vus, s.allocated_vus),
        });
        let _ = writeln!(out, "\nScenarios\n{}", modern(Table::new(rows)));
    }

    if !summary.metrics.is_empty() {
        let rows = summary.metrics.iter().map(|(key, metric)| {
            let (kind, values) = match metric {
                MetricSummary::Counter { count, rate } => {
                    ("counter", format!("count={count} rate={rate:.2}/s"))
                }
                MetricSummary::Rate {
                    passes,
                    total,
                    rate,
                } => (
                    "rate",
                    format!("{:.2}% ({passes} of {total})", rate * 100.0),
                ),
                MetricSummary::Trend {
                    count,
                    avg,
                    min,
                    med,
                    max,
                    p90,
                    p95,
                    p99,
                } => (
                    "trend",
                    format!(
                        "avg={avg:.2}ms min={min:.2}ms med={med:.2}ms max={max:.2}ms p(90)={p90:.2}ms p(95)={p95:.2}ms p(99)={p99:.2}ms count={count}"
                    ),
                ),
            };

            MetricRow {
                metric: key.clone(),
                kind,
                values,
            }
        });
        let _ = writeln!(out, "\nMetrics\n{}", modern(Table::new(rows)));
    }

    if !summary.checks.is_empty() {
        let rows = summary.checks.iter().map(|c| {
            let total = c.passes + c.fails;
            CheckRow {
                scenario: c.scenario.clone(),
                check: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
                pass_rate: if total == 0 {
                    0.0
                } else {
                    c.passes as f64 / total as f64
                },
            }
        });
        let _ = writeln!(out, "\nChecks\n{}", modern(Table::new(rows)));
    }

    if !summary.thresholds.is_empty() {
        let rows = summary.thresholds.iter().map(|t| ThresholdRow {
            metric: t.metric.clone(),
            expression: t.expression.clone(),
            observed: t.observed,
            status: match t.status {
                ThresholdStatus::Passed => "✓ passed".to_string(),
                ThresholdStatus::Failed => "✗ failed".to_string(),
                ThresholdStatus::NoData => "no data".to_string(),
            },
        });
        let _ = writeln!(out, "\nThresholds\n{}", modern(Table::new(rows)));
    }

    if let Some(error) = &summary.teardown_error {
        let _ = writeln!(out, "\nTeardown failed: {error}");
    }

    let status = match &summary.status {
        RunStatus::Passed => "passed".to_string(),
        RunStatus::ThresholdsFailed => "thresholds failed".to_string(),
        RunStatus::Aborted { reason } => format!("aborted ({reason})"),
        RunStatus::SetupFailed { error } => format!("setup failed ({error})"),
    };
    let _ = writeln!(out, "\nResult: {status}");

    out
}

fn modern(mut table: Table) -> Table {
    table.with(Style::modern());
    table
}
