mod summary_report;

use std::sync::Arc;

use surge_summary_model::RunSummary;

use crate::metrics::MetricsAggregator;

pub use summary_report::{render_summary, SummaryReportCollector};

/// Receives the final [RunSummary] once the run has finished.
pub trait ReportCollector: Send + Sync {
    fn finalize(&self, summary: &RunSummary);
}

/// Choose which collectors the [Reporter] will hand the run summary to.
#[derive(Debug, Clone, Default)]
pub struct ReportConfig {
    enable_summary: bool,
}

impl ReportConfig {
    /// Print summary tables to stdout at the end of the run.
    pub fn enable_summary(mut self) -> Self {
        self.enable_summary = true;
        self
    }

    pub fn init(self) -> Reporter {
        let mut collectors: Vec<Box<dyn ReportCollector>> = Vec::new();
        if self.enable_summary {
            collectors.push(Box::new(SummaryReportCollector::new()));
        }

        Reporter {
            metrics: Arc::new(MetricsAggregator::new()),
            collectors,
        }
    }
}

/// Owns the run's metrics aggregate and the collectors that report on it.
pub struct Reporter {
    metrics: Arc<MetricsAggregator>,
    collectors: Vec<Box<dyn ReportCollector>>,
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("metrics", &self.metrics)
            .field("collectors", &self.collectors.len())
            .finish()
    }
}

impl Reporter {
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn finalize(&self, summary: &RunSummary) {
        for collector in &self.collectors {
            collector.finalize(summary);
        }
    }
}
