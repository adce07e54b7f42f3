mod cli;
mod config;
mod context;
mod definition;
mod executor;
mod init;
mod iteration;
mod monitor;
mod policy;
mod pool;
mod progress;
mod run;
mod scenario;
mod schedule;
mod shutdown;
mod thresholds;
mod types;

pub mod prelude {
    pub use crate::cli::{ReporterOpt, SurgeScenarioCli};
    pub use crate::config::{FileScenario, FileThreshold, ScenarioFile};
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{CheckResult, IterationContext, RunnerContext};
    pub use crate::definition::{Behaviour, HookResult, RunDefinitionBuilder};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::policy::{ExecutorPolicy, PolicyError, Stage};
    pub use crate::run::{run, run_async};
    pub use crate::shutdown::ShutdownSignalError;
    pub use crate::types::SurgeResult;

    pub use surge_core::prelude::{parse_duration, DelegatedShutdownListener, ShutdownReason};
    pub use surge_instruments::{
        MetricsAggregator, CHECKS, DROPPED_ITERATIONS, ITERATIONS, ITERATION_DURATION,
        ITERATION_FAILED,
    };
    pub use surge_summary_model::{MetricSummary, RunStatus, RunSummary, ThresholdStatus};
}
