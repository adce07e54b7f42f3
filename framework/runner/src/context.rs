use std::{fmt::Debug, sync::Arc};

use parking_lot::Mutex;
use surge_core::prelude::{DelegatedShutdownListener, ShutdownHandle, ShutdownReason};
use surge_instruments::{MetricsAggregator, Reporter};

use crate::executor::Executor;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// Run-wide state. Setup gets mutable access before any scenario starts. After that it is shared
/// read-only with every iteration of every scenario.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    reporter: Arc<Reporter>,
    shutdown_handle: ShutdownHandle,
    connection_string: Option<String>,
    run_id: String,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
        shutdown_handle: ShutdownHandle,
        connection_string: Option<String>,
        run_id: String,
    ) -> Self {
        Self {
            executor,
            reporter,
            shutdown_handle,
            connection_string,
            run_id,
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        self.reporter.metrics()
    }

    /// The connection string from the CLI, or the default the run definition provided.
    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }

    /// Stop every scenario. No new iterations start and in-flight iterations are allowed to
    /// finish. The run is reported as aborted.
    pub fn force_stop_run(&self) {
        self.shutdown_handle.shutdown(ShutdownReason::Requested);
    }

    pub fn new_shutdown_listener(&self) -> DelegatedShutdownListener {
        self.shutdown_handle.new_listener()
    }

    pub(crate) fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown_handle
    }
}

/// The named result of a check made during an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

/// Everything a behaviour can see about the iteration it is running.
pub struct IterationContext<RV: UserValuesConstraint> {
    runner_context: Arc<RunnerContext<RV>>,
    scenario: Arc<str>,
    vu_id: usize,
    vu_iteration: u64,
    scenario_iteration: u64,
    run_iteration: u64,
    checks: Arc<Mutex<Vec<CheckResult>>>,
}

impl<RV: UserValuesConstraint> IterationContext<RV> {
    pub(crate) fn new(
        runner_context: Arc<RunnerContext<RV>>,
        scenario: Arc<str>,
        vu_id: usize,
        vu_iteration: u64,
        scenario_iteration: u64,
        run_iteration: u64,
    ) -> Self {
        Self {
            runner_context,
            scenario,
            vu_id,
            vu_iteration,
            scenario_iteration,
            run_iteration,
            checks: Default::default(),
        }
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    /// The value that setup produced.
    pub fn get(&self) -> &RV {
        self.runner_context.get()
    }

    pub fn scenario_name(&self) -> &str {
        &self.scenario
    }

    /// The id of the VU running this iteration, unique within the scenario and starting at 1.
    pub fn vu_id(&self) -> usize {
        self.vu_id
    }

    /// 1-based count of iterations this VU has started, including this one.
    pub fn vu_iteration(&self) -> u64 {
        self.vu_iteration
    }

    /// 0-based sequence number of this iteration within its scenario.
    pub fn scenario_iteration(&self) -> u64 {
        self.scenario_iteration
    }

    /// 0-based sequence number of this iteration across every scenario in the run.
    pub fn run_iteration(&self) -> u64 {
        self.run_iteration
    }

    pub fn executor(&self) -> &Arc<Executor> {
        self.runner_context.executor()
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        self.runner_context.metrics()
    }

    /// Record a named check. Checks never fail the iteration, a failed check is only counted.
    ///
    /// Returns `passed` so the result can be used in conditions.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.checks.lock().push(CheckResult {
            name: name.to_string(),
            passed,
        });
        passed
    }

    /// Record a trend value in milliseconds, tagged with this scenario.
    pub fn record_trend(&self, name: &str, value_ms: f64) {
        self.metrics()
            .record_trend(Some(self.scenario.as_ref()), name, value_ms);
    }

    /// Record a rate sample, tagged with this scenario.
    pub fn record_rate(&self, name: &str, value: bool) {
        self.metrics().record_rate(Some(self.scenario.as_ref()), name, value);
    }

    /// Add to a counter, tagged with this scenario.
    pub fn add_counter(&self, name: &str, value: u64) {
        self.metrics().add_counter(Some(self.scenario.as_ref()), name, value);
    }

    /// A handle to collect the checks after the behaviour has consumed the context.
    pub(crate) fn checks_handle(&self) -> Arc<Mutex<Vec<CheckResult>>> {
        self.checks.clone()
    }
}

impl<RV: UserValuesConstraint> Debug for IterationContext<RV> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationContext")
            .field("scenario", &self.scenario)
            .field("vu_id", &self.vu_id)
            .field("vu_iteration", &self.vu_iteration)
            .field("scenario_iteration", &self.scenario_iteration)
            .field("run_iteration", &self.run_iteration)
            .finish()
    }
}
