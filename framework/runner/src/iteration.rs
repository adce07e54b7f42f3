use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use surge_summary_model::ScenarioSummary;

use crate::context::{IterationContext, RunnerContext, UserValuesConstraint};
use crate::definition::Behaviour;
use crate::pool::{VuLease, VuPool};
use crate::policy::ExecutorPolicy;

/// State shared by every VU of one scenario.
pub(crate) struct ScenarioShared<RV: UserValuesConstraint> {
    pub(crate) name: Arc<str>,
    behaviour: Arc<dyn Behaviour<RV>>,
    runner_context: Arc<RunnerContext<RV>>,
    /// Iterations started across the whole run, shared by every scenario.
    run_iterations: Arc<AtomicU64>,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl<RV: UserValuesConstraint> ScenarioShared<RV> {
    pub(crate) fn new(
        name: Arc<str>,
        behaviour: Arc<dyn Behaviour<RV>>,
        runner_context: Arc<RunnerContext<RV>>,
        run_iterations: Arc<AtomicU64>,
    ) -> Self {
        Self {
            name,
            behaviour,
            runner_context,
            run_iterations,
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    /// Count an arrival that found no free VU.
    pub(crate) fn record_dropped(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        self.runner_context
            .metrics()
            .record_dropped_iteration(&self.name);

        if dropped == 1 {
            log::warn!(
                "Scenario [{}] has no free VU for an arrival, the iteration was dropped. Increase max_vus if this keeps happening",
                self.name
            );
        } else {
            log::trace!("Scenario [{}] dropped iteration {dropped}", self.name);
        }
    }

    /// Run one iteration of the behaviour on the leased VU and record its outcome.
    ///
    /// The outcome, including checks, is recorded before this returns so that the next iteration
    /// on the same VU always starts after it.
    pub(crate) async fn run_iteration(&self, lease: &mut VuLease) {
        let vu_iteration = lease.next_iteration();
        let scenario_iteration = self.started.fetch_add(1, Ordering::Relaxed);
        let run_iteration = self.run_iterations.fetch_add(1, Ordering::Relaxed);

        let ctx = IterationContext::new(
            self.runner_context.clone(),
            self.name.clone(),
            lease.id(),
            vu_iteration,
            scenario_iteration,
            run_iteration,
        );
        let checks = ctx.checks_handle();

        let start = tokio::time::Instant::now();
        let failed = match AssertUnwindSafe(self.behaviour.call(ctx)).catch_unwind().await {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                log::trace!(
                    "Iteration {scenario_iteration} of scenario [{}] failed on VU {}: {e:?}",
                    self.name,
                    lease.id()
                );
                true
            }
            Err(_) => {
                log::trace!(
                    "Iteration {scenario_iteration} of scenario [{}] panicked on VU {}",
                    self.name,
                    lease.id()
                );
                true
            }
        };
        let elapsed = start.elapsed();

        self.completed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let metrics = self.runner_context.metrics();
        metrics.record_iteration(&self.name, elapsed, failed);
        for check in checks.lock().drain(..) {
            metrics.record_check(&self.name, &check.name, check.passed);
        }
    }

    pub(crate) fn summary(&self, policy: &ExecutorPolicy, pool: &VuPool) -> ScenarioSummary {
        ScenarioSummary {
            name: self.name.to_string(),
            executor: policy.kind().to_string(),
            policy: policy.to_string(),
            iterations_started: self.started.load(Ordering::Relaxed),
            iterations_completed: self.completed.load(Ordering::Relaxed),
            iterations_failed: self.failed.load(Ordering::Relaxed),
            dropped_iterations: self.dropped.load(Ordering::Relaxed),
            allocated_vus: pool.allocated(),
            peak_active_vus: pool.peak_in_use(),
        }
    }
}
