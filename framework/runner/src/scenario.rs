use std::sync::Arc;
use std::time::Duration;

use surge_summary_model::ScenarioSummary;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::context::UserValuesConstraint;
use crate::iteration::ScenarioShared;
use crate::pool::VuPool;
use crate::policy::ExecutorPolicy;
use crate::schedule::ArrivalSchedule;

/// Run one scenario to completion and summarise it.
///
/// Returns once no new iterations may start and every in-flight iteration has finished. A
/// shutdown signal stops new iterations from starting but lets in-flight ones drain.
pub(crate) async fn run_scenario<RV: UserValuesConstraint>(
    shared: Arc<ScenarioShared<RV>>,
    policy: ExecutorPolicy,
) -> ScenarioSummary {
    let pool = VuPool::new(policy.pre_allocated_vus(), policy.max_vus());

    log::info!("Starting scenario [{}]: {policy}", shared.name);

    match ArrivalSchedule::for_policy(&policy) {
        Some(schedule) => run_arrivals(&shared, &pool, schedule).await,
        None => run_looping_vus(&shared, &pool, policy.duration()).await,
    }

    let summary = shared.summary(&policy, &pool);
    log::info!(
        "Scenario [{}] finished: {} iterations started, {} failed, {} dropped",
        summary.name,
        summary.iterations_started,
        summary.iterations_failed,
        summary.dropped_iterations
    );

    summary
}

/// Open model. Each arrival leases a VU and launches an iteration without waiting for it.
async fn run_arrivals<RV: UserValuesConstraint>(
    shared: &Arc<ScenarioShared<RV>>,
    pool: &Arc<VuPool>,
    schedule: ArrivalSchedule,
) {
    let mut shutdown_listener = shared.runner_context().new_shutdown_listener();
    let start = Instant::now();
    let mut in_flight = JoinSet::new();

    for offset in schedule {
        tokio::select! {
            biased;

            reason = shutdown_listener.wait_for_shutdown() => {
                log::debug!("Scenario [{}] stopped starting iterations: {reason}", shared.name);
                break;
            }
            _ = tokio::time::sleep_until(start + offset) => {}
        }

        while let Some(result) = in_flight.try_join_next() {
            log_join_error(&shared.name, result);
        }

        match pool.try_acquire() {
            Some(mut lease) => {
                let shared = shared.clone();
                in_flight.spawn(async move {
                    shared.run_iteration(&mut lease).await;
                });
            }
            None => shared.record_dropped(),
        }
    }

    log::debug!(
        "Scenario [{}] waiting for {} in-flight iterations",
        shared.name,
        pool.in_use()
    );
    while let Some(result) = in_flight.join_next().await {
        log_join_error(&shared.name, result);
    }
}

/// Closed model. Every VU loops iterations back to back until the duration has elapsed.
async fn run_looping_vus<RV: UserValuesConstraint>(
    shared: &Arc<ScenarioShared<RV>>,
    pool: &Arc<VuPool>,
    duration: Duration,
) {
    let deadline = Instant::now() + duration;
    let mut vus = JoinSet::new();

    while let Some(mut lease) = pool.try_acquire() {
        let shared = shared.clone();
        let shutdown_listener = shared.runner_context().new_shutdown_listener();

        vus.spawn(async move {
            while Instant::now() < deadline && !shutdown_listener.should_shutdown() {
                shared.run_iteration(&mut lease).await;
                tokio::task::yield_now().await;
            }
            log::debug!("Stopping VU {} of scenario [{}]", lease.id(), shared.name);
        });
    }

    while let Some(result) = vus.join_next().await {
        log_join_error(&shared.name, result);
    }
}

fn log_join_error(scenario: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        log::error!("Iteration task for scenario [{scenario}] did not complete: {e}");
    }
}
