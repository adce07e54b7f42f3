use std::sync::Arc;
use std::time::Duration;

use surge_core::prelude::{ShutdownHandle, ShutdownReason};
use surge_instruments::{first_abort_breach, MetricsAggregator, Threshold};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Periodically evaluate the thresholds marked `abort_on_fail` and stop the run on the first
/// breach.
///
/// The checker stops when the run is shut down for any reason.
pub(crate) fn start_threshold_checker(
    thresholds: Arc<Vec<Threshold>>,
    metrics: Arc<MetricsAggregator>,
    shutdown_handle: ShutdownHandle,
    interval: Duration,
    run_start: Instant,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut shutdown_listener = shutdown_handle.new_listener();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately, there is nothing to check yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_listener.wait_for_shutdown() => {
                    log::trace!("Threshold checker shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let snapshot = metrics.snapshot(run_start.elapsed());
            if let Some(breach) = first_abort_breach(&thresholds, &snapshot) {
                log::warn!(
                    "Threshold [{}: {}] breached with observed value {:?}, stopping the run",
                    breach.metric,
                    breach.expression,
                    breach.observed
                );
                shutdown_handle.shutdown(ShutdownReason::ThresholdBreached(format!(
                    "{}: {}",
                    breach.metric, breach.expression
                )));
                break;
            }
        }
    })
}
