use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use anyhow::Context;
use surge_core::prelude::{ShutdownHandle, ShutdownReason};
use surge_instruments::{evaluate_thresholds, ReportConfig, Reporter};
use surge_summary_model::{append_run_summary, RunStatus, RunSummary};
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::cli::ReporterOpt;
use crate::context::{RunnerContext, UserValuesConstraint};
use crate::definition::{GlobalHook, GlobalHookMut, HookResult, RunDefinition, RunDefinitionBuilder};
use crate::executor::Executor;
use crate::iteration::ScenarioShared;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::scenario::run_scenario;
use crate::shutdown::{start_shutdown_listener, ShutdownSignalError};
use crate::thresholds::start_threshold_checker;

/// Run every scenario of the definition and return the summary of the run.
///
/// An `Err` is only returned when the run could not be started, for example because the definition
/// is invalid. Failures during the run, including a failed setup hook, are reported through
/// [RunSummary::status] and [RunSummary::exit_code].
pub fn run<RV: UserValuesConstraint>(
    definition: RunDefinitionBuilder<RV>,
) -> anyhow::Result<RunSummary> {
    let definition = definition.build()?;

    log::info!("Running: {}", definition.name);

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = ShutdownHandle::new();
    start_shutdown_listener(&runtime, shutdown_handle.clone());

    let handle = runtime.handle().clone();
    runtime.block_on(orchestrate(definition, handle, shutdown_handle))
}

/// Like [run] but on the Tokio runtime the caller is already using.
///
/// Ctrl-C is not handled. This is mostly useful for tests with paused time.
pub async fn run_async<RV: UserValuesConstraint>(
    definition: RunDefinitionBuilder<RV>,
) -> anyhow::Result<RunSummary> {
    let definition = definition.build()?;

    log::info!("Running: {}", definition.name);

    orchestrate(definition, Handle::current(), ShutdownHandle::new()).await
}

async fn orchestrate<RV: UserValuesConstraint>(
    definition: RunDefinition<RV>,
    runtime: Handle,
    shutdown_handle: ShutdownHandle,
) -> anyhow::Result<RunSummary> {
    let run_start = Instant::now();
    let planned_duration = definition.planned_duration();
    let RunDefinition {
        name,
        run_id,
        connection_string,
        no_progress,
        reporter,
        summary_file,
        setup_fn,
        teardown_fn,
        scenarios,
        thresholds,
        threshold_check_interval,
        capture_env,
    } = definition;

    let reporter = Arc::new(match reporter {
        ReporterOpt::Noop => ReportConfig::default().init(),
        ReporterOpt::Summary => ReportConfig::default().enable_summary().init(),
    });

    let mut summary = RunSummary::new(
        run_id.clone(),
        name,
        chrono::Utc::now().timestamp(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    for key in capture_env {
        if let Ok(value) = std::env::var(&key) {
            summary.add_env(key, value);
        }
    }

    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));
    let runner_context = RunnerContext::new(
        executor,
        reporter.clone(),
        shutdown_handle.clone(),
        connection_string,
        run_id,
    );

    let runner_context = match setup_fn {
        Some(setup_fn) => {
            let (runner_context, result) = run_setup(setup_fn, runner_context).await?;
            if let Err(e) = result {
                log::error!("Setup failed, no scenario will be run: {e:?}");
                summary.status = match e.downcast_ref::<ShutdownSignalError>() {
                    Some(signal) => RunStatus::Aborted {
                        reason: signal.reason().to_string(),
                    },
                    None => RunStatus::SetupFailed {
                        error: format!("{e:#}"),
                    },
                };
                summary.elapsed_ms = run_start.elapsed().as_millis() as u64;

                shutdown_handle.shutdown(ShutdownReason::Completed);
                finish(&reporter, &summary, summary_file);
                return Ok(summary);
            }
            runner_context
        }
        None => runner_context,
    };
    let runner_context = Arc::new(runner_context);

    if !no_progress {
        start_progress(planned_duration, shutdown_handle.new_listener());
    }

    // Scenarios are about to start so watch for the load generator itself becoming the
    // bottleneck, which would make the results misleading.
    start_monitor(shutdown_handle.new_listener());

    let thresholds = Arc::new(thresholds);
    if thresholds.iter().any(|t| t.abort_on_fail) {
        start_threshold_checker(
            thresholds.clone(),
            reporter.metrics().clone(),
            shutdown_handle.clone(),
            threshold_check_interval,
            run_start,
        );
    }

    let run_iterations = Arc::new(AtomicU64::new(0));
    let handles = scenarios
        .into_iter()
        .map(|scenario| {
            let shared = Arc::new(ScenarioShared::new(
                scenario.name,
                scenario.behaviour,
                runner_context.clone(),
                run_iterations.clone(),
            ));
            tokio::spawn(run_scenario(shared, scenario.policy))
        })
        .collect::<Vec<_>>();

    for result in futures::future::join_all(handles).await {
        match result {
            Ok(scenario_summary) => summary.scenarios.push(scenario_summary),
            Err(e) => log::error!("Scenario task did not complete: {e}"),
        }
    }

    let stop_reason = shutdown_handle
        .reason()
        .filter(|reason| *reason != ShutdownReason::Completed);

    if let Some(teardown_fn) = teardown_fn {
        // Don't fail the run if the teardown fails. We still want the reporting to happen cleanly
        // and the hook is documented as 'best effort'.
        if let Err(e) = run_teardown(teardown_fn, runner_context.clone()).await {
            log::error!("Teardown failed: {e:?}");
            summary.teardown_error = Some(format!("{e:#}"));
        }
    }

    // Stops the background tasks, which includes the progress bar and the resource monitor.
    shutdown_handle.shutdown(ShutdownReason::Completed);

    let elapsed = run_start.elapsed();
    let snapshot = reporter.metrics().snapshot(elapsed);
    summary.elapsed_ms = elapsed.as_millis() as u64;
    summary.metrics = snapshot.metric_summaries();
    summary.checks = snapshot.check_summaries();
    summary.thresholds = evaluate_thresholds(&thresholds, &snapshot);

    summary.status = match stop_reason {
        Some(reason) => RunStatus::Aborted {
            reason: reason.to_string(),
        },
        None if summary.thresholds.iter().any(|t| t.status.is_breached()) => {
            RunStatus::ThresholdsFailed
        }
        None => RunStatus::Passed,
    };

    finish(&reporter, &summary, summary_file);

    Ok(summary)
}

/// Setup is synchronous so that it can use [Executor::execute_in_place]. It runs on a blocking
/// thread and hands the context back once it is done.
async fn run_setup<RV: UserValuesConstraint>(
    setup_fn: GlobalHookMut<RV>,
    mut runner_context: RunnerContext<RV>,
) -> anyhow::Result<(RunnerContext<RV>, HookResult)> {
    tokio::task::spawn_blocking(move || {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| setup_fn(&mut runner_context)))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("Setup hook panicked")));
        (runner_context, result)
    })
    .await
    .context("Setup task did not complete")
}

async fn run_teardown<RV: UserValuesConstraint>(
    teardown_fn: GlobalHook<RV>,
    runner_context: Arc<RunnerContext<RV>>,
) -> HookResult {
    tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(AssertUnwindSafe(|| teardown_fn(runner_context)))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("Teardown hook panicked")))
    })
    .await
    .context("Teardown task did not complete")?
}

fn finish(reporter: &Reporter, summary: &RunSummary, summary_file: Option<std::path::PathBuf>) {
    log::info!(
        "Run [{}] finished with status {:?}",
        summary.run_id,
        summary.status
    );

    reporter.finalize(summary);

    if let Some(path) = summary_file {
        if let Err(e) = append_run_summary(summary, path) {
            log::error!("Failed to write run summary: {e:?}");
        }
    }
}
