use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use surge_runner::prelude::{
    run_async, Behaviour, ExecutorPolicy, HookResult, IterationContext, MetricSummary,
    ReporterOpt, RunDefinitionBuilder, RunStatus, RunSummary, Stage, SurgeScenarioCli,
    ThresholdStatus, UserValuesConstraint, ITERATIONS, ITERATION_FAILED,
};

#[derive(Default, Debug)]
struct Values;

impl UserValuesConstraint for Values {}

fn cli() -> SurgeScenarioCli {
    SurgeScenarioCli {
        connection_string: None,
        config: None,
        scenarios: vec![],
        duration_scale: None,
        no_progress: true,
        reporter: ReporterOpt::Noop,
        run_id: None,
        summary_file: None,
    }
}

fn single_scenario(
    name: &str,
    behaviour: impl Behaviour<Values>,
    policy: ExecutorPolicy,
) -> RunDefinitionBuilder<Values> {
    RunDefinitionBuilder::<Values>::new(name, cli())
        .use_named_behaviour("behaviour", behaviour)
        .add_scenario("scenario", "behaviour", policy)
}

async fn sleep_50ms(_ctx: IterationContext<Values>) -> HookResult {
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

async fn sleep_5s(_ctx: IterationContext<Values>) -> HookResult {
    tokio::time::sleep(Duration::from_secs(5)).await;
    Ok(())
}

fn counter(summary: &RunSummary, key: &str) -> u64 {
    match summary.metrics.get(key) {
        Some(MetricSummary::Counter { count, .. }) => *count,
        _ => 0,
    }
}

#[tokio::test(start_paused = true)]
async fn constant_rate_with_enough_vus() {
    let summary = run_async(single_scenario(
        "constant_rate_with_enough_vus",
        sleep_50ms,
        ExecutorPolicy::constant_arrival_rate(5.0, Duration::from_secs(10), 5),
    ))
    .await
    .unwrap();

    let scenario = &summary.scenarios[0];
    assert_eq!(50, scenario.iterations_started);
    assert_eq!(50, scenario.iterations_completed);
    assert_eq!(0, scenario.dropped_iterations);
    assert_eq!(1, scenario.peak_active_vus);
    assert_eq!(RunStatus::Passed, summary.status);
    assert_eq!(50, counter(&summary, ITERATIONS));
    assert_eq!(50, counter(&summary, "iterations{scenario:scenario}"));
}

#[tokio::test(start_paused = true)]
async fn slow_iterations_are_dropped_at_max_vus() {
    let summary = run_async(single_scenario(
        "slow_iterations_are_dropped_at_max_vus",
        sleep_5s,
        ExecutorPolicy::constant_arrival_rate(5.0, Duration::from_secs(10), 2).with_max_vus(10),
    ))
    .await
    .unwrap();

    let scenario = &summary.scenarios[0];
    assert!(scenario.dropped_iterations > 0);
    assert_eq!(50, scenario.iterations_started + scenario.dropped_iterations);
    assert_eq!(10, scenario.allocated_vus);
    assert!(scenario.peak_active_vus <= 10);
    assert_eq!(Some(scenario.dropped_iterations), summary.dropped_iterations("scenario"));
    assert_eq!(
        scenario.dropped_iterations,
        counter(&summary, "dropped_iterations")
    );
}

#[tokio::test(start_paused = true)]
async fn zero_rate_starts_nothing() {
    let summary = run_async(single_scenario(
        "zero_rate_starts_nothing",
        sleep_50ms,
        ExecutorPolicy::constant_arrival_rate(0.0, Duration::from_secs(10), 1),
    ))
    .await
    .unwrap();

    assert_eq!(0, summary.scenarios[0].iterations_started);
    assert_eq!(0, summary.scenarios[0].dropped_iterations);
    assert_eq!(RunStatus::Passed, summary.status);
}

static ACTIVE_VUS: Mutex<BTreeSet<usize>> = Mutex::new(BTreeSet::new());
static VU_ITERATIONS: Mutex<BTreeMap<usize, u64>> = Mutex::new(BTreeMap::new());

async fn sequential_behaviour(ctx: IterationContext<Values>) -> HookResult {
    if !ACTIVE_VUS.lock().unwrap().insert(ctx.vu_id()) {
        anyhow::bail!("VU {} is already running an iteration", ctx.vu_id());
    }

    let previous = VU_ITERATIONS
        .lock()
        .unwrap()
        .insert(ctx.vu_id(), ctx.vu_iteration())
        .unwrap_or(0);
    if ctx.vu_iteration() != previous + 1 {
        anyhow::bail!("VU {} skipped from {previous} to {}", ctx.vu_id(), ctx.vu_iteration());
    }

    tokio::time::sleep(Duration::from_millis(700)).await;

    ACTIVE_VUS.lock().unwrap().remove(&ctx.vu_id());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn each_vu_runs_one_iteration_at_a_time() {
    let summary = run_async(single_scenario(
        "each_vu_runs_one_iteration_at_a_time",
        sequential_behaviour,
        ExecutorPolicy::constant_arrival_rate(10.0, Duration::from_secs(5), 4).with_max_vus(20),
    ))
    .await
    .unwrap();

    let scenario = &summary.scenarios[0];
    assert_eq!(50, scenario.iterations_started);
    assert_eq!(0, scenario.iterations_failed);
    assert!(scenario.allocated_vus > 4);
    assert!(ACTIVE_VUS.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_iterations_keep_vus_running() {
    async fn failing(_ctx: IterationContext<Values>) -> HookResult {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(anyhow::anyhow!("always fails"))
    }

    let summary = run_async(single_scenario(
        "failing_iterations_keep_vus_running",
        failing,
        ExecutorPolicy::constant_vus(2, Duration::from_secs(1)),
    ))
    .await
    .unwrap();

    let scenario = &summary.scenarios[0];
    assert!((18..=22).contains(&scenario.iterations_started));
    assert_eq!(scenario.iterations_started, scenario.iterations_failed);
    assert_eq!(2, scenario.allocated_vus);
}

#[tokio::test(start_paused = true)]
async fn panicking_iteration_is_a_failure() {
    async fn panicking(ctx: IterationContext<Values>) -> HookResult {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if ctx.scenario_iteration() == 2 {
            panic!("iteration exploded");
        }
        Ok(())
    }

    let summary = run_async(single_scenario(
        "panicking_iteration_is_a_failure",
        panicking,
        ExecutorPolicy::constant_arrival_rate(5.0, Duration::from_secs(1), 1),
    ))
    .await
    .unwrap();

    let scenario = &summary.scenarios[0];
    assert_eq!(5, scenario.iterations_completed);
    assert_eq!(1, scenario.iterations_failed);
}

#[tokio::test(start_paused = true)]
async fn constant_vus_loop_until_duration() {
    async fn half_second(_ctx: IterationContext<Values>) -> HookResult {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok(())
    }

    let summary = run_async(single_scenario(
        "constant_vus_loop_until_duration",
        half_second,
        ExecutorPolicy::constant_vus(3, Duration::from_secs(2)),
    ))
    .await
    .unwrap();

    let scenario = &summary.scenarios[0];
    assert_eq!(12, scenario.iterations_started);
    assert_eq!(0, scenario.dropped_iterations);
    assert_eq!(3, scenario.peak_active_vus);
}

#[tokio::test(start_paused = true)]
async fn ramping_rate_follows_the_curve() {
    async fn instant(_ctx: IterationContext<Values>) -> HookResult {
        Ok(())
    }

    let summary = run_async(single_scenario(
        "ramping_rate_follows_the_curve",
        instant,
        ExecutorPolicy::ramping_arrival_rate(
            0.0,
            vec![
                Stage::new(10.0, Duration::from_secs(10)),
                Stage::new(0.0, Duration::from_secs(10)),
            ],
            2,
        ),
    ))
    .await
    .unwrap();

    // The area under the curve is 100
    let started = summary.scenarios[0].iterations_started;
    assert!((99..=101).contains(&started), "started {started}");
    assert_eq!(0, summary.scenarios[0].dropped_iterations);
}

#[tokio::test(start_paused = true)]
async fn failure_rate_threshold_fails_the_run() {
    async fn two_percent_fail(ctx: IterationContext<Values>) -> HookResult {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if ctx.scenario_iteration() % 50 == 0 {
            anyhow::bail!("planned failure");
        }
        Ok(())
    }

    let summary = run_async(
        single_scenario(
            "failure_rate_threshold_fails_the_run",
            two_percent_fail,
            ExecutorPolicy::constant_arrival_rate(100.0, Duration::from_secs(10), 5),
        )
        .add_threshold(ITERATION_FAILED, &["rate<0.01"], false),
    )
    .await
    .unwrap();

    assert_eq!(1000, summary.scenarios[0].iterations_started);
    assert_eq!(20, summary.scenarios[0].iterations_failed);
    assert_eq!(RunStatus::ThresholdsFailed, summary.status);
    assert_eq!(99, summary.exit_code());

    let threshold = &summary.thresholds[0];
    assert_eq!(ThresholdStatus::Failed, threshold.status);
    assert_eq!(Some(0.02), threshold.observed);
}

#[tokio::test(start_paused = true)]
async fn abort_threshold_stops_the_run() {
    async fn always_fail(_ctx: IterationContext<Values>) -> HookResult {
        Err(anyhow::anyhow!("down"))
    }

    let summary = run_async(
        single_scenario(
            "abort_threshold_stops_the_run",
            always_fail,
            ExecutorPolicy::constant_arrival_rate(10.0, Duration::from_secs(60), 2),
        )
        .add_threshold(ITERATION_FAILED, &["rate<0.1"], true)
        .with_threshold_check_interval(Duration::from_secs(1)),
    )
    .await
    .unwrap();

    match &summary.status {
        RunStatus::Aborted { reason } => assert!(reason.contains(ITERATION_FAILED), "{reason}"),
        status => panic!("Expected the run to be aborted, got {status:?}"),
    }
    assert!(summary.scenarios[0].iterations_started < 30);
    assert_eq!(ThresholdStatus::Failed, summary.thresholds[0].status);
}

#[tokio::test(start_paused = true)]
async fn abort_waits_for_in_flight_iterations() {
    async fn slow_fail(_ctx: IterationContext<Values>) -> HookResult {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Err(anyhow::anyhow!("down"))
    }

    let summary = run_async(
        single_scenario(
            "abort_waits_for_in_flight_iterations",
            slow_fail,
            ExecutorPolicy::constant_arrival_rate(10.0, Duration::from_secs(60), 30),
        )
        .add_threshold(ITERATION_FAILED, &["rate<0.1"], true)
        .with_threshold_check_interval(Duration::from_secs(1)),
    )
    .await
    .unwrap();

    assert!(matches!(summary.status, RunStatus::Aborted { .. }));
    let scenario = &summary.scenarios[0];
    assert!(scenario.iterations_started >= 20);
    assert!(scenario.iterations_started < 100);
    assert_eq!(scenario.iterations_started, scenario.iterations_completed);
    assert_eq!(scenario.iterations_started, scenario.iterations_failed);
    assert_eq!(scenario.iterations_completed, counter(&summary, ITERATIONS));
}

#[tokio::test(start_paused = true)]
async fn checks_and_custom_metrics_are_reported() {
    async fn observed(ctx: IterationContext<Values>) -> HookResult {
        ctx.check("even iteration", ctx.scenario_iteration() % 2 == 0);
        ctx.record_trend("wait_time", 25.0);
        Ok(())
    }

    let summary = run_async(single_scenario(
        "checks_and_custom_metrics_are_reported",
        observed,
        ExecutorPolicy::constant_arrival_rate(10.0, Duration::from_secs(1), 1),
    ))
    .await
    .unwrap();

    assert_eq!(1, summary.checks.len());
    let check = &summary.checks[0];
    assert_eq!("scenario", check.scenario);
    assert_eq!("even iteration", check.name);
    assert_eq!(5, check.passes);
    assert_eq!(5, check.fails);

    assert!(summary.metrics.contains_key("wait_time"));
    assert!(summary.metrics.contains_key("wait_time{scenario:scenario}"));
    assert!(summary.metrics.contains_key("checks"));

    // Failed checks never fail the iteration
    assert_eq!(0, summary.scenarios[0].iterations_failed);
}

static RUN_ITERATIONS: Mutex<Vec<u64>> = Mutex::new(Vec::new());

#[tokio::test(start_paused = true)]
async fn scenarios_run_concurrently_with_own_durations() {
    async fn record_run_iteration(ctx: IterationContext<Values>) -> HookResult {
        RUN_ITERATIONS.lock().unwrap().push(ctx.run_iteration());
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(())
    }

    let summary = run_async(
        RunDefinitionBuilder::<Values>::new("scenarios_run_concurrently_with_own_durations", cli())
            .use_named_behaviour("record", record_run_iteration)
            .add_scenario(
                "short",
                "record",
                ExecutorPolicy::constant_arrival_rate(10.0, Duration::from_secs(1), 2),
            )
            .add_scenario(
                "long",
                "record",
                ExecutorPolicy::constant_arrival_rate(10.0, Duration::from_secs(3), 2),
            ),
    )
    .await
    .unwrap();

    assert_eq!(10, summary.scenarios[0].iterations_started);
    assert_eq!(30, summary.scenarios[1].iterations_started);
    // Both scenarios start together, so the run takes as long as the longest one
    assert!(summary.elapsed_ms < 3500, "elapsed {}", summary.elapsed_ms);

    let mut seen = RUN_ITERATIONS.lock().unwrap().clone();
    seen.sort();
    assert_eq!((0..40).collect::<Vec<_>>(), seen);
}

#[tokio::test(start_paused = true)]
async fn summary_is_appended_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summaries.jsonl");

    let mut cli = cli();
    cli.summary_file = Some(path.clone());
    cli.run_id = Some("summary-file-run".to_string());

    let summary = run_async(
        RunDefinitionBuilder::<Values>::new("summary_is_appended_to_file", cli)
            .use_named_behaviour("behaviour", sleep_50ms)
            .add_scenario(
                "scenario",
                "behaviour",
                ExecutorPolicy::constant_arrival_rate(2.0, Duration::from_secs(1), 1),
            ),
    )
    .await
    .unwrap();

    assert_eq!("summary-file-run", summary.run_id);
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(1, content.lines().count());
    assert!(content.contains("summary-file-run"));
}
