use std::sync::Arc;
use std::time::Duration;

use surge_runner::prelude::{
    run, ExecutorPolicy, HookResult, IterationContext, ReporterOpt, RunStatus, RunnerContext,
    RunDefinitionBuilder, SurgeScenarioCli, UserValuesConstraint,
};

#[derive(Default, Debug)]
struct RunnerContextValue {
    prepared: bool,
}

impl UserValuesConstraint for RunnerContextValue {}

fn sample_cli_cfg() -> SurgeScenarioCli {
    SurgeScenarioCli {
        connection_string: Some("test_connection_string".to_string()),
        config: None,
        scenarios: vec![],
        duration_scale: None,
        no_progress: true,
        reporter: ReporterOpt::Noop,
        run_id: None,
        summary_file: None,
    }
}

async fn quick_behaviour(_ctx: IterationContext<RunnerContextValue>) -> HookResult {
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}

fn builder(name: &str) -> RunDefinitionBuilder<RunnerContextValue> {
    RunDefinitionBuilder::<RunnerContextValue>::new(name, sample_cli_cfg())
        .use_named_behaviour("quick", quick_behaviour)
        .add_scenario(
            "quick",
            "quick",
            ExecutorPolicy::constant_arrival_rate(20.0, Duration::from_millis(500), 2),
        )
}

#[test]
fn report_error_in_setup_hook() {
    fn setup(_ctx: &mut RunnerContext<RunnerContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in setup hook"))
    }

    let summary = run(builder("report_error_in_setup_hook").use_setup(setup)).unwrap();

    assert_eq!(
        RunStatus::SetupFailed {
            error: "Error in setup hook".to_string()
        },
        summary.status
    );
    assert_ne!(0, summary.exit_code());
    assert!(summary.scenarios.is_empty());
}

#[test]
fn report_panic_in_setup_hook() {
    fn setup(_ctx: &mut RunnerContext<RunnerContextValue>) -> HookResult {
        panic!("setup exploded");
    }

    let summary = run(builder("report_panic_in_setup_hook").use_setup(setup)).unwrap();

    assert!(matches!(summary.status, RunStatus::SetupFailed { .. }));
    assert_ne!(0, summary.exit_code());
}

#[test]
fn setup_value_is_shared_with_iterations() {
    fn setup(ctx: &mut RunnerContext<RunnerContextValue>) -> HookResult {
        ctx.get_mut().prepared = ctx.executor().execute_in_place(async { Ok(true) })?;
        Ok(())
    }

    async fn behaviour(ctx: IterationContext<RunnerContextValue>) -> HookResult {
        if !ctx.get().prepared {
            anyhow::bail!("Setup value not visible");
        }
        Ok(())
    }

    let summary = run(
        builder("setup_value_is_shared_with_iterations")
            .use_setup(setup)
            .use_named_behaviour("check_prepared", behaviour)
            .add_scenario(
                "quick",
                "check_prepared",
                ExecutorPolicy::constant_arrival_rate(20.0, Duration::from_millis(500), 2),
            ),
    )
    .unwrap();

    assert_eq!(RunStatus::Passed, summary.status);
    assert_eq!(10, summary.scenarios[0].iterations_started);
    assert_eq!(0, summary.scenarios[0].iterations_failed);
}

#[test]
fn capture_error_in_behaviour_and_continue() {
    async fn failing_behaviour(_ctx: IterationContext<RunnerContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in behaviour"))
    }

    let summary = run(
        builder("capture_error_in_behaviour_and_continue")
            .use_named_behaviour("failing", failing_behaviour)
            .add_scenario(
                "quick",
                "failing",
                ExecutorPolicy::constant_arrival_rate(20.0, Duration::from_millis(500), 1),
            ),
    )
    .unwrap();

    assert_eq!(RunStatus::Passed, summary.status);
    assert_eq!(10, summary.scenarios[0].iterations_started);
    assert_eq!(10, summary.scenarios[0].iterations_failed);
}

#[test]
fn force_stop_aborts_run() {
    async fn stopping_behaviour(ctx: IterationContext<RunnerContextValue>) -> HookResult {
        if ctx.scenario_iteration() >= 3 {
            ctx.runner_context().force_stop_run();
        }
        Ok(())
    }

    let summary = run(
        builder("force_stop_aborts_run")
            .use_named_behaviour("stopping", stopping_behaviour)
            .add_scenario(
                "quick",
                "stopping",
                ExecutorPolicy::constant_arrival_rate(10.0, Duration::from_secs(60), 1),
            ),
    )
    .unwrap();

    assert!(matches!(summary.status, RunStatus::Aborted { .. }));
    assert_ne!(0, summary.exit_code());
    assert!(summary.scenarios[0].iterations_started < 600);
}

#[test]
fn capture_error_in_teardown() {
    fn teardown(_ctx: Arc<RunnerContext<RunnerContextValue>>) -> HookResult {
        Err(anyhow::anyhow!("Error in teardown hook"))
    }

    let summary = run(builder("capture_error_in_teardown").use_teardown(teardown)).unwrap();

    assert_eq!(RunStatus::Passed, summary.status);
    assert_eq!(
        Some("Error in teardown hook".to_string()),
        summary.teardown_error
    );
}

#[test]
fn teardown_sees_setup_value() {
    fn setup(ctx: &mut RunnerContext<RunnerContextValue>) -> HookResult {
        ctx.get_mut().prepared = true;
        Ok(())
    }

    fn teardown(ctx: Arc<RunnerContext<RunnerContextValue>>) -> HookResult {
        if !ctx.get().prepared {
            anyhow::bail!("Setup value not visible in teardown");
        }
        Ok(())
    }

    let summary = run(
        builder("teardown_sees_setup_value")
            .use_setup(setup)
            .use_teardown(teardown),
    )
    .unwrap();

    assert_eq!(RunStatus::Passed, summary.status);
    assert_eq!(None, summary.teardown_error);
}

#[test]
fn invalid_definition_is_an_error() {
    let result = run(builder("invalid_definition_is_an_error").add_scenario(
        "other",
        "missing_behaviour",
        ExecutorPolicy::constant_vus(1, Duration::from_secs(1)),
    ));

    assert!(result.is_err());
}
