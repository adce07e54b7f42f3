use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures::future::BoxFuture;
use futures::FutureExt;
use surge_instruments::Threshold;

use crate::cli::{ReporterOpt, SurgeScenarioCli};
use crate::config::ScenarioFile;
use crate::context::{IterationContext, RunnerContext, UserValuesConstraint};
use crate::init::init;
use crate::policy::ExecutorPolicy;

pub type HookResult = anyhow::Result<()>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type GlobalHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;

/// The work that one iteration of a scenario does.
///
/// Implemented for any `async fn(IterationContext<RV>) -> HookResult` and for closures that
/// return a future, so a behaviour is usually just an async function.
pub trait Behaviour<RV: UserValuesConstraint>: Send + Sync + 'static {
    fn call(&self, ctx: IterationContext<RV>) -> BoxFuture<'static, HookResult>;
}

impl<RV, F, Fut> Behaviour<RV> for F
where
    RV: UserValuesConstraint,
    F: Fn(IterationContext<RV>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HookResult> + Send + 'static,
{
    fn call(&self, ctx: IterationContext<RV>) -> BoxFuture<'static, HookResult> {
        (self)(ctx).boxed()
    }
}

/// How often abort thresholds are checked while the run is in progress.
const DEFAULT_THRESHOLD_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct ScenarioEntry {
    name: String,
    behaviour: String,
    policy: ExecutorPolicy,
}

#[derive(Debug, Clone)]
struct ThresholdEntry {
    metric: String,
    expressions: Vec<String>,
    abort_on_fail: bool,
}

/// The builder for a run definition.
///
/// This must be used at the start of a test to define the scenarios that you want to run.
pub struct RunDefinitionBuilder<RV: UserValuesConstraint> {
    /// The name of the run, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: SurgeScenarioCli,
    /// Used when no connection string is given on the command line.
    default_connection_string: Option<String>,
    /// Global setup hook. It will be run once, before any scenario is started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Global teardown hook. It will be run once, after every scenario has finished.
    ///
    /// This is a best effort hook. A failure is recorded in the run summary but does not change
    /// the result of the run.
    teardown_fn: Option<GlobalHook<RV>>,
    /// Behaviours by name. Scenarios refer to a behaviour by its name.
    behaviours: HashMap<String, Arc<dyn Behaviour<RV>>>,
    duplicate_behaviours: Vec<String>,
    scenarios: Vec<ScenarioEntry>,
    thresholds: Vec<ThresholdEntry>,
    threshold_check_interval: Duration,
    /// Environment variables to record in the run summary.
    capture_env: BTreeSet<String>,
}

pub(crate) struct ScenarioDefinition<RV: UserValuesConstraint> {
    pub(crate) name: Arc<str>,
    pub(crate) policy: ExecutorPolicy,
    pub(crate) behaviour: Arc<dyn Behaviour<RV>>,
}

pub(crate) struct RunDefinition<RV: UserValuesConstraint> {
    pub(crate) name: String,
    pub(crate) run_id: String,
    pub(crate) connection_string: Option<String>,
    pub(crate) no_progress: bool,
    pub(crate) reporter: ReporterOpt,
    pub(crate) summary_file: Option<PathBuf>,
    pub(crate) setup_fn: Option<GlobalHookMut<RV>>,
    pub(crate) teardown_fn: Option<GlobalHook<RV>>,
    pub(crate) scenarios: Vec<ScenarioDefinition<RV>>,
    pub(crate) thresholds: Vec<Threshold>,
    pub(crate) threshold_check_interval: Duration,
    pub(crate) capture_env: BTreeSet<String>,
}

impl<RV: UserValuesConstraint> RunDefinition<RV> {
    /// The time until the longest scenario stops starting iterations.
    pub(crate) fn planned_duration(&self) -> Duration {
        self.scenarios
            .iter()
            .map(|s| s.policy.duration())
            .max()
            .unwrap_or_default()
    }
}

impl<RV: UserValuesConstraint> RunDefinitionBuilder<RV> {
    /// Initialise a new run definition from the run name and command line arguments.
    /// See [RunDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: SurgeScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_connection_string: None,
            setup_fn: None,
            teardown_fn: None,
            behaviours: HashMap::new(),
            duplicate_behaviours: Vec::new(),
            scenarios: Vec::new(),
            thresholds: Vec::new(),
            threshold_check_interval: DEFAULT_THRESHOLD_CHECK_INTERVAL,
            capture_env: BTreeSet::new(),
        }
    }

    /// Initialise logging, parse the command line and create a new run definition.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, init())
    }

    /// Set the connection string to use when none is given on the command line.
    pub fn with_default_connection_string(mut self, connection_string: &str) -> Self {
        self.default_connection_string = Some(connection_string.to_string());
        self
    }

    /// Set the global setup hook [RunDefinitionBuilder::setup_fn] for this run.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the global teardown hook [RunDefinitionBuilder::teardown_fn] for this run.
    pub fn use_teardown(mut self, teardown_fn: GlobalHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    /// Register a behaviour that scenarios can refer to by `name`.
    pub fn use_named_behaviour(mut self, name: &str, behaviour: impl Behaviour<RV>) -> Self {
        let previous = self
            .behaviours
            .insert(name.to_string(), Arc::new(behaviour));

        if previous.is_some() {
            self.duplicate_behaviours.push(name.to_string());
        }

        self
    }

    /// Add a scenario that runs the behaviour called `behaviour` under `policy`.
    ///
    /// Adding a scenario with the name of an existing scenario replaces it.
    pub fn add_scenario(mut self, name: &str, behaviour: &str, policy: ExecutorPolicy) -> Self {
        let entry = ScenarioEntry {
            name: name.to_string(),
            behaviour: behaviour.to_string(),
            policy,
        };

        match self.scenarios.iter_mut().find(|s| s.name == name) {
            Some(existing) => *existing = entry,
            None => self.scenarios.push(entry),
        }

        self
    }

    /// Add a threshold on a metric key such as `http_req_duration` or
    /// `iteration_failed{scenario:create_pr}`.
    ///
    /// Every expression must hold at the end of the run for the run to pass. With
    /// `abort_on_fail`, the run is also stopped as soon as a periodic check finds the threshold
    /// breached.
    pub fn add_threshold(
        mut self,
        metric: &str,
        expressions: &[&str],
        abort_on_fail: bool,
    ) -> Self {
        self.thresholds.push(ThresholdEntry {
            metric: metric.to_string(),
            expressions: expressions.iter().map(|e| e.to_string()).collect(),
            abort_on_fail,
        });
        self
    }

    /// Change how often thresholds with `abort_on_fail` are checked during the run.
    pub fn with_threshold_check_interval(mut self, interval: Duration) -> Self {
        self.threshold_check_interval = interval;
        self
    }

    /// Record the value of an environment variable in the run summary, if it is set.
    pub fn add_capture_env(mut self, key: &str) -> Self {
        self.capture_env.insert(key.to_string());
        self
    }

    pub(crate) fn build(mut self) -> anyhow::Result<RunDefinition<RV>> {
        if let Some(name) = self.duplicate_behaviours.first() {
            anyhow::bail!("Behaviour [{name}] is already defined");
        }

        if let Some(path) = self.cli.config.clone() {
            self.merge_scenario_file(ScenarioFile::load(&path)?);
        }

        if !self.cli.scenarios.is_empty() {
            for selected in &self.cli.scenarios {
                if !self.scenarios.iter().any(|s| &s.name == selected) {
                    anyhow::bail!("Scenario [{selected}] was selected but is not defined");
                }
            }
            let selected = &self.cli.scenarios;
            self.scenarios.retain(|s| selected.contains(&s.name));
        }

        if self.scenarios.is_empty() {
            anyhow::bail!("No scenarios to run");
        }

        let scale = match self.cli.duration_scale {
            Some(scale) if !scale.is_finite() || scale <= 0.0 => {
                anyhow::bail!("Duration scale must be greater than zero, got {scale}")
            }
            scale => scale,
        };

        let mut scenarios = Vec::with_capacity(self.scenarios.len());
        for entry in self.scenarios {
            let policy = match scale {
                Some(scale) => entry.policy.scaled(scale).with_context(|| {
                    format!("Cannot scale durations of scenario [{}]", entry.name)
                })?,
                None => entry.policy,
            };
            policy
                .validate()
                .with_context(|| format!("Invalid executor for scenario [{}]", entry.name))?;

            let behaviour = self.behaviours.get(&entry.behaviour).cloned().with_context(|| {
                format!(
                    "Scenario [{}] uses behaviour [{}] which is not defined",
                    entry.name, entry.behaviour
                )
            })?;

            scenarios.push(ScenarioDefinition {
                name: entry.name.into(),
                policy,
                behaviour,
            });
        }

        let thresholds = self
            .thresholds
            .iter()
            .map(|t| Threshold::parse(&t.metric, &t.expressions, t.abort_on_fail))
            .collect::<Result<Vec<_>, _>>()?;

        if self.threshold_check_interval.is_zero() {
            anyhow::bail!("Threshold check interval must be greater than zero");
        }

        let connection_string = self
            .cli
            .connection_string
            .or(self.default_connection_string);

        Ok(RunDefinition {
            name: self.name,
            run_id: self
                .cli
                .run_id
                .unwrap_or_else(|| nanoid::nanoid!()),
            connection_string,
            no_progress: self.cli.no_progress,
            reporter: self.cli.reporter,
            summary_file: self.cli.summary_file,
            setup_fn: self.setup_fn,
            teardown_fn: self.teardown_fn,
            scenarios,
            thresholds,
            threshold_check_interval: self.threshold_check_interval,
            capture_env: self.capture_env,
        })
    }

    fn merge_scenario_file(&mut self, file: ScenarioFile) {
        for scenario in file.scenarios {
            let existing = self.scenarios.iter_mut().find(|s| s.name == scenario.name);
            match (existing, scenario.exec) {
                (Some(existing), exec) => {
                    log::debug!("Scenario [{}] replaced from file", scenario.name);
                    if let Some(exec) = exec {
                        existing.behaviour = exec;
                    }
                    existing.policy = scenario.policy;
                }
                (None, exec) => {
                    let behaviour = exec.unwrap_or_else(|| scenario.name.clone());
                    self.scenarios.push(ScenarioEntry {
                        name: scenario.name,
                        behaviour,
                        policy: scenario.policy,
                    });
                }
            }
        }

        for threshold in file.thresholds {
            self.thresholds.retain(|t| t.metric != threshold.metric);
            self.thresholds.push(ThresholdEntry {
                metric: threshold.metric,
                expressions: threshold.expressions,
                abort_on_fail: threshold.abort_on_fail,
            });
        }
    }
}
