use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use surge_core::prelude::parse_duration;

use crate::policy::{ExecutorPolicy, Stage};

/// A scenario declared in a scenario file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileScenario {
    pub name: String,
    /// The behaviour to run. `None` keeps the behaviour of the scenario this replaces, or uses the
    /// scenario name for a new scenario.
    pub exec: Option<String>,
    pub policy: ExecutorPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileThreshold {
    pub metric: String,
    pub expressions: Vec<String>,
    pub abort_on_fail: bool,
}

/// Scenarios and thresholds loaded from a TOML file.
///
/// ```toml
/// [scenarios.create_pr]
/// executor = "constant-arrival-rate"
/// rate = 5
/// time_unit = "1s"
/// duration = "1m"
/// pre_allocated_vus = 10
///
/// [thresholds]
/// http_req_failed = ["rate<0.01"]
/// http_req_duration = { expressions = ["p(95)<200"], abort_on_fail = true }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioFile {
    pub scenarios: Vec<FileScenario>,
    pub thresholds: Vec<FileThreshold>,
}

impl ScenarioFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid scenario file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let raw: RawScenarioFile = toml::from_str(content)?;

        let scenarios = raw
            .scenarios
            .into_iter()
            .map(|(name, scenario)| {
                let (exec, policy) = scenario
                    .into_policy()
                    .with_context(|| format!("Invalid scenario [{name}]"))?;
                Ok(FileScenario { name, exec, policy })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let thresholds = raw
            .thresholds
            .into_iter()
            .map(|(metric, threshold)| match threshold {
                RawThreshold::Expressions(expressions) => FileThreshold {
                    metric,
                    expressions,
                    abort_on_fail: false,
                },
                RawThreshold::Detailed {
                    expressions,
                    abort_on_fail,
                } => FileThreshold {
                    metric,
                    expressions,
                    abort_on_fail,
                },
            })
            .collect();

        Ok(Self {
            scenarios,
            thresholds,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawScenarioFile {
    #[serde(default)]
    scenarios: BTreeMap<String, RawScenario>,
    #[serde(default)]
    thresholds: BTreeMap<String, RawThreshold>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "executor", rename_all = "kebab-case")]
enum RawScenario {
    ConstantArrivalRate {
        rate: f64,
        #[serde(default = "default_time_unit")]
        time_unit: String,
        duration: String,
        pre_allocated_vus: usize,
        max_vus: Option<usize>,
        exec: Option<String>,
    },
    RampingArrivalRate {
        #[serde(default)]
        start_rate: f64,
        #[serde(default = "default_time_unit")]
        time_unit: String,
        stages: Vec<RawStage>,
        pre_allocated_vus: usize,
        max_vus: Option<usize>,
        exec: Option<String>,
    },
    ConstantVus {
        vus: usize,
        duration: String,
        exec: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawStage {
    target: f64,
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawThreshold {
    Expressions(Vec<String>),
    Detailed {
        expressions: Vec<String>,
        #[serde(default)]
        abort_on_fail: bool,
    },
}

fn default_time_unit() -> String {
    "1s".to_string()
}

fn duration_field(field: &str, value: &str) -> anyhow::Result<Duration> {
    parse_duration(value).with_context(|| format!("Invalid `{field}`"))
}

impl RawScenario {
    fn into_policy(self) -> anyhow::Result<(Option<String>, ExecutorPolicy)> {
        let parsed = match self {
            RawScenario::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
                exec,
            } => (
                exec,
                ExecutorPolicy::ConstantArrivalRate {
                    rate,
                    time_unit: duration_field("time_unit", &time_unit)?,
                    duration: duration_field("duration", &duration)?,
                    pre_allocated_vus,
                    max_vus,
                },
            ),
            RawScenario::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
                max_vus,
                exec,
            } => (
                exec,
                ExecutorPolicy::RampingArrivalRate {
                    start_rate,
                    time_unit: duration_field("time_unit", &time_unit)?,
                    stages: stages
                        .into_iter()
                        .map(|s| Ok(Stage::new(s.target, duration_field("duration", &s.duration)?)))
                        .collect::<anyhow::Result<Vec<_>>>()?,
                    pre_allocated_vus,
                    max_vus,
                },
            ),
            RawScenario::ConstantVus {
                vus,
                duration,
                exec,
            } => (
                exec,
                ExecutorPolicy::ConstantVus {
                    vus,
                    duration: duration_field("duration", &duration)?,
                },
            ),
        };

        Ok(parsed)
    }
}
