use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, Read, Write};
use std::path::PathBuf;

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Unique for each run.
    pub run_id: String,
    /// The name of the run definition, usually the scenario crate name
    pub run_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// How long the scenarios actually ran for, in milliseconds
    ///
    /// Zero if setup failed.
    pub elapsed_ms: u64,
    /// Per-scenario results, in the order the scenarios were defined
    pub scenarios: Vec<ScenarioSummary>,
    /// Final aggregates, keyed by metric key such as `iteration_duration` or
    /// `dropped_iterations{scenario:create_pr}`
    pub metrics: BTreeMap<String, MetricSummary>,
    /// Pass and fail counts for every named check
    pub checks: Vec<CheckSummary>,
    /// The result of every threshold expression at final evaluation
    pub thresholds: Vec<ThresholdSummary>,
    /// The overall outcome of the run
    pub status: RunStatus,
    /// Set if the teardown hook failed
    ///
    /// A teardown failure does not change [RunSummary::status].
    pub teardown_error: Option<String>,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the scenario asked to
    /// include.
    pub env: HashMap<String, String>,
    /// The version of Surge that was used for this run
    pub surge_version: String,
}

/// Results for a single scenario
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioSummary {
    pub name: String,
    /// The executor kind, such as `constant-arrival-rate`
    pub executor: String,
    /// A readable description of the executor parameters
    pub policy: String,
    /// Iterations that acquired a VU and were started
    pub iterations_started: u64,
    /// Iterations that ran to completion, whether they succeeded or failed
    pub iterations_completed: u64,
    pub iterations_failed: u64,
    /// Arrivals that found no free VU with the pool at its maximum size
    pub dropped_iterations: u64,
    /// The number of VUs created over the scenario's lifetime
    pub allocated_vus: usize,
    /// The largest number of VUs running an iteration at the same time
    pub peak_active_vus: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSummary {
    Counter {
        count: u64,
        /// Count per second over the run
        rate: f64,
    },
    Rate {
        passes: u64,
        total: u64,
        /// `passes / total`, or zero without samples
        rate: f64,
    },
    /// Millisecond values. Percentiles are estimated from an HDR histogram.
    Trend {
        count: u64,
        avg: f64,
        min: f64,
        med: f64,
        max: f64,
        p90: f64,
        p95: f64,
        p99: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckSummary {
    pub scenario: String,
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdStatus {
    Passed,
    Failed,
    /// The metric had no samples, which is not treated as a failure
    NoData,
}

impl ThresholdStatus {
    pub fn is_breached(&self) -> bool {
        matches!(self, ThresholdStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdSummary {
    pub metric: String,
    pub expression: String,
    /// The aggregate value the expression was checked against
    pub observed: Option<f64>,
    pub status: ThresholdStatus,
    pub abort_on_fail: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every threshold held
    Passed,
    /// The run completed but at least one threshold was breached
    ThresholdsFailed,
    /// The run was cancelled before the scenarios completed
    Aborted { reason: String },
    /// The setup hook failed so no scenario was started
    SetupFailed { error: String },
}

impl RunStatus {
    /// The process exit code for this status.
    ///
    /// 0 only when the run passed.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Passed => 0,
            RunStatus::ThresholdsFailed => 99,
            RunStatus::SetupFailed { .. } => 107,
            RunStatus::Aborted { .. } => 108,
        }
    }
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        run_name: String,
        started_at: i64,
        surge_version: String,
    ) -> Self {
        Self {
            run_id,
            run_name,
            started_at,
            elapsed_ms: 0,
            scenarios: Vec::new(),
            metrics: BTreeMap::new(),
            checks: Vec::new(),
            thresholds: Vec::new(),
            status: RunStatus::Passed,
            teardown_error: None,
            env: HashMap::with_capacity(0),
            surge_version,
        }
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// The process exit code for this run, see [RunStatus::exit_code]
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// The number of dropped iterations for a scenario, if the scenario was part of this run
    pub fn dropped_iterations(&self, scenario: &str) -> Option<u64> {
        self.scenarios
            .iter()
            .find(|s| s.name == scenario)
            .map(|s| s.dropped_iterations)
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to identify the configuration used for the run, so that
    /// results of runs with the same configuration can be compared. It uses the
    ///     - Run name
    ///     - Scenario names and executor policies
    ///     - Threshold expressions
    ///     - Selected environment variables
    ///     - Surge version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.run_name.as_bytes());
        self.scenarios
            .iter()
            .sorted_by_key(|s| s.name.as_str())
            .for_each(|s| {
                Digest::update(&mut hasher, s.name.as_bytes());
                Digest::update(&mut hasher, s.policy.as_bytes());
            });
        self.thresholds
            .iter()
            .map(|t| (t.metric.as_str(), t.expression.as_str()))
            .sorted()
            .for_each(|(metric, expression)| {
                Digest::update(&mut hasher, metric.as_bytes());
                Digest::update(&mut hasher, expression.as_bytes());
            });
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.surge_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: PathBuf) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: PathBuf) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}
