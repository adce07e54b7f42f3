use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct SurgeScenarioCli {
    /// A connection string for the service to test, usually its base URL
    #[clap(short, long)]
    pub connection_string: Option<String>,

    /// A TOML file that declares scenarios and thresholds.
    ///
    /// Scenarios in the file replace scenarios of the same name that the run defines, and add any
    /// new ones. A scenario picks its behaviour with `exec`, which defaults to the scenario name.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Only run the named scenario. Use the flag multiple times to run several, for example
    /// `--scenario create_pr --scenario get_review`.
    ///
    /// All scenarios run if this is not set.
    #[clap(long = "scenario")]
    pub scenarios: Vec<String>,

    /// Multiply every scenario duration by this factor. Useful for a short smoke run of a long
    /// test, for example `--duration-scale 0.1`.
    #[clap(long)]
    pub duration_scale: Option<f64>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by
    /// anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// How to report the results of the run
    #[clap(long, value_enum, default_value_t = ReporterOpt::Summary)]
    pub reporter: ReporterOpt,

    /// An identifier for this run. A random one is chosen if not set.
    #[clap(long)]
    pub run_id: Option<String>,

    /// Append the run summary as a JSON line to this file
    #[clap(long)]
    pub summary_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ReporterOpt {
    /// Do not report, the run summary is still returned and written to the summary file
    Noop,
    /// Print summary tables to stdout at the end of the run
    #[default]
    Summary,
}
