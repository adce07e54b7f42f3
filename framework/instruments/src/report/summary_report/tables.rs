use tabled::Tabled;

#[derive(Tabled)]
pub struct ScenarioRow {
    pub scenario: String,
    pub executor: String,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    #[tabled(rename = "vus (peak/allocated)")]
    pub vus: String,
}

#[derive(Tabled)]
pub struct MetricRow {
    pub metric: String,
    pub kind: &'static str,
    pub values: String,
}

#[derive(Tabled)]
pub struct CheckRow {
    pub scenario: String,
    pub check: String,
    pub passes: u64,
    pub fails: u64,
    #[tabled(display = "percent")]
    pub pass_rate: f64,
}

#[derive(Tabled)]
pub struct ThresholdRow {
    pub metric: String,
    pub expression: String,
    #[tabled(display = "optional_float3")]
    pub observed: Option<f64>,
    pub status: String,
}

fn percent(n: &f64) -> String {
    format!("{:.2}%", n * 100.0)
}

fn optional_float3(n: &Option<f64>) -> String {
    match n {
        Some(n) => format!("{n:.3}"),
        None => "-".to_string(),
    }
}
