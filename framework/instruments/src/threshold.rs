use std::fmt::{Display, Formatter};
use std::str::FromStr;

use surge_summary_model::{ThresholdStatus, ThresholdSummary};

use crate::metrics::MetricKey;
use crate::snapshot::{Aggregate, AggregateValue, MetricsSnapshot};

#[derive(derive_more::Display, derive_more::Error, Debug, Clone, PartialEq, Eq)]
pub enum ThresholdParseError {
    #[display("invalid metric key `{key}`, expected `name` or `name{{scenario:<name>}}`")]
    InvalidMetricKey { key: String },
    #[display("threshold `{expression}` is missing a comparison operator")]
    MissingOperator { expression: String },
    #[display("unknown aggregate `{aggregate}` in threshold `{expression}`")]
    UnknownAggregate {
        expression: String,
        aggregate: String,
    },
    #[display("percentile in threshold `{expression}` must be between 0 and 100")]
    InvalidPercentile { expression: String },
    #[display("invalid value `{value}` in threshold `{expression}`")]
    InvalidValue { expression: String, value: String },
    #[display("threshold for metric `{key}` has no expressions")]
    NoExpressions { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparison {
    /// Longest operators first so `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ];

    pub fn holds(&self, observed: f64, expected: f64) -> bool {
        match self {
            Comparison::Lt => observed < expected,
            Comparison::Le => observed <= expected,
            Comparison::Gt => observed > expected,
            Comparison::Ge => observed >= expected,
            Comparison::Eq => observed == expected,
            Comparison::Ne => observed != expected,
        }
    }
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = Self::OPERATORS
            .iter()
            .find(|(_, c)| c == self)
            .map(|(op, _)| *op)
            .unwrap_or("?");
        write!(f, "{op}")
    }
}

/// A single `aggregate op value` expression such as `p(95)<200` or `rate<0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub aggregate: Aggregate,
    pub comparison: Comparison,
    pub value: f64,
}

impl FromStr for ThresholdExpr {
    type Err = ThresholdParseError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let compact = expression
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>();

        let op_start = compact
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| ThresholdParseError::MissingOperator {
                expression: expression.to_string(),
            })?;
        let (aggregate, rest) = compact.split_at(op_start);
        let (op, comparison) = Comparison::OPERATORS
            .iter()
            .find(|(op, _)| rest.starts_with(op))
            .ok_or_else(|| ThresholdParseError::MissingOperator {
                expression: expression.to_string(),
            })?;
        let value = &rest[op.len()..];

        let aggregate = parse_aggregate(expression, aggregate)?;
        let value = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ThresholdParseError::InvalidValue {
                expression: expression.to_string(),
                value: value.to_string(),
            })?;

        Ok(Self {
            aggregate,
            comparison: *comparison,
            value,
        })
    }
}

impl Display for ThresholdExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.aggregate, self.comparison, self.value)
    }
}

fn parse_aggregate(expression: &str, aggregate: &str) -> Result<Aggregate, ThresholdParseError> {
    let parsed = match aggregate {
        "count" => Aggregate::Count,
        "rate" => Aggregate::Rate,
        "avg" => Aggregate::Avg,
        "min" => Aggregate::Min,
        "max" => Aggregate::Max,
        "med" => Aggregate::Med,
        other => {
            let percentile = other
                .strip_prefix("p(")
                .and_then(|p| p.strip_suffix(')'))
                .ok_or_else(|| ThresholdParseError::UnknownAggregate {
                    expression: expression.to_string(),
                    aggregate: other.to_string(),
                })?;
            let percentile = percentile
                .parse::<f64>()
                .ok()
                .filter(|p| (0.0..=100.0).contains(p))
                .ok_or_else(|| ThresholdParseError::InvalidPercentile {
                    expression: expression.to_string(),
                })?;
            Aggregate::Percentile(percentile)
        }
    };

    Ok(parsed)
}

/// A set of expressions that must all hold for one metric series.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub key: MetricKey,
    pub expressions: Vec<ThresholdExpr>,
    /// Stop the run as soon as a periodic check finds this threshold breached.
    pub abort_on_fail: bool,
}

impl Threshold {
    pub fn parse<S: AsRef<str>>(
        metric_key: &str,
        expressions: &[S],
        abort_on_fail: bool,
    ) -> Result<Self, ThresholdParseError> {
        let key = MetricKey::parse(metric_key).ok_or_else(|| {
            ThresholdParseError::InvalidMetricKey {
                key: metric_key.to_string(),
            }
        })?;
        if expressions.is_empty() {
            return Err(ThresholdParseError::NoExpressions {
                key: metric_key.to_string(),
            });
        }

        let expressions = expressions
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<ThresholdExpr>, _>>()?;

        Ok(Self {
            key,
            expressions,
            abort_on_fail,
        })
    }

    /// Check each expression against the snapshot.
    ///
    /// A series without samples gives [ThresholdStatus::NoData]. An aggregate that does not apply
    /// to the kind of series, like `p(95)` on a counter, fails.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> Vec<ThresholdSummary> {
        self.expressions
            .iter()
            .map(|expr| {
                let value = match snapshot.get(&self.key) {
                    Some(series) => series.aggregate(expr.aggregate, snapshot.elapsed()),
                    None => AggregateValue::NoData,
                };

                let (observed, status) = match value {
                    AggregateValue::Value(observed) => {
                        let status = if expr.comparison.holds(observed, expr.value) {
                            ThresholdStatus::Passed
                        } else {
                            ThresholdStatus::Failed
                        };
                        (Some(observed), status)
                    }
                    AggregateValue::NoData => (None, ThresholdStatus::NoData),
                    AggregateValue::Unsupported => {
                        log::warn!(
                            "Threshold [{expr}] cannot be applied to metric [{}]",
                            self.key
                        );
                        (None, ThresholdStatus::Failed)
                    }
                };

                ThresholdSummary {
                    metric: self.key.to_string(),
                    expression: expr.to_string(),
                    observed,
                    status,
                    abort_on_fail: self.abort_on_fail,
                }
            })
            .collect()
    }
}

pub fn evaluate_thresholds(
    thresholds: &[Threshold],
    snapshot: &MetricsSnapshot,
) -> Vec<ThresholdSummary> {
    thresholds
        .iter()
        .flat_map(|threshold| threshold.evaluate(snapshot))
        .collect()
}

/// Evaluate only the thresholds marked `abort_on_fail`, returning the first breach.
pub fn first_abort_breach(
    thresholds: &[Threshold],
    snapshot: &MetricsSnapshot,
) -> Option<ThresholdSummary> {
    thresholds
        .iter()
        .filter(|threshold| threshold.abort_on_fail)
        .flat_map(|threshold| threshold.evaluate(snapshot))
        .find(|summary| summary.status.is_breached())
}
