use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(derive_more::Display, derive_more::Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[display("rate must be finite and not negative, got {rate}")]
    InvalidRate { rate: f64 },
    #[display("time unit must be greater than zero")]
    ZeroTimeUnit,
    #[display("duration must be greater than zero")]
    ZeroDuration,
    #[display("a ramping arrival rate needs at least one stage")]
    NoStages,
    #[display("stage {stage} must have a duration greater than zero")]
    ZeroStageDuration { stage: usize },
    #[display("stage {stage} target must be finite and not negative, got {target}")]
    InvalidStageTarget { stage: usize, target: f64 },
    #[display("the number of VUs must be greater than zero")]
    ZeroVus,
    #[display("max VUs ({max_vus}) must not be less than pre-allocated VUs ({pre_allocated_vus})")]
    MaxBelowPreAllocated {
        pre_allocated_vus: usize,
        max_vus: usize,
    },
    #[display("scaling durations by {factor} does not give a valid duration")]
    InvalidScale { factor: f64 },
}

/// One segment of a ramping arrival rate. The rate moves linearly from the previous target to
/// `target` over `duration`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Arrivals per time unit at the end of the stage
    pub target: f64,
    pub duration: Duration,
}

impl Stage {
    pub fn new(target: f64, duration: Duration) -> Self {
        Self { target, duration }
    }
}

/// Decides when the iterations of a scenario start.
///
/// The arrival rate policies are open models: iterations start on a timeline whether or not
/// previous iterations have finished. [ExecutorPolicy::ConstantVus] is a closed model where each
/// VU starts its next iteration as soon as the previous one finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorPolicy {
    ConstantArrivalRate {
        /// Arrivals per `time_unit`
        rate: f64,
        time_unit: Duration,
        duration: Duration,
        pre_allocated_vus: usize,
        /// Defaults to `pre_allocated_vus`
        max_vus: Option<usize>,
    },
    RampingArrivalRate {
        /// Arrivals per `time_unit` at the start of the first stage
        start_rate: f64,
        time_unit: Duration,
        stages: Vec<Stage>,
        pre_allocated_vus: usize,
        /// Defaults to `pre_allocated_vus`
        max_vus: Option<usize>,
    },
    ConstantVus {
        vus: usize,
        duration: Duration,
    },
}

impl ExecutorPolicy {
    /// A constant arrival rate of `rate` iterations per second.
    pub fn constant_arrival_rate(rate: f64, duration: Duration, pre_allocated_vus: usize) -> Self {
        ExecutorPolicy::ConstantArrivalRate {
            rate,
            time_unit: Duration::from_secs(1),
            duration,
            pre_allocated_vus,
            max_vus: None,
        }
    }

    /// A ramping arrival rate in iterations per second, starting at `start_rate`.
    pub fn ramping_arrival_rate(
        start_rate: f64,
        stages: Vec<Stage>,
        pre_allocated_vus: usize,
    ) -> Self {
        ExecutorPolicy::RampingArrivalRate {
            start_rate,
            time_unit: Duration::from_secs(1),
            stages,
            pre_allocated_vus,
            max_vus: None,
        }
    }

    pub fn constant_vus(vus: usize, duration: Duration) -> Self {
        ExecutorPolicy::ConstantVus { vus, duration }
    }

    /// Allow the VU pool to grow beyond the pre-allocated VUs. Ignored for constant VUs.
    pub fn with_max_vus(mut self, max: usize) -> Self {
        match &mut self {
            ExecutorPolicy::ConstantArrivalRate { max_vus, .. }
            | ExecutorPolicy::RampingArrivalRate { max_vus, .. } => *max_vus = Some(max),
            ExecutorPolicy::ConstantVus { .. } => {}
        }
        self
    }

    /// Change the unit that rates are expressed in. Ignored for constant VUs.
    pub fn with_time_unit(mut self, unit: Duration) -> Self {
        match &mut self {
            ExecutorPolicy::ConstantArrivalRate { time_unit, .. }
            | ExecutorPolicy::RampingArrivalRate { time_unit, .. } => *time_unit = unit,
            ExecutorPolicy::ConstantVus { .. } => {}
        }
        self
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorPolicy::ConstantArrivalRate { .. } => "constant-arrival-rate",
            ExecutorPolicy::RampingArrivalRate { .. } => "ramping-arrival-rate",
            ExecutorPolicy::ConstantVus { .. } => "constant-vus",
        }
    }

    /// Whether iterations are started on a timeline rather than by looping VUs.
    pub fn is_open_model(&self) -> bool {
        !matches!(self, ExecutorPolicy::ConstantVus { .. })
    }

    /// How long new iterations may be started for.
    pub fn duration(&self) -> Duration {
        match self {
            ExecutorPolicy::ConstantArrivalRate { duration, .. }
            | ExecutorPolicy::ConstantVus { duration, .. } => *duration,
            ExecutorPolicy::RampingArrivalRate { stages, .. } => {
                stages.iter().map(|s| s.duration).sum()
            }
        }
    }

    pub fn pre_allocated_vus(&self) -> usize {
        match self {
            ExecutorPolicy::ConstantArrivalRate {
                pre_allocated_vus, ..
            }
            | ExecutorPolicy::RampingArrivalRate {
                pre_allocated_vus, ..
            } => *pre_allocated_vus,
            ExecutorPolicy::ConstantVus { vus, .. } => *vus,
        }
    }

    /// The largest number of VUs the scenario may use.
    pub fn max_vus(&self) -> usize {
        match self {
            ExecutorPolicy::ConstantArrivalRate {
                pre_allocated_vus,
                max_vus,
                ..
            }
            | ExecutorPolicy::RampingArrivalRate {
                pre_allocated_vus,
                max_vus,
                ..
            } => max_vus.unwrap_or(*pre_allocated_vus),
            ExecutorPolicy::ConstantVus { vus, .. } => *vus,
        }
    }

    /// Multiply every duration by `factor`. Rates and time units are unchanged.
    pub fn scaled(&self, factor: f64) -> Result<Self, PolicyError> {
        let scale = |d: &Duration| {
            Duration::try_from_secs_f64(d.as_secs_f64() * factor)
                .map_err(|_| PolicyError::InvalidScale { factor })
        };
        Ok(match self {
            ExecutorPolicy::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => ExecutorPolicy::ConstantArrivalRate {
                rate: *rate,
                time_unit: *time_unit,
                duration: scale(duration)?,
                pre_allocated_vus: *pre_allocated_vus,
                max_vus: *max_vus,
            },
            ExecutorPolicy::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
                max_vus,
            } => ExecutorPolicy::RampingArrivalRate {
                start_rate: *start_rate,
                time_unit: *time_unit,
                stages: stages
                    .iter()
                    .map(|s| Ok(Stage::new(s.target, scale(&s.duration)?)))
                    .collect::<Result<_, PolicyError>>()?,
                pre_allocated_vus: *pre_allocated_vus,
                max_vus: *max_vus,
            },
            ExecutorPolicy::ConstantVus { vus, duration } => ExecutorPolicy::ConstantVus {
                vus: *vus,
                duration: scale(duration)?,
            },
        })
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        match self {
            ExecutorPolicy::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                pre_allocated_vus,
                max_vus,
            } => {
                validate_rate(*rate)?;
                validate_time_unit(*time_unit)?;
                if duration.is_zero() {
                    return Err(PolicyError::ZeroDuration);
                }
                validate_vus(*pre_allocated_vus, *max_vus)
            }
            ExecutorPolicy::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                pre_allocated_vus,
                max_vus,
            } => {
                validate_rate(*start_rate)?;
                validate_time_unit(*time_unit)?;
                if stages.is_empty() {
                    return Err(PolicyError::NoStages);
                }
                for (stage, s) in stages.iter().enumerate() {
                    if !s.target.is_finite() || s.target < 0.0 {
                        return Err(PolicyError::InvalidStageTarget {
                            stage,
                            target: s.target,
                        });
                    }
                    if s.duration.is_zero() {
                        return Err(PolicyError::ZeroStageDuration { stage });
                    }
                }
                validate_vus(*pre_allocated_vus, *max_vus)
            }
            ExecutorPolicy::ConstantVus { vus, duration } => {
                if *vus == 0 {
                    return Err(PolicyError::ZeroVus);
                }
                if duration.is_zero() {
                    return Err(PolicyError::ZeroDuration);
                }
                Ok(())
            }
        }
    }
}

fn validate_rate(rate: f64) -> Result<(), PolicyError> {
    if rate.is_finite() && rate >= 0.0 {
        Ok(())
    } else {
        Err(PolicyError::InvalidRate { rate })
    }
}

fn validate_time_unit(time_unit: Duration) -> Result<(), PolicyError> {
    if time_unit.is_zero() {
        Err(PolicyError::ZeroTimeUnit)
    } else {
        Ok(())
    }
}

fn validate_vus(pre_allocated_vus: usize, max_vus: Option<usize>) -> Result<(), PolicyError> {
    let max = max_vus.unwrap_or(pre_allocated_vus);
    if max < pre_allocated_vus {
        return Err(PolicyError::MaxBelowPreAllocated {
            pre_allocated_vus,
            max_vus: max,
        });
    }
    if max == 0 {
        return Err(PolicyError::ZeroVus);
    }
    Ok(())
}

impl Display for ExecutorPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorPolicy::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                ..
            } => write!(
                f,
                "{} rate={rate}/{time_unit:?} duration={duration:?} vus={}..{}",
                self.kind(),
                self.pre_allocated_vus(),
                self.max_vus()
            ),
            ExecutorPolicy::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                ..
            } => {
                write!(
                    f,
                    "{} start={start_rate}/{time_unit:?} stages=[",
                    self.kind()
                )?;
                for (i, stage) in stages.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}@{:?}", stage.target, stage.duration)?;
                }
                write!(f, "] vus={}..{}", self.pre_allocated_vus(), self.max_vus())
            }
            ExecutorPolicy::ConstantVus { vus, duration } => {
                write!(f, "{} vus={vus} duration={duration:?}", self.kind())
            }
        }
    }
}
