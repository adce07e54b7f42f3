use std::time::Duration;

use crate::policy::{ExecutorPolicy, Stage};

/// The offsets from scenario start at which an open model scenario starts iterations.
///
/// Offsets are computed lazily and are non-decreasing. Every offset is strictly less than the
/// policy duration.
#[derive(Debug, Clone)]
pub(crate) enum ArrivalSchedule {
    Constant(ConstantArrivals),
    Ramping(RampingArrivals),
}

impl ArrivalSchedule {
    /// `None` for closed model policies.
    pub(crate) fn for_policy(policy: &ExecutorPolicy) -> Option<Self> {
        match policy {
            ExecutorPolicy::ConstantArrivalRate {
                rate,
                time_unit,
                duration,
                ..
            } => Some(ArrivalSchedule::Constant(ConstantArrivals::new(
                *rate, *time_unit, *duration,
            ))),
            ExecutorPolicy::RampingArrivalRate {
                start_rate,
                time_unit,
                stages,
                ..
            } => Some(ArrivalSchedule::Ramping(RampingArrivals::new(
                *start_rate,
                *time_unit,
                stages,
            ))),
            ExecutorPolicy::ConstantVus { .. } => None,
        }
    }
}

impl Iterator for ArrivalSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ArrivalSchedule::Constant(arrivals) => arrivals.next(),
            ArrivalSchedule::Ramping(arrivals) => arrivals.next(),
        }
    }
}

/// Arrival `k` is at `k * time_unit / rate` while that is before the end of the duration.
#[derive(Debug, Clone)]
pub(crate) struct ConstantArrivals {
    rate: f64,
    time_unit_secs: f64,
    duration_secs: f64,
    next: u64,
}

impl ConstantArrivals {
    fn new(rate: f64, time_unit: Duration, duration: Duration) -> Self {
        Self {
            rate,
            time_unit_secs: time_unit.as_secs_f64(),
            duration_secs: duration.as_secs_f64(),
            next: 0,
        }
    }
}

impl Iterator for ConstantArrivals {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rate <= 0.0 {
            return None;
        }

        let offset = self.next as f64 * self.time_unit_secs / self.rate;
        if offset >= self.duration_secs {
            return None;
        }

        self.next += 1;
        Some(Duration::from_secs_f64(offset))
    }
}

/// A stage with its rate in arrivals per second and its position on the timeline.
#[derive(Debug, Clone)]
struct Segment {
    start_secs: f64,
    duration_secs: f64,
    start_rate: f64,
    end_rate: f64,
    /// Expected arrivals before this segment starts
    arrivals_before: f64,
}

impl Segment {
    fn area(&self) -> f64 {
        (self.start_rate + self.end_rate) / 2.0 * self.duration_secs
    }
}

/// Arrivals for a piecewise linear rate curve.
///
/// With `N(t)` the integral of the rate from the scenario start, arrival `k` is at the latest `t`
/// where `N(t) <= k`. So the number of arrivals in any window matches the area under the curve
/// for that window, to within one.
#[derive(Debug, Clone)]
pub(crate) struct RampingArrivals {
    segments: Vec<Segment>,
    total_arrivals: f64,
    current_segment: usize,
    next: u64,
}

impl RampingArrivals {
    fn new(start_rate: f64, time_unit: Duration, stages: &[Stage]) -> Self {
        let per_second = 1.0 / time_unit.as_secs_f64();

        let mut segments = Vec::with_capacity(stages.len());
        let mut start_secs = 0.0;
        let mut arrivals_before = 0.0;
        let mut rate = start_rate * per_second;
        for stage in stages {
            let segment = Segment {
                start_secs,
                duration_secs: stage.duration.as_secs_f64(),
                start_rate: rate,
                end_rate: stage.target * per_second,
                arrivals_before,
            };

            start_secs += segment.duration_secs;
            arrivals_before += segment.area();
            rate = segment.end_rate;
            segments.push(segment);
        }

        Self {
            segments,
            total_arrivals: arrivals_before,
            current_segment: 0,
            next: 0,
        }
    }
}

impl Iterator for RampingArrivals {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let k = self.next as f64;
        if k >= self.total_arrivals {
            return None;
        }

        // Arrivals are in order so the segment only ever moves forwards. Segments that end with
        // `N <= k` cannot hold arrival `k`, which also skips segments with a zero rate.
        while let Some(segment) = self.segments.get(self.current_segment) {
            if segment.arrivals_before + segment.area() > k {
                break;
            }
            self.current_segment += 1;
        }
        let segment = self.segments.get(self.current_segment)?;

        // Solve `a*s^2 + b*s = delta` for the time `s` into the segment, in the form that stays
        // stable when `a` is zero.
        let delta = k - segment.arrivals_before;
        let offset_secs = if delta <= 0.0 {
            0.0
        } else {
            let a = (segment.end_rate - segment.start_rate) / (2.0 * segment.duration_secs);
            let b = segment.start_rate;
            let discriminant = (b * b + 4.0 * a * delta).max(0.0);
            let s = 2.0 * delta / (b + discriminant.sqrt());
            s.clamp(0.0, segment.duration_secs)
        };

        self.next += 1;
        Some(Duration::from_secs_f64(segment.start_secs + offset_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(policy: ExecutorPolicy) -> Vec<Duration> {
        ArrivalSchedule::for_policy(&policy).unwrap().collect()
    }

    #[test]
    fn constant_rate_count_is_rate_times_duration() {
        let cases = [
            (5.0, Duration::from_secs(10)),
            (3.0, Duration::from_millis(10_100)),
            (0.7, Duration::from_secs(9)),
            (100.0, Duration::from_millis(1_234)),
        ];

        for (rate, duration) in cases {
            let count = offsets(ExecutorPolicy::constant_arrival_rate(rate, duration, 1)).len();
            let expected = rate * duration.as_secs_f64();
            assert!(
                (count as f64 - expected).abs() <= 1.0,
                "rate {rate} over {duration:?} gave {count} arrivals"
            );
        }
    }

    #[test]
    fn constant_rate_is_evenly_spaced() {
        let offsets = offsets(ExecutorPolicy::constant_arrival_rate(
            5.0,
            Duration::from_secs(2),
            1,
        ));
        assert_eq!(10, offsets.len());
        for (k, offset) in offsets.iter().enumerate() {
            assert!((offset.as_secs_f64() - k as f64 * 0.2).abs() < 1e-9);
        }
    }

    #[test]
    fn constant_rate_honours_time_unit() {
        let policy = ExecutorPolicy::constant_arrival_rate(30.0, Duration::from_secs(120), 1)
            .with_time_unit(Duration::from_secs(60));
        assert_eq!(60, offsets(policy).len());
    }

    #[test]
    fn zero_rate_has_no_arrivals() {
        assert!(offsets(ExecutorPolicy::constant_arrival_rate(
            0.0,
            Duration::from_secs(10),
            1
        ))
        .is_empty());
        assert!(offsets(ExecutorPolicy::ramping_arrival_rate(
            0.0,
            vec![Stage::new(0.0, Duration::from_secs(10))],
            1
        ))
        .is_empty());
    }

    #[test]
    fn ramping_count_matches_integral() {
        // 0 -> 10 over 10s, hold 10 for 10s, 10 -> 0 over 5s: 50 + 100 + 25 arrivals.
        let offsets = offsets(ExecutorPolicy::ramping_arrival_rate(
            0.0,
            vec![
                Stage::new(10.0, Duration::from_secs(10)),
                Stage::new(10.0, Duration::from_secs(10)),
                Stage::new(0.0, Duration::from_secs(5)),
            ],
            1,
        ));

        assert_eq!(175, offsets.len());
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        assert!(offsets.iter().all(|o| *o < Duration::from_secs(25)));

        let in_first_stage = offsets
            .iter()
            .filter(|o| **o < Duration::from_secs(10))
            .count();
        assert_eq!(50, in_first_stage);
    }

    #[test]
    fn ramping_arrivals_follow_time_warp() {
        // Rate r(t) = t, so N(t) = t^2 / 2 and arrival k is at sqrt(2k).
        let offsets = offsets(ExecutorPolicy::ramping_arrival_rate(
            0.0,
            vec![Stage::new(10.0, Duration::from_secs(10))],
            1,
        ));

        for k in [0usize, 2, 8, 18, 32] {
            let expected = (2.0 * k as f64).sqrt();
            assert!(
                (offsets[k].as_secs_f64() - expected).abs() < 1e-6,
                "arrival {k} at {:?}, expected {expected}s",
                offsets[k]
            );
        }
    }

    #[test]
    fn ramping_skips_zero_rate_stage() {
        let offsets = offsets(ExecutorPolicy::ramping_arrival_rate(
            0.0,
            vec![
                Stage::new(0.0, Duration::from_secs(5)),
                Stage::new(4.0, Duration::from_secs(1)),
                Stage::new(4.0, Duration::from_secs(1)),
            ],
            1,
        ));

        assert_eq!(6, offsets.len());
        assert!(offsets[0] >= Duration::from_secs(5));
    }

    #[test]
    fn ramping_constant_stage_matches_constant_rate() {
        let ramping = offsets(ExecutorPolicy::ramping_arrival_rate(
            5.0,
            vec![Stage::new(5.0, Duration::from_secs(10))],
            1,
        ));
        let constant = offsets(ExecutorPolicy::constant_arrival_rate(
            5.0,
            Duration::from_secs(10),
            1,
        ));

        assert_eq!(constant.len(), ramping.len());
        for (r, c) in ramping.iter().zip(&constant) {
            assert!((r.as_secs_f64() - c.as_secs_f64()).abs() < 1e-9);
        }
    }

    #[test]
    fn closed_model_has_no_schedule() {
        assert!(ArrivalSchedule::for_policy(&ExecutorPolicy::constant_vus(
            1,
            Duration::from_secs(1)
        ))
        .is_none());
    }
}
