//! Stress scenarios replayed against every parking policy.

use chrono::{Duration, NaiveDateTime, Timelike};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::simulator::{HallCall, SimulationParams};

pub const STRESS_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    Base,
    /// Resample calls with replacement up to `factor` times the base volume.
    Scale { factor: f64 },
    /// Burst of lobby calls spread evenly, starting 5 minutes into the quietest hour.
    ShockBurst { calls: usize, minutes: i64 },
    /// Slower cars: travel and door times multiplied by `factor`.
    SlowerKinematics { factor: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSpec {
    pub name: String,
    pub scenario: Scenario,
}

pub fn default_scenarios() -> Vec<ScenarioSpec> {
    let spec = |name: &str, scenario| ScenarioSpec {
        name: name.to_string(),
        scenario,
    };
    vec![
        spec("base", Scenario::Base),
        spec("scale_1p2", Scenario::Scale { factor: 1.2 }),
        spec("scale_1p5", Scenario::Scale { factor: 1.5 }),
        spec("shock_burst", Scenario::ShockBurst { calls: 120, minutes: 10 }),
        spec("params_plus20", Scenario::SlowerKinematics { factor: 1.2 }),
    ]
}

/// Calls and parameters for one scenario. Seeded, so repeated calls agree.
pub fn apply_scenario(
    scenario: &Scenario,
    calls: &[HallCall],
    params: &SimulationParams,
    seed: u64,
) -> (Vec<HallCall>, SimulationParams) {
    let mut out_params = params.clone();
    let out_calls = match scenario {
        Scenario::Base => calls.to_vec(),
        Scenario::Scale { factor } => scale_calls(calls, *factor, seed),
        Scenario::ShockBurst { calls: n, minutes } => {
            inject_shock(calls, params.lobby_floor, *n, *minutes)
        }
        Scenario::SlowerKinematics { factor } => {
            out_params.seconds_per_floor *= factor;
            out_params.door_time_s *= factor;
            calls.to_vec()
        }
    };
    info!(
        "Scenario {:?}: {} calls (base {})",
        scenario,
        out_calls.len(),
        calls.len()
    );
    (out_calls, out_params)
}

/// Up-scaling appends resampled calls jittered by 0-59 s; down-scaling subsamples.
pub fn scale_calls(calls: &[HallCall], factor: f64, seed: u64) -> Vec<HallCall> {
    if calls.is_empty() {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out: Vec<HallCall> = if factor <= 1.0 {
        let keep = ((calls.len() as f64 * factor) as usize).max(1);
        let mut idx: Vec<usize> = (0..calls.len()).collect();
        for i in 0..keep {
            let j = rng.gen_range(i..idx.len());
            idx.swap(i, j);
        }
        idx[..keep].iter().map(|&i| calls[i]).collect()
    } else {
        let extra = (calls.len() as f64 * (factor - 1.0)) as usize;
        let mut out = calls.to_vec();
        for _ in 0..extra {
            let mut call = calls[rng.gen_range(0..calls.len())];
            call.time += Duration::seconds(rng.gen_range(0..60));
            out.push(call);
        }
        out
    };
    out.sort_by_key(|c| c.time);
    out
}

/// Start of the hour with the fewest calls (earliest on ties).
pub fn quietest_hour(calls: &[HallCall]) -> Option<NaiveDateTime> {
    let mut per_hour: BTreeMap<NaiveDateTime, usize> = BTreeMap::new();
    for c in calls {
        let hour = c.time.date().and_hms_opt(c.time.hour(), 0, 0)?;
        *per_hour.entry(hour).or_insert(0) += 1;
    }
    per_hour
        .into_iter()
        .min_by_key(|&(hour, n)| (n, hour))
        .map(|(hour, _)| hour)
}

pub fn inject_shock(calls: &[HallCall], floor: i32, n: usize, minutes: i64) -> Vec<HallCall> {
    let mut out = calls.to_vec();
    let Some(hour) = quietest_hour(calls) else {
        return out;
    };
    let start = hour + Duration::minutes(5);
    let span_ms = minutes * 60_000;
    for i in 0..n {
        // Evenly spaced, both ends included.
        let offset = if n > 1 { span_ms * i as i64 / (n as i64 - 1) } else { 0 };
        out.push(HallCall {
            time: start + Duration::milliseconds(offset),
            floor,
        });
    }
    out.sort_by_key(|c| c.time);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn call(h: u32, m: u32, floor: i32) -> HallCall {
        HallCall {
            time: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap().and_hms_opt(h, m, 0).unwrap(),
            floor,
        }
    }

    fn params() -> SimulationParams {
        SimulationParams {
            n_elevators: 4,
            lobby_floor: 1,
            seconds_per_floor: 1.5,
            door_time_s: 8.0,
            long_wait_threshold_s: 60.0,
        }
    }

    #[test]
    fn test_scale_is_seeded_and_sized() {
        let calls: Vec<HallCall> = (0..50).map(|i| call(8, i % 60, (i % 7) as i32 + 1)).collect();
        let a = scale_calls(&calls, 1.5, STRESS_SEED);
        let b = scale_calls(&calls, 1.5, STRESS_SEED);
        assert_eq!(a.len(), 75);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(scale_calls(&calls, 0.5, STRESS_SEED).len(), 25);
    }

    #[test]
    fn test_shock_lands_in_quietest_hour() {
        let calls = vec![call(8, 0, 3), call(8, 10, 4), call(9, 0, 2), call(10, 5, 5), call(10, 6, 5)];
        assert_eq!(quietest_hour(&calls), Some(call(9, 0, 0).time));
        let shocked = inject_shock(&calls, 1, 120, 10);
        assert_eq!(shocked.len(), 125);
        let burst: Vec<&HallCall> = shocked
            .iter()
            .filter(|c| c.floor == 1)
            .collect();
        assert_eq!(burst.len(), 120);
        assert_eq!(burst[0].time, call(9, 5, 0).time);
        assert_eq!(burst[119].time, call(9, 15, 0).time);
    }

    #[test]
    fn test_slower_kinematics_scales_params() {
        let (calls, p) = apply_scenario(
            &Scenario::SlowerKinematics { factor: 1.2 },
            &[call(8, 0, 2)],
            &params(),
            STRESS_SEED,
        );
        assert_eq!(calls.len(), 1);
        assert!((p.seconds_per_floor - 1.8).abs() < 1e-12);
        assert!((p.door_time_s - 9.6).abs() < 1e-12);
    }

    #[test]
    fn test_default_scenarios() {
        let names: Vec<String> = default_scenarios().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec!["base", "scale_1p2", "scale_1p5", "shock_burst", "params_plus20"]
        );
    }
}
