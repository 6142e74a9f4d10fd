use chrono::{Duration, NaiveDateTime};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::classifier::StateClassifier;
use crate::config::{BuildingConfig, SimulationConfig};
use crate::models::{EventKind, EventRecord, FeatureVector, TrafficState};
use crate::optimizer::ParkingOptimizer;
use crate::profile::FloorDemandProfile;
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Idle cars stay at their last stop.
    NoReposition,
    /// Idle cars return to the lobby at every epoch.
    AlwaysLobby,
    /// Idle cars follow the optimizer's parking plan.
    Dynamic,
}

impl Policy {
    pub const ALL: [Policy; 3] = [Policy::NoReposition, Policy::AlwaysLobby, Policy::Dynamic];

    pub fn label(self) -> &'static str {
        match self {
            Policy::NoReposition => "no_reposition",
            Policy::AlwaysLobby => "always_lobby",
            Policy::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationParams {
    pub n_elevators: usize,
    pub lobby_floor: i32,
    pub seconds_per_floor: f64,
    pub door_time_s: f64,
    pub long_wait_threshold_s: f64,
}

impl SimulationParams {
    pub fn from_config(sim: &SimulationConfig, building: &BuildingConfig) -> Self {
        Self {
            n_elevators: building.n_elevators,
            lobby_floor: building.lobby_floor,
            seconds_per_floor: sim.seconds_per_floor,
            door_time_s: sim.door_time_s,
            long_wait_threshold_s: sim.long_wait_threshold_s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HallCall {
    pub time: NaiveDateTime,
    pub floor: i32,
}

pub fn hall_calls(events: &[EventRecord]) -> Vec<HallCall> {
    let mut calls: Vec<HallCall> = events
        .iter()
        .filter(|e| e.kind == EventKind::HallCall)
        .map(|e| HallCall {
            time: e.timestamp,
            floor: e.floor,
        })
        .collect();
    calls.sort_by_key(|c| c.time);
    calls
}

/// Starting floor per simulated car: the last recorded stop at or before `start`.
/// Observed car ids are mapped onto simulated cars in ascending order; cars
/// without history start at the lobby.
pub fn initial_positions(
    events: &[EventRecord],
    start: NaiveDateTime,
    n_elevators: usize,
    lobby_floor: i32,
) -> Vec<i32> {
    let mut last_stop: BTreeMap<u32, (NaiveDateTime, i32)> = BTreeMap::new();
    for e in events {
        if e.kind != EventKind::CarStop || e.timestamp > start {
            continue;
        }
        if let Some(id) = e.car_id {
            let entry = last_stop.entry(id).or_insert((e.timestamp, e.floor));
            if e.timestamp >= entry.0 {
                *entry = (e.timestamp, e.floor);
            }
        }
    }
    let mut positions = vec![lobby_floor; n_elevators];
    for (slot, (_, (_, floor))) in positions.iter_mut().zip(last_stop.iter()) {
        *slot = *floor;
    }
    positions
}

#[derive(Debug, Clone)]
struct Car {
    id: u32,
    floor: i32,
    /// Seconds from the simulation origin at which the car is free.
    available: f64,
}

/// Per-policy aggregate over the whole replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicySummary {
    pub policy: Policy,
    pub calls: usize,
    pub awt_s: f64,
    pub p95_wait_s: f64,
    pub p99_wait_s: f64,
    pub max_wait_s: f64,
    /// Fraction of calls waiting longer than the threshold.
    pub long_wait_rate: f64,
    pub empty_travel_floors: u64,
    pub reposition_moves: u64,
    pub failed_epochs: usize,
    pub fallback_epochs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketOutcome {
    pub policy: Policy,
    pub bucket_start: NaiveDateTime,
    pub state: Option<TrafficState>,
    pub forecast: Option<f64>,
    pub calls: usize,
    pub mean_wait_s: Option<f64>,
    pub max_wait_s: Option<f64>,
    pub idle_cars: usize,
    pub moves: u32,
    pub empty_travel_floors: u32,
    pub plan_failed: bool,
}

#[derive(Debug, Clone)]
pub struct BacktestRun {
    pub summary: PolicySummary,
    pub buckets: Vec<BucketOutcome>,
}

/// Replays a bucket sequence and its hall calls under a parking policy.
/// Deterministic for fixed inputs.
#[derive(Clone)]
pub struct Backtest<'a> {
    features: &'a [FeatureVector],
    calls: Vec<HallCall>,
    initial_positions: Vec<i32>,
    classifier: &'a dyn StateClassifier,
    profile: &'a FloorDemandProfile,
    optimizer: &'a ParkingOptimizer,
    forecasts: Option<&'a [Option<f64>]>,
    params: SimulationParams,
    bucket_minutes: u32,
}

impl<'a> Backtest<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        features: &'a [FeatureVector],
        events: &[EventRecord],
        classifier: &'a dyn StateClassifier,
        profile: &'a FloorDemandProfile,
        optimizer: &'a ParkingOptimizer,
        params: SimulationParams,
        bucket_minutes: u32,
    ) -> Self {
        let start = features.first().map(|f| f.bucket_start);
        let initial_positions = match start {
            Some(s) => initial_positions(events, s, params.n_elevators, params.lobby_floor),
            None => vec![params.lobby_floor; params.n_elevators],
        };
        Self {
            features,
            calls: hall_calls(events),
            initial_positions,
            classifier,
            profile,
            optimizer,
            forecasts: None,
            params,
            bucket_minutes,
        }
    }

    /// Forecast per bucket, aligned with `features`.
    pub fn with_forecasts(mut self, forecasts: &'a [Option<f64>]) -> Self {
        self.forecasts = Some(forecasts);
        self
    }

    pub fn with_calls(mut self, mut calls: Vec<HallCall>) -> Self {
        calls.sort_by_key(|c| c.time);
        self.calls = calls;
        self
    }

    pub fn with_params(mut self, params: SimulationParams) -> Self {
        self.initial_positions
            .resize(params.n_elevators, params.lobby_floor);
        self.params = params;
        self
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn calls(&self) -> &[HallCall] {
        &self.calls
    }

    /// Replayed interval `[origin, end)`, one bucket width per feature vector.
    pub fn window(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let origin = self.features.first()?.bucket_start;
        let width = Duration::minutes(self.bucket_minutes as i64);
        Some((origin, origin + width * self.features.len() as i32))
    }

    /// Hall calls falling inside [`Backtest::window`].
    pub fn window_calls(&self) -> &[HallCall] {
        let Some((origin, end)) = self.window() else {
            return &[];
        };
        let from = self.calls.partition_point(|c| c.time < origin);
        let to = self.calls.partition_point(|c| c.time < end);
        &self.calls[from..to]
    }

    pub fn run_all(&self) -> Vec<BacktestRun> {
        Policy::ALL.iter().map(|&p| self.run(p)).collect()
    }

    pub fn run(&self, policy: Policy) -> BacktestRun {
        let Some((origin, _)) = self.window() else {
            return BacktestRun {
                summary: summarise(policy, &[], &self.params, 0, 0, 0, 0),
                buckets: Vec::new(),
            };
        };
        let width_s = self.bucket_minutes as f64 * 60.0;
        let secs = |ts: NaiveDateTime| (ts - origin).num_milliseconds() as f64 / 1000.0;

        let mut cars: Vec<Car> = self
            .initial_positions
            .iter()
            .enumerate()
            .map(|(i, &floor)| Car {
                id: i as u32,
                floor,
                available: 0.0,
            })
            .collect();

        let mut buckets: Vec<BucketOutcome> = self
            .features
            .iter()
            .enumerate()
            .map(|(t, fv)| BucketOutcome {
                policy,
                bucket_start: fv.bucket_start,
                // The state acted on at epoch t comes from the last completed bucket.
                state: t
                    .checked_sub(1)
                    .map(|prev| self.classifier.classify(&self.features[prev])),
                forecast: self.forecasts.and_then(|f| f.get(t).copied().flatten()),
                calls: 0,
                mean_wait_s: None,
                max_wait_s: None,
                idle_cars: 0,
                moves: 0,
                empty_travel_floors: 0,
                plan_failed: false,
            })
            .collect();
        let mut bucket_waits: Vec<Vec<f64>> = vec![Vec::new(); buckets.len()];

        let mut waits = Vec::with_capacity(self.calls.len());
        let (mut failed, mut fallbacks, mut moves, mut empty_travel) = (0usize, 0usize, 0u64, 0u64);
        let mut next_epoch = 0usize;

        let mut run_epoch = |t: usize, cars: &mut Vec<Car>, bucket: &mut BucketOutcome| {
            let now = t as f64 * width_s;
            let outcome = self.reposition(policy, bucket, now, cars);
            bucket.moves = outcome.moves;
            bucket.empty_travel_floors = outcome.floors;
            moves += outcome.moves as u64;
            empty_travel += outcome.floors as u64;
            failed += outcome.failed as usize;
            fallbacks += outcome.fallback as usize;
        };

        for call in self.window_calls() {
            let call_s = secs(call.time);
            while next_epoch < buckets.len() && next_epoch as f64 * width_s <= call_s {
                run_epoch(next_epoch, &mut cars, &mut buckets[next_epoch]);
                next_epoch += 1;
            }

            let mut best: Option<(usize, f64)> = None;
            for (i, car) in cars.iter().enumerate() {
                let arrival = car.available.max(call_s) + self.travel_time(car.floor, call.floor);
                if best.map_or(true, |(_, b)| arrival < b) {
                    best = Some((i, arrival));
                }
            }
            let Some((i, arrival)) = best else {
                continue;
            };
            let wait = arrival - call_s;
            cars[i].floor = call.floor;
            cars[i].available = arrival + self.params.door_time_s;

            waits.push(wait);
            let b = ((call_s / width_s).floor() as usize).min(buckets.len() - 1);
            bucket_waits[b].push(wait);
        }
        while next_epoch < buckets.len() {
            run_epoch(next_epoch, &mut cars, &mut buckets[next_epoch]);
            next_epoch += 1;
        }

        for (bucket, w) in buckets.iter_mut().zip(&bucket_waits) {
            bucket.calls = w.len();
            bucket.mean_wait_s = stats::mean(w);
            bucket.max_wait_s = w.iter().copied().reduce(f64::max);
        }

        let summary = summarise(
            policy,
            &waits,
            &self.params,
            empty_travel,
            moves,
            failed,
            fallbacks,
        );
        info!(
            "{}: {} calls, AWT {:.2}s, P95 {:.2}s, long-wait {:.2}%, {} failed epochs",
            policy,
            summary.calls,
            summary.awt_s,
            summary.p95_wait_s,
            summary.long_wait_rate * 100.0,
            summary.failed_epochs
        );
        BacktestRun { summary, buckets }
    }

    fn travel_time(&self, from: i32, to: i32) -> f64 {
        (from - to).unsigned_abs() as f64 * self.params.seconds_per_floor
    }

    fn reposition(
        &self,
        policy: Policy,
        bucket: &mut BucketOutcome,
        now: f64,
        cars: &mut [Car],
    ) -> EpochOutcome {
        let mut outcome = EpochOutcome::default();
        let idle: Vec<usize> = (0..cars.len()).filter(|&i| cars[i].available <= now).collect();
        bucket.idle_cars = idle.len();
        if idle.is_empty() {
            return outcome;
        }

        let targets: Vec<(usize, i32)> = match policy {
            Policy::NoReposition => return outcome,
            Policy::AlwaysLobby => idle
                .iter()
                .map(|&i| (i, self.params.lobby_floor))
                .collect(),
            Policy::Dynamic => {
                let Some(state) = bucket.state else {
                    return outcome;
                };
                let idle_pairs: Vec<(u32, i32)> =
                    idle.iter().map(|&i| (cars[i].id, cars[i].floor)).collect();
                match self.optimizer.plan(state, &idle_pairs, self.profile) {
                    Ok(plan) => {
                        outcome.fallback = plan.fallback;
                        plan.assignments
                            .iter()
                            .map(|a| (a.elevator_id as usize, a.target_floor))
                            .collect()
                    }
                    Err(e) => {
                        warn!("Epoch {} skipped ({}): {}", bucket.bucket_start, state, e);
                        bucket.plan_failed = true;
                        outcome.failed = true;
                        return outcome;
                    }
                }
            }
        };

        for (i, target) in targets {
            let car = &mut cars[i];
            if car.floor == target {
                continue;
            }
            let distance = (car.floor - target).unsigned_abs();
            car.available = now + distance as f64 * self.params.seconds_per_floor;
            car.floor = target;
            outcome.moves += 1;
            outcome.floors += distance;
        }
        debug!(
            "{} epoch {}: {} moves, {} floors",
            policy, bucket.bucket_start, outcome.moves, outcome.floors
        );
        outcome
    }
}

#[derive(Debug, Default)]
struct EpochOutcome {
    moves: u32,
    floors: u32,
    failed: bool,
    fallback: bool,
}

fn summarise(
    policy: Policy,
    waits: &[f64],
    params: &SimulationParams,
    empty_travel: u64,
    moves: u64,
    failed: usize,
    fallbacks: usize,
) -> PolicySummary {
    let long = waits
        .iter()
        .filter(|&&w| w > params.long_wait_threshold_s)
        .count();
    PolicySummary {
        policy,
        calls: waits.len(),
        awt_s: stats::mean(waits).unwrap_or(f64::NAN),
        p95_wait_s: stats::quantile(waits, 0.95).unwrap_or(f64::NAN),
        p99_wait_s: stats::quantile(waits, 0.99).unwrap_or(f64::NAN),
        max_wait_s: waits.iter().copied().reduce(f64::max).unwrap_or(f64::NAN),
        long_wait_rate: if waits.is_empty() {
            0.0
        } else {
            long as f64 / waits.len() as f64
        },
        empty_travel_floors: empty_travel,
        reposition_moves: moves,
        failed_epochs: failed,
        fallback_epochs: fallbacks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 4).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_initial_positions_from_last_stop() {
        let events = vec![
            EventRecord::car_stop(at(7, 0, 0), 4, 11),
            EventRecord::car_stop(at(7, 30, 0), 9, 11),
            EventRecord::car_stop(at(7, 10, 0), 3, 12),
            // after the start, ignored
            EventRecord::car_stop(at(9, 0, 0), 2, 12),
            EventRecord::hall_call(at(7, 0, 0), 6, Direction::Up),
        ];
        let positions = initial_positions(&events, at(8, 0, 0), 3, 1);
        assert_eq!(positions, vec![9, 3, 1]);
    }

    #[test]
    fn test_summary_long_wait_is_strict() {
        let params = SimulationParams {
            n_elevators: 1,
            lobby_floor: 1,
            seconds_per_floor: 1.0,
            door_time_s: 0.0,
            long_wait_threshold_s: 60.0,
        };
        let s = summarise(Policy::Dynamic, &[10.0, 60.0, 61.0, 5.0], &params, 0, 0, 0, 0);
        assert_eq!(s.calls, 4);
        assert_eq!(s.long_wait_rate, 0.25);
        assert_eq!(s.max_wait_s, 61.0);
        assert_eq!(s.awt_s, 34.0);
    }

    #[test]
    fn test_policy_labels() {
        let labels: Vec<&str> = Policy::ALL.iter().map(|p| p.label()).collect();
        assert_eq!(labels, vec!["no_reposition", "always_lobby", "dynamic"]);
    }
}
