use log::{debug, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::config::ProfileFallback;
use crate::errors::OptimizerError;
use crate::models::{FloorRange, TrafficState};
use crate::profile::FloorDemandProfile;

const COST_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub elevator_id: u32,
    pub from_floor: i32,
    pub target_floor: i32,
}

/// Target floors and elevator assignment for one decision epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingPlan {
    pub source_state: TrafficState,
    pub targets: Vec<i32>,
    pub assignments: Vec<Assignment>,
    /// Weighted distance of the chosen targets under the weights used.
    pub cost: f64,
    /// Set when uniform weights replaced a missing profile.
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct ParkingOptimizer {
    range: FloorRange,
    fallback: ProfileFallback,
}

impl ParkingOptimizer {
    pub fn new(range: FloorRange, fallback: ProfileFallback) -> Self {
        Self { range, fallback }
    }

    pub fn range(&self) -> FloorRange {
        self.range
    }

    /// Plan for `idle` elevators, given as `(elevator_id, current_floor)`.
    pub fn plan(
        &self,
        state: TrafficState,
        idle: &[(u32, i32)],
        profile: &FloorDemandProfile,
    ) -> Result<ParkingPlan, OptimizerError> {
        if self.range.is_empty() {
            return Err(OptimizerError::EmptyFloorRange {
                min: self.range.min,
                max: self.range.max,
            });
        }

        let (weights, fallback) = match profile.weights(state) {
            Some(w) => (w.clone(), false),
            None => match self.fallback {
                ProfileFallback::Fail => return Err(OptimizerError::NoProfile(state)),
                ProfileFallback::Uniform => {
                    warn!("No floor-demand profile for {}; using uniform weights", state);
                    (self.range.floors().map(|f| (f, 1.0)).collect(), true)
                }
            },
        };

        for &(_, floor) in idle {
            self.check_floor(floor)?;
        }

        let (targets, cost) = select_targets(&weights, self.range, idle.len())?;
        let assignments = assign_greedy(idle, &targets);
        debug!(
            "Plan for {}: targets {:?}, cost {:.4}{}",
            state,
            targets,
            cost,
            if fallback { " (uniform fallback)" } else { "" }
        );

        Ok(ParkingPlan {
            source_state: state,
            targets,
            assignments,
            cost,
            fallback,
        })
    }

    fn check_floor(&self, floor: i32) -> Result<(), OptimizerError> {
        if self.range.contains(floor) {
            Ok(())
        } else {
            Err(OptimizerError::FloorOutOfRange {
                floor,
                min: self.range.min,
                max: self.range.max,
            })
        }
    }
}

/// Weighted 1-D k-median over every floor in `range`, solved exactly by
/// dynamic programming over contiguous floor segments.
///
/// Equal-cost solutions are broken toward the building's geometric centre.
pub fn select_targets(
    weights: &BTreeMap<i32, f64>,
    range: FloorRange,
    k: usize,
) -> Result<(Vec<i32>, f64), OptimizerError> {
    if range.is_empty() {
        return Err(OptimizerError::EmptyFloorRange {
            min: range.min,
            max: range.max,
        });
    }
    for &floor in weights.keys() {
        if !range.contains(floor) {
            return Err(OptimizerError::FloorOutOfRange {
                floor,
                min: range.min,
                max: range.max,
            });
        }
    }
    let n = range.len();
    if k > n {
        return Err(OptimizerError::TooManyElevators { k, floors: n });
    }
    if k == 0 {
        return Ok((Vec::new(), 0.0));
    }

    let floors: Vec<i32> = range.floors().collect();
    let w: Vec<f64> = floors
        .iter()
        .map(|f| weights.get(f).copied().unwrap_or(0.0).max(0.0))
        .collect();
    let center = range.center();
    let segments = SegmentTable::new(&floors, &w, center);

    // dp[c][j]: best (cost, centre distance) covering floors[..j] with c targets.
    let inf = (f64::INFINITY, f64::INFINITY);
    let mut dp = vec![vec![inf; n + 1]; k + 1];
    let mut cut = vec![vec![0usize; n + 1]; k + 1];
    dp[0][0] = (0.0, 0.0);
    for c in 1..=k {
        for j in c..=n {
            let mut best = inf;
            let mut best_i = c - 1;
            for i in (c - 1)..j {
                let prev = dp[c - 1][i];
                if !prev.0.is_finite() {
                    continue;
                }
                let seg = segments.get(i, j - 1);
                let cand = (prev.0 + seg.cost, prev.1 + seg.center_distance);
                if better(cand, best) {
                    best = cand;
                    best_i = i;
                }
            }
            dp[c][j] = best;
            cut[c][j] = best_i;
        }
    }

    let mut targets = Vec::with_capacity(k);
    let mut j = n;
    for c in (1..=k).rev() {
        let i = cut[c][j];
        targets.push(floors[segments.get(i, j - 1).median]);
        j = i;
    }
    targets.sort_unstable();
    Ok((targets, dp[k][n].0))
}

fn better(a: (f64, f64), b: (f64, f64)) -> bool {
    if a.0 < b.0 - COST_EPS {
        true
    } else if (a.0 - b.0).abs() <= COST_EPS {
        a.1 < b.1 - 1e-12
    } else {
        false
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    cost: f64,
    center_distance: f64,
    median: usize,
}

/// Best single target for every contiguous run of floors.
struct SegmentTable {
    n: usize,
    cells: Vec<Segment>,
}

impl SegmentTable {
    fn new(floors: &[i32], w: &[f64], center: f64) -> Self {
        let n = floors.len();
        let mut pw = vec![0.0; n + 1];
        let mut pwx = vec![0.0; n + 1];
        for i in 0..n {
            pw[i + 1] = pw[i] + w[i];
            pwx[i + 1] = pwx[i] + w[i] * floors[i] as f64;
        }
        // sum over [a, b) of w_f * |f - p|
        let cost_at = |a: usize, b: usize, p: usize| {
            let x = floors[p] as f64;
            let left = x * (pw[p + 1] - pw[a]) - (pwx[p + 1] - pwx[a]);
            let right = (pwx[b] - pwx[p + 1]) - x * (pw[b] - pw[p + 1]);
            left + right
        };

        let mut cells = vec![
            Segment {
                cost: 0.0,
                center_distance: 0.0,
                median: 0
            };
            n * n
        ];
        for i in 0..n {
            for j in i..n {
                let mut best = (f64::INFINITY, f64::INFINITY);
                let mut median = i;
                for p in i..=j {
                    let cand = (cost_at(i, j + 1, p), (floors[p] as f64 - center).abs());
                    if better(cand, best) {
                        best = cand;
                        median = p;
                    }
                }
                cells[i * n + j] = Segment {
                    cost: best.0.max(0.0),
                    center_distance: best.1,
                    median,
                };
            }
        }
        Self { n, cells }
    }

    fn get(&self, i: usize, j: usize) -> Segment {
        self.cells[i * self.n + j]
    }
}

/// Greedy nearest-first matching: `(elevator, target)` pairs sorted by distance,
/// then elevator id, then target floor; pairs touching a claimed elevator or
/// target are skipped.
pub fn assign_greedy(idle: &[(u32, i32)], targets: &[i32]) -> Vec<Assignment> {
    let mut pairs: Vec<(u32, u32, i32, usize, i32)> = Vec::with_capacity(idle.len() * targets.len());
    for &(id, from) in idle {
        for (t_idx, &target) in targets.iter().enumerate() {
            pairs.push(((from - target).unsigned_abs(), id, target, t_idx, from));
        }
    }
    pairs.sort_by_key(|&(dist, id, target, t_idx, _)| (dist, id, target, t_idx));

    let mut used_elevators: HashSet<u32> = HashSet::new();
    let mut used_targets: HashSet<usize> = HashSet::new();
    let mut assignments = Vec::with_capacity(idle.len().min(targets.len()));
    for (_, id, target, t_idx, from) in pairs {
        if used_elevators.contains(&id) || used_targets.contains(&t_idx) {
            continue;
        }
        used_elevators.insert(id);
        used_targets.insert(t_idx);
        assignments.push(Assignment {
            elevator_id: id,
            from_floor: from,
            target_floor: target,
        });
    }
    assignments.sort_by_key(|a| a.elevator_id);
    assignments
}
