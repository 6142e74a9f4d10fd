use chrono::{Duration, NaiveDateTime};
use log::{debug, info};
use std::collections::HashMap;

use super::{target_time, DemandForecaster, Forecast};
use crate::errors::ForecastError;
use crate::features::{day_slot, is_weekend};
use crate::models::FeatureVector;

/// Mean count per (weekend flag, day slot). Unseen cells predict 0.
#[derive(Debug, Clone, Default)]
pub struct SeasonalBaseline {
    bucket_minutes: u32,
    means: HashMap<(bool, u32), f64>,
}

impl SeasonalBaseline {
    pub fn new(bucket_minutes: u32) -> Self {
        Self {
            bucket_minutes,
            means: HashMap::new(),
        }
    }

    pub fn fit(&mut self, train: &[FeatureVector]) {
        let mut sums: HashMap<(bool, u32), (f64, usize)> = HashMap::new();
        for fv in train {
            let cell = sums.entry((fv.is_weekend, fv.slot)).or_insert((0.0, 0));
            cell.0 += fv.count as f64;
            cell.1 += 1;
        }
        self.means = sums
            .into_iter()
            .map(|(key, (sum, n))| (key, sum / n as f64))
            .collect();
        debug!("Seasonal baseline fitted with {} cells", self.means.len());
    }

    pub fn value_at(&self, ts: NaiveDateTime) -> f64 {
        self.means
            .get(&(is_weekend(ts), day_slot(ts, self.bucket_minutes)))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn bucket_minutes(&self) -> u32 {
        self.bucket_minutes
    }
}

/// Seasonal baseline plus an AR(1) on the residual, with one persistence
/// coefficient per day type.
#[derive(Debug, Clone)]
pub struct BaselineAr {
    baseline: SeasonalBaseline,
    horizon: usize,
    phi_weekday: f64,
    phi_weekend: f64,
    residual_std: Option<f64>,
}

impl BaselineAr {
    pub fn new(bucket_minutes: u32, horizon: usize) -> Self {
        Self {
            baseline: SeasonalBaseline::new(bucket_minutes),
            horizon: horizon.max(1),
            phi_weekday: 0.0,
            phi_weekend: 0.0,
            residual_std: None,
        }
    }

    pub fn phi(&self, weekend: bool) -> f64 {
        if weekend {
            self.phi_weekend
        } else {
            self.phi_weekday
        }
    }

    pub fn baseline(&self) -> &SeasonalBaseline {
        &self.baseline
    }

    fn residual(&self, fv: &FeatureVector) -> f64 {
        fv.count as f64 - self.baseline.value_at(fv.bucket_start)
    }
}

impl DemandForecaster for BaselineAr {
    fn name(&self) -> &'static str {
        "baseline_ar"
    }

    fn fit(&mut self, train: &[FeatureVector]) -> Result<(), ForecastError> {
        if train.is_empty() {
            return Err(ForecastError::EmptyTrainingSet);
        }
        self.baseline.fit(train);

        let step = Duration::minutes(self.baseline.bucket_minutes() as i64);
        // (sum d_{t-1} d_t, sum d_{t-1}^2) per day type
        let mut acc = [(0.0f64, 0.0f64); 2];
        let mut pairs: Vec<(f64, f64, bool)> = Vec::new();
        for w in train.windows(2) {
            let (prev, cur) = (&w[0], &w[1]);
            if cur.bucket_start - prev.bucket_start != step || prev.is_weekend != cur.is_weekend {
                continue;
            }
            let (d_prev, d_cur) = (self.residual(prev), self.residual(cur));
            let slot = &mut acc[cur.is_weekend as usize];
            slot.0 += d_prev * d_cur;
            slot.1 += d_prev * d_prev;
            pairs.push((d_prev, d_cur, cur.is_weekend));
        }

        let solve = |(num, den): (f64, f64)| if den > 0.0 { num / den } else { 0.0 };
        self.phi_weekday = solve(acc[0]);
        self.phi_weekend = solve(acc[1]);

        if !pairs.is_empty() {
            let sse: f64 = pairs
                .iter()
                .map(|&(d_prev, d_cur, weekend)| (d_cur - self.phi(weekend) * d_prev).powi(2))
                .sum();
            self.residual_std = Some((sse / pairs.len() as f64).sqrt());
        }

        info!(
            "AR(1) fitted on {} buckets: phi_weekday={:.4}, phi_weekend={:.4}",
            train.len(),
            self.phi_weekday,
            self.phi_weekend
        );
        Ok(())
    }

    fn forecast(&self, history: &[FeatureVector]) -> Forecast {
        let Some(last) = history.last() else {
            return Forecast::InsufficientHistory {
                required: self.min_history(),
                available: 0,
            };
        };
        let target = target_time(last.bucket_start, self.horizon, self.baseline.bucket_minutes());
        let persistence = self.phi(last.is_weekend).powi(self.horizon as i32);
        let value = self.baseline.value_at(target) + persistence * self.residual(last);
        Forecast::Estimate {
            value: value.max(0.0),
            std_error: self.residual_std,
        }
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn min_history(&self) -> usize {
        1
    }
}
