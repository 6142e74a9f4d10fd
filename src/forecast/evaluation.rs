use chrono::NaiveDateTime;
use log::{info, warn};
use serde::Serialize;
use std::ops::Range;

use super::baseline::SeasonalBaseline;
use super::{DemandForecaster, Forecast};
use crate::errors::ForecastError;
use crate::models::FeatureVector;
use crate::stats;

/// Chronological train/validation split. Validation strictly follows training.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSplit {
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

impl TimeSplit {
    pub fn new(features: &[FeatureVector], train_fraction: f64) -> Result<Self, ForecastError> {
        let n = features.len();
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(ForecastError::InvalidSplit(format!(
                "train fraction {} outside (0, 1)",
                train_fraction
            )));
        }
        let n_train = (n as f64 * train_fraction).floor() as usize;
        if n_train == 0 || n_train >= n {
            return Err(ForecastError::InvalidSplit(format!(
                "{} buckets cannot be split at fraction {}",
                n, train_fraction
            )));
        }
        let split = Self {
            train: 0..n_train,
            validation: n_train..n,
        };
        split.check_order(features)?;
        Ok(split)
    }

    /// Every training timestamp must precede every validation timestamp.
    pub fn check_order(&self, features: &[FeatureVector]) -> Result<(), ForecastError> {
        let latest_train = features[self.train.clone()].iter().map(|f| f.bucket_start).max();
        let earliest_val = features[self.validation.clone()]
            .iter()
            .map(|f| f.bucket_start)
            .min();
        match (latest_train, earliest_val) {
            (Some(t), Some(v)) if t < v => Ok(()),
            (Some(t), Some(v)) => Err(ForecastError::InvalidSplit(format!(
                "training bucket {} is not before validation bucket {}",
                t, v
            ))),
            _ => Err(ForecastError::InvalidSplit("empty split".to_string())),
        }
    }
}

/// Held-out accuracy of one forecaster next to the baseline-only and
/// persistence (previous count) references.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub model: String,
    pub horizon: usize,
    pub n_train: usize,
    pub n_validation: usize,
    pub train_end: NaiveDateTime,
    pub validation_start: NaiveDateTime,
    pub mae: f64,
    pub rmse: f64,
    pub baseline_mae: f64,
    pub baseline_rmse: f64,
    pub naive_mae: f64,
    pub naive_rmse: f64,
    /// Validation buckets where the model had too little history and the baseline was used.
    pub fallbacks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastPoint {
    pub bucket_start: NaiveDateTime,
    pub actual: f64,
    pub predicted: f64,
    pub baseline: f64,
    pub fallback: bool,
}

/// Fit on the training window and score every validation bucket.
pub fn evaluate(
    forecaster: &mut dyn DemandForecaster,
    features: &[FeatureVector],
    train_fraction: f64,
    bucket_minutes: u32,
) -> Result<(ValidationReport, Vec<ForecastPoint>), ForecastError> {
    let split = TimeSplit::new(features, train_fraction)?;
    let train = &features[split.train.clone()];
    forecaster.fit(train)?;

    let mut baseline = SeasonalBaseline::new(bucket_minutes);
    baseline.fit(train);

    let horizon = forecaster.horizon();
    let mut points = Vec::new();
    let mut naive = Vec::new();
    let mut fallbacks = 0;
    for target in split.validation.clone() {
        let Some(origin) = target.checked_sub(horizon) else {
            continue;
        };
        let fv = &features[target];
        let baseline_value = baseline.value_at(fv.bucket_start);
        let (predicted, fallback) = match forecaster.forecast(&features[..=origin]) {
            Forecast::Estimate { value, .. } => (value, false),
            Forecast::InsufficientHistory { .. } => {
                fallbacks += 1;
                (baseline_value, true)
            }
        };
        points.push(ForecastPoint {
            bucket_start: fv.bucket_start,
            actual: fv.count as f64,
            predicted,
            baseline: baseline_value,
            fallback,
        });
        naive.push(features[origin].count as f64);
    }

    if points.is_empty() {
        return Err(ForecastError::InvalidSplit(
            "validation window shorter than the forecast horizon".to_string(),
        ));
    }
    if fallbacks > 0 {
        warn!(
            "{} of {} validation forecasts fell back to the seasonal baseline",
            fallbacks,
            points.len()
        );
    }

    let actual: Vec<f64> = points.iter().map(|p| p.actual).collect();
    let predicted: Vec<f64> = points.iter().map(|p| p.predicted).collect();
    let base: Vec<f64> = points.iter().map(|p| p.baseline).collect();
    let metric = |f: fn(&[f64], &[f64]) -> Option<f64>, p: &[f64]| f(&actual, p).unwrap_or(f64::NAN);

    let report = ValidationReport {
        model: forecaster.name().to_string(),
        horizon,
        n_train: split.train.len(),
        n_validation: points.len(),
        train_end: features[split.train.end - 1].bucket_start,
        validation_start: features[split.validation.start].bucket_start,
        mae: metric(stats::mae, &predicted),
        rmse: metric(stats::rmse, &predicted),
        baseline_mae: metric(stats::mae, &base),
        baseline_rmse: metric(stats::rmse, &base),
        naive_mae: metric(stats::mae, &naive),
        naive_rmse: metric(stats::rmse, &naive),
        fallbacks,
    };
    info!(
        "{}: MAE {:.3} RMSE {:.3} (baseline MAE {:.3} RMSE {:.3}) over {} buckets",
        report.model, report.mae, report.rmse, report.baseline_mae, report.baseline_rmse, report.n_validation
    );
    Ok((report, points))
}
