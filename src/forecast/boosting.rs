use chrono::{Duration, NaiveDateTime, Timelike};
use log::{debug, info};
use std::f64::consts::PI;

use super::baseline::SeasonalBaseline;
use super::{target_time, DemandForecaster, Forecast};
use crate::config::FeatureConfig;
use crate::errors::ForecastError;
use crate::features::is_weekend;
use crate::models::FeatureVector;

#[derive(Debug, Clone)]
pub struct BoostingParams {
    pub n_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 5,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Squared-error regression tree with exhaustive, deterministic split search.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    root: Node,
}

impl RegressionTree {
    pub fn fit(x: &[Vec<f64>], y: &[f64], max_depth: usize, min_samples_leaf: usize) -> Self {
        let indices: Vec<usize> = (0..y.len()).collect();
        Self {
            root: build_node(x, y, indices, 0, max_depth, min_samples_leaf.max(1)),
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

fn leaf(y: &[f64], indices: &[usize]) -> Node {
    if indices.is_empty() {
        return Node::Leaf(0.0);
    }
    Node::Leaf(indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64)
}

fn build_node(
    x: &[Vec<f64>],
    y: &[f64],
    indices: Vec<usize>,
    depth: usize,
    max_depth: usize,
    min_leaf: usize,
) -> Node {
    let n = indices.len();
    if depth >= max_depth || n < 2 * min_leaf {
        return leaf(y, &indices);
    }
    let n_features = x.first().map_or(0, |r| r.len());
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let parent_score = total * total / n as f64;

    // (gain, feature, threshold)
    let mut best: Option<(f64, usize, f64)> = None;
    for feature in 0..n_features {
        let mut order = indices.clone();
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
        let mut left_sum = 0.0;
        for split in 1..n {
            left_sum += y[order[split - 1]];
            if split < min_leaf || n - split < min_leaf {
                continue;
            }
            let (lo, hi) = (x[order[split - 1]][feature], x[order[split]][feature]);
            if lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let score = left_sum * left_sum / split as f64
                + right_sum * right_sum / (n - split) as f64;
            let gain = score - parent_score;
            if gain > 1e-12 && best.map_or(true, |(g, _, _)| gain > g) {
                best = Some((gain, feature, (lo + hi) / 2.0));
            }
        }
    }

    match best {
        None => leaf(y, &indices),
        Some((_, feature, threshold)) => {
            let (left, right): (Vec<usize>, Vec<usize>) =
                indices.into_iter().partition(|&i| x[i][feature] <= threshold);
            Node::Split {
                feature,
                threshold,
                left: Box::new(build_node(x, y, left, depth + 1, max_depth, min_leaf)),
                right: Box::new(build_node(x, y, right, depth + 1, max_depth, min_leaf)),
            }
        }
    }
}

/// Gradient boosting over regression trees (squared-error loss) on lag,
/// rolling and calendar features of the forecast origin.
#[derive(Debug, Clone)]
pub struct GradientBoostedForecaster {
    params: BoostingParams,
    features: FeatureConfig,
    horizon: usize,
    baseline: SeasonalBaseline,
    init: f64,
    trees: Vec<RegressionTree>,
    train_rmse: Option<f64>,
}

impl GradientBoostedForecaster {
    pub fn new(params: BoostingParams, features: FeatureConfig, horizon: usize) -> Self {
        let baseline = SeasonalBaseline::new(features.bucket_minutes);
        Self {
            params,
            features,
            horizon: horizon.max(1),
            baseline,
            init: 0.0,
            trees: Vec::new(),
            train_rmse: None,
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Regression row for origin `fv`, predicting bucket `target`.
    /// `None` while any lag or rolling statistic is still undefined.
    fn row(&self, fv: &FeatureVector, target: NaiveDateTime) -> Option<Vec<f64>> {
        let mut row = Vec::with_capacity(self.features.lags.len() + 10);
        row.push(fv.count as f64);
        for &lag in &self.features.lags {
            row.push(fv.lag(lag)?);
        }
        row.push(fv.rolling_mean?);
        row.push(fv.rolling_std?);
        row.push(fv.ratio_or_neutral());
        row.push(fv.entropy);
        row.push(fv.lobby_share);

        let minute_of_day = (target.hour() * 60 + target.minute()) as f64;
        let angle = 2.0 * PI * minute_of_day / 1440.0;
        row.push(angle.sin());
        row.push(angle.cos());
        row.push(if is_weekend(target) { 1.0 } else { 0.0 });
        row.push(self.baseline.value_at(target));
        Some(row)
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|t| self.params.learning_rate * t.predict(row))
                .sum::<f64>()
    }
}

impl DemandForecaster for GradientBoostedForecaster {
    fn name(&self) -> &'static str {
        "boosted_trees"
    }

    fn fit(&mut self, train: &[FeatureVector]) -> Result<(), ForecastError> {
        if train.is_empty() {
            return Err(ForecastError::EmptyTrainingSet);
        }
        self.baseline.fit(train);

        let step = Duration::minutes(self.horizon as i64 * self.features.bucket_minutes as i64);
        let mut x = Vec::new();
        let mut y = Vec::new();
        for (t, origin) in train.iter().enumerate() {
            let Some(target) = train.get(t + self.horizon) else {
                break;
            };
            if target.bucket_start - origin.bucket_start != step {
                continue;
            }
            if let Some(row) = self.row(origin, target.bucket_start) {
                x.push(row);
                y.push(target.count as f64);
            }
        }
        if y.is_empty() {
            return Err(ForecastError::Model(format!(
                "no complete training rows; need at least {} buckets",
                self.min_history() + self.horizon
            )));
        }

        self.init = y.iter().sum::<f64>() / y.len() as f64;
        self.trees.clear();
        let mut pred = vec![self.init; y.len()];
        for round in 0..self.params.n_trees {
            let residuals: Vec<f64> = y.iter().zip(&pred).map(|(a, p)| a - p).collect();
            let tree = RegressionTree::fit(
                &x,
                &residuals,
                self.params.max_depth,
                self.params.min_samples_leaf,
            );
            for (p, row) in pred.iter_mut().zip(&x) {
                *p += self.params.learning_rate * tree.predict(row);
            }
            self.trees.push(tree);
            if round % 25 == 0 {
                debug!("Boosting round {} complete", round);
            }
        }

        let sse: f64 = y.iter().zip(&pred).map(|(a, p)| (a - p).powi(2)).sum();
        self.train_rmse = Some((sse / y.len() as f64).sqrt());
        info!(
            "Boosted {} trees on {} rows (train RMSE {:.3})",
            self.trees.len(),
            y.len(),
            self.train_rmse.unwrap_or(0.0)
        );
        Ok(())
    }

    fn forecast(&self, history: &[FeatureVector]) -> Forecast {
        let insufficient = Forecast::InsufficientHistory {
            required: self.min_history(),
            available: history.len(),
        };
        let Some(last) = history.last() else {
            return insufficient;
        };
        let target = target_time(last.bucket_start, self.horizon, self.features.bucket_minutes);
        match self.row(last, target) {
            Some(row) => Forecast::Estimate {
                value: self.predict_row(&row).max(0.0),
                std_error: self.train_rmse,
            },
            None => insufficient,
        }
    }

    fn horizon(&self) -> usize {
        self.horizon
    }

    fn min_history(&self) -> usize {
        let max_lag = self.features.lags.iter().copied().max().unwrap_or(0);
        (max_lag + 1).max(self.features.rolling_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use crate::models::{Direction, EventRecord};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    #[test]
    fn test_tree_splits_step_function() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 10 { 1.0 } else { 5.0 }).collect();
        let tree = RegressionTree::fit(&x, &y, 2, 2);
        assert_relative_eq!(tree.predict(&[3.0]), 1.0);
        assert_relative_eq!(tree.predict(&[15.0]), 5.0);
    }

    #[test]
    fn test_tree_respects_min_leaf() {
        let x: Vec<Vec<f64>> = (0..4).map(|i| vec![i as f64]).collect();
        let y = vec![0.0, 0.0, 0.0, 10.0];
        // A split isolating the last sample would need a leaf of size 1.
        let tree = RegressionTree::fit(&x, &y, 3, 2);
        assert_relative_eq!(tree.predict(&[3.0]), 5.0);
    }

    fn daily_pattern(days: i64) -> Vec<FeatureVector> {
        let start = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let mut events = Vec::new();
        for d in 0..days {
            for slot in 0..288i64 {
                let ts = start + Duration::days(d) + Duration::minutes(5 * slot);
                let hour = slot / 12;
                let calls = if (8..10).contains(&hour) { 6 } else { 1 };
                for k in 0..calls {
                    events.push(EventRecord::hall_call(ts + Duration::seconds(k), 1, Direction::Up));
                }
            }
        }
        let config = FeatureConfig {
            bucket_minutes: 5,
            rolling_window: 3,
            lags: vec![1, 2],
        };
        FeatureExtractor::new(config, 1).extract(&events).1
    }

    #[test]
    fn test_boosting_learns_daily_peak() {
        let fvs = daily_pattern(3);
        let mut model = GradientBoostedForecaster::new(
            BoostingParams {
                n_trees: 30,
                learning_rate: 0.3,
                max_depth: 3,
                min_samples_leaf: 5,
            },
            FeatureConfig {
                bucket_minutes: 5,
                rolling_window: 3,
                lags: vec![1, 2],
            },
            1,
        );
        model.fit(&fvs).unwrap();
        assert_eq!(model.n_trees(), 30);

        // Origin 08:30 on day 2 forecasts a peak bucket.
        let origin = 288 + 8 * 12 + 6;
        let peak = model.forecast(&fvs[..=origin]).value().unwrap();
        // Origin 03:00 forecasts a quiet bucket.
        let quiet = model.forecast(&fvs[..=288 + 36]).value().unwrap();
        assert!(peak > 4.0, "peak {}", peak);
        assert!(quiet < 2.0, "quiet {}", quiet);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let fvs = daily_pattern(1);
        let model = GradientBoostedForecaster::new(
            BoostingParams::default(),
            FeatureConfig {
                bucket_minutes: 5,
                rolling_window: 3,
                lags: vec![1, 2],
            },
            1,
        );
        assert_eq!(model.min_history(), 3);
        assert_eq!(
            model.forecast(&fvs[..1]),
            Forecast::InsufficientHistory {
                required: 3,
                available: 1
            }
        );
    }
}
