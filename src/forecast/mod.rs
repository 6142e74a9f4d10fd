pub mod baseline;
pub mod boosting;
pub mod evaluation;

use chrono::{Duration, NaiveDateTime};

use crate::config::{FeatureConfig, ForecastConfig, ForecastModel};
use crate::errors::ForecastError;
use crate::models::FeatureVector;

pub use baseline::{BaselineAr, SeasonalBaseline};
pub use boosting::{BoostingParams, GradientBoostedForecaster};
pub use evaluation::{evaluate, ForecastPoint, TimeSplit, ValidationReport};

/// Result of a forecast call. Too little history is a distinct outcome, never a zero estimate.
#[derive(Debug, Clone, PartialEq)]
pub enum Forecast {
    Estimate { value: f64, std_error: Option<f64> },
    InsufficientHistory { required: usize, available: usize },
}

impl Forecast {
    pub fn value(&self) -> Option<f64> {
        match self {
            Forecast::Estimate { value, .. } => Some(*value),
            Forecast::InsufficientHistory { .. } => None,
        }
    }
}

/// Short-horizon demand forecaster. `history` ends at the forecast origin `t`;
/// the estimate is for bucket `t + horizon`.
pub trait DemandForecaster: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&mut self, train: &[FeatureVector]) -> Result<(), ForecastError>;

    fn forecast(&self, history: &[FeatureVector]) -> Forecast;

    fn horizon(&self) -> usize;

    /// Fewest buckets of history `forecast` needs.
    fn min_history(&self) -> usize;
}

pub(crate) fn target_time(origin: NaiveDateTime, horizon: usize, bucket_minutes: u32) -> NaiveDateTime {
    origin + Duration::minutes(horizon as i64 * bucket_minutes as i64)
}

/// Build the forecaster selected in configuration.
pub fn build_forecaster(
    forecast: &ForecastConfig,
    features: &FeatureConfig,
) -> Box<dyn DemandForecaster> {
    match forecast.model {
        ForecastModel::BaselineAr => Box::new(BaselineAr::new(features.bucket_minutes, forecast.horizon)),
        ForecastModel::BoostedTrees => Box::new(GradientBoostedForecaster::new(
            BoostingParams {
                n_trees: forecast.n_trees,
                learning_rate: forecast.learning_rate,
                max_depth: forecast.max_depth,
                min_samples_leaf: forecast.min_samples_leaf,
            },
            features.clone(),
            forecast.horizon,
        )),
    }
}
