use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

/// Top-level pipeline configuration. Every section falls back to its defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub building: BuildingConfig,
    pub features: FeatureConfig,
    pub thresholds: ThresholdConfig,
    pub forecast: ForecastConfig,
    pub simulation: SimulationConfig,
    pub ingest: IngestConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BuildingConfig {
    /// Inferred from the data when absent.
    pub min_floor: Option<i32>,
    pub max_floor: Option<i32>,
    pub lobby_floor: i32,
    pub n_elevators: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FeatureConfig {
    pub bucket_minutes: u32,
    pub rolling_window: usize,
    pub lags: Vec<usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ThresholdConfig {
    pub idle_quantile: f64,
    pub idle_min_nonzero: usize,
    pub idle_fallback: f64,
    pub high_quantile: f64,
    pub up_ratio: f64,
    pub down_ratio: f64,
    pub lobby_share: f64,
    /// Entropy (bits) above which demand counts as spatially dispersed.
    pub entropy_dispersed: f64,
    pub theta_idle_override: Option<f64>,
    pub theta_high_override: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    BaselineAr,
    BoostedTrees,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ForecastConfig {
    pub model: ForecastModel,
    pub train_fraction: f64,
    pub horizon: usize,
    pub n_trees: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFallback {
    Fail,
    Uniform,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    pub seconds_per_floor: f64,
    pub door_time_s: f64,
    pub long_wait_threshold_s: f64,
    pub profile_fallback: ProfileFallback,
    pub use_forecast: bool,
}

/// Column names of the cleaned event CSVs.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub time_column: String,
    pub floor_column: String,
    pub direction_column: String,
    pub elevator_column: String,
    pub load_column: String,
    pub status_column: String,
    pub action_column: String,
    pub timestamp_format: Option<String>,
}

impl Default for BuildingConfig {
    fn default() -> Self {
        Self {
            min_floor: None,
            max_floor: None,
            lobby_floor: 1,
            n_elevators: 8,
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            bucket_minutes: 5,
            rolling_window: 12, // one hour of 5-minute buckets
            lags: vec![1, 2, 3, 12],
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            idle_quantile: 0.10,
            idle_min_nonzero: 30,
            idle_fallback: 1.0,
            high_quantile: 0.75,
            up_ratio: 0.6,
            down_ratio: 0.4,
            lobby_share: 0.3,
            entropy_dispersed: 2.0,
            theta_idle_override: None,
            theta_high_override: None,
        }
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            model: ForecastModel::BaselineAr,
            train_fraction: 0.8,
            horizon: 1,
            n_trees: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 5,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seconds_per_floor: 1.5,
            door_time_s: 8.0,
            long_wait_threshold_s: 60.0,
            profile_fallback: ProfileFallback::Fail,
            use_forecast: true,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            time_column: "Time".to_string(),
            floor_column: "Floor".to_string(),
            direction_column: "Direction".to_string(),
            elevator_column: "Elevator".to_string(),
            load_column: "Load".to_string(),
            status_column: "Status".to_string(),
            action_column: "Action".to_string(),
            timestamp_format: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file and check it.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }

        let file = File::open(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;
        let reader = BufReader::new(file);

        let config: PipelineConfig =
            serde_json::from_reader(reader).map_err(|e| ConfigError::JsonParseError {
                path: path.clone(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `ELEVATOR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(n) = std::env::var("ELEVATOR_N_CARS") {
            self.building.n_elevators = parse_env("ELEVATOR_N_CARS", &n)?;
        }
        if let Ok(frac) = std::env::var("ELEVATOR_TRAIN_FRACTION") {
            self.forecast.train_fraction = parse_env("ELEVATOR_TRAIN_FRACTION", &frac)?;
        }
        if let Ok(tau) = std::env::var("ELEVATOR_LONG_WAIT_S") {
            self.simulation.long_wait_threshold_s = parse_env("ELEVATOR_LONG_WAIT_S", &tau)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.features.bucket_minutes == 0 || 1440 % self.features.bucket_minutes != 0 {
            return Err(invalid(
                "features.bucket_minutes",
                "must be a positive divisor of 1440",
            ));
        }
        if self.features.rolling_window == 0 {
            return Err(invalid("features.rolling_window", "must be at least 1"));
        }
        if self.building.n_elevators == 0 {
            return Err(invalid("building.n_elevators", "must be at least 1"));
        }
        if let (Some(min), Some(max)) = (self.building.min_floor, self.building.max_floor) {
            if min > max {
                return Err(invalid(
                    "building.min_floor",
                    &format!("{} is above max_floor {}", min, max),
                ));
            }
        }
        let t = &self.thresholds;
        for (field, q) in [
            ("thresholds.idle_quantile", t.idle_quantile),
            ("thresholds.high_quantile", t.high_quantile),
        ] {
            if !(0.0..=1.0).contains(&q) {
                return Err(invalid(field, "quantile must lie in [0, 1]"));
            }
        }
        if t.down_ratio >= t.up_ratio {
            return Err(invalid(
                "thresholds.down_ratio",
                "must be strictly below thresholds.up_ratio",
            ));
        }
        let f = &self.forecast;
        if !(f.train_fraction > 0.0 && f.train_fraction < 1.0) {
            return Err(invalid("forecast.train_fraction", "must lie in (0, 1)"));
        }
        if f.horizon == 0 {
            return Err(invalid("forecast.horizon", "must be at least 1"));
        }
        let s = &self.simulation;
        if s.seconds_per_floor < 0.0 || s.door_time_s < 0.0 || s.long_wait_threshold_s < 0.0 {
            return Err(invalid("simulation", "times must be non-negative"));
        }
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| invalid(name, &format!("cannot parse '{}'", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.features.bucket_minutes, 5);
        assert_eq!(config.building.lobby_floor, 1);
        assert_eq!(config.simulation.long_wait_threshold_s, 60.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "building": { "n_elevators": 4 }, "forecast": { "model": "boosted_trees" } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.building.n_elevators, 4);
        assert_eq!(config.building.lobby_floor, 1);
        assert_eq!(config.forecast.model, ForecastModel::BoostedTrees);
        assert_eq!(config.forecast.train_fraction, 0.8);
        assert_eq!(config.features.lags, vec![1, 2, 3, 12]);
    }

    #[test]
    fn test_invalid_bucket_width_rejected() {
        let mut config = PipelineConfig::default();
        config.features.bucket_minutes = 7;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::load(Path::new("/nonexistent/elevator.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}
