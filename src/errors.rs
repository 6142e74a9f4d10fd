use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::models::TrafficState;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Invalid configuration value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading data file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Error reading CSV headers in {path}: {source}")]
    HeaderReadError {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Error reading CSV row {row} in {path}: {source}")]
    RowReadError {
        path: PathBuf,
        row: usize,
        #[source]
        source: csv::Error,
    },
    #[error("Required column '{column}' missing from {path}")]
    MissingColumn { path: PathBuf, column: String },
}

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Training set is empty")]
    EmptyTrainingSet,
    #[error("Invalid train/validation split: {0}")]
    InvalidSplit(String),
    #[error("Model error: {0}")]
    Model(String),
}

/// Failures that terminate a single parking epoch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("No floor-demand profile for state {0}")]
    NoProfile(TrafficState),
    #[error("Floor {floor} lies outside the building range {min}..={max}")]
    FloorOutOfRange { floor: i32, min: i32, max: i32 },
    #[error("Cannot park {k} elevators on {floors} distinct floors")]
    TooManyElevators { k: usize, floors: usize },
    #[error("Building floor range is empty ({min}..={max})")]
    EmptyFloorRange { min: i32, max: i32 },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration failed: {0}")]
    Config(#[from] ConfigError),
    #[error("Parsing failed: {0}")]
    Parse(#[from] ParseError),
    #[error("Forecasting failed: {0}")]
    Forecast(#[from] ForecastError),
    #[error("Optimization failed: {0}")]
    Optimizer(#[from] OptimizerError),
    #[error("No events available to build buckets")]
    NoEvents,
    #[error("Failed to write output {path}: {message}")]
    Output { path: PathBuf, message: String },
}
