pub mod classifier;
pub mod config;
pub mod errors;
pub mod features;
pub mod forecast;
pub mod io;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod parallel;
pub mod parsers;
pub mod pipeline;
pub mod profile;
pub mod simulator;
pub mod stats;
pub mod stress;
pub mod thresholds;
pub mod validation;

#[cfg(test)]
mod tests;
