use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Global metrics instance
pub static METRICS: Lazy<Mutex<Metrics>> = Lazy::new(|| Mutex::new(Metrics::new()));

/// Pipeline run metrics
#[derive(Debug, Default)]
pub struct Metrics {
    pub events_ingested: u64,
    pub rows_discarded: u64,
    pub buckets_built: u64,
    pub epochs_planned: u64,
    pub epochs_failed: u64,
    pub forecast_fallbacks: u64,
    pub stage_times: BTreeMap<String, Duration>,
    pub start_time: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn record_ingested(&mut self, events: u64, discarded: u64) {
        self.events_ingested += events;
        self.rows_discarded += discarded;
    }

    pub fn record_buckets(&mut self, count: u64) {
        self.buckets_built += count;
    }

    pub fn record_epochs(&mut self, planned: u64, failed: u64) {
        self.epochs_planned += planned;
        self.epochs_failed += failed;
    }

    pub fn record_forecast_fallbacks(&mut self, count: u64) {
        self.forecast_fallbacks += count;
    }

    /// Accumulates, since a stage may run once per scenario.
    pub fn record_stage_time(&mut self, stage: String, duration: Duration) {
        *self.stage_times.entry(stage).or_default() += duration;
    }

    pub fn get_total_duration(&self) -> Duration {
        self.start_time
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    pub fn print_summary(&self) {
        let duration = self.get_total_duration();
        println!("\n========== Pipeline Metrics Summary ==========");
        println!("Total Duration: {:.2?}", duration);
        println!("Events Ingested: {}", self.events_ingested);
        println!("Rows Discarded: {}", self.rows_discarded);
        println!("Buckets Built: {}", self.buckets_built);
        println!("Epochs Planned: {}", self.epochs_planned);
        println!("Epochs Failed: {}", self.epochs_failed);
        println!("Forecast Fallbacks: {}", self.forecast_fallbacks);

        if !self.stage_times.is_empty() {
            println!("\nStage Times:");
            for (stage, duration) in &self.stage_times {
                println!("  {}: {:.2?}", stage, duration);
            }
        }
        println!("==============================================\n");
    }
}

/// Helper macro to time a pipeline stage
#[macro_export]
macro_rules! time_operation {
    ($name:expr, $op:expr) => {{
        let start = std::time::Instant::now();
        let result = $op;
        let duration = start.elapsed();
        $crate::metrics::METRICS
            .lock()
            .record_stage_time($name.to_string(), duration);
        result
    }};
}
