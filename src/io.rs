//! CSV/JSON export of pipeline results.

use chrono::NaiveDateTime;
use log::info;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::PipelineError;
use crate::forecast::{ForecastPoint, ValidationReport};
use crate::models::TrafficState;
use crate::optimizer::ParkingPlan;
use crate::parallel::ScenarioRun;
use crate::simulator::{BacktestRun, BucketOutcome, PolicySummary};

pub const STATES_FILE: &str = "states.csv";
pub const FORECAST_FILE: &str = "forecast.csv";
pub const FORECAST_METRICS_FILE: &str = "forecast_metrics.json";
pub const PLAN_FILE: &str = "parking_plan.csv";
pub const BACKTEST_SUMMARY_FILE: &str = "backtest_summary.csv";
pub const BACKTEST_BUCKETS_FILE: &str = "backtest_buckets.csv";
pub const STRESS_SUMMARY_FILE: &str = "stress_summary.csv";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn fmt_time(ts: NaiveDateTime) -> String {
    ts.format(TIME_FORMAT).to_string()
}

fn output_error(path: &Path, message: impl ToString) -> PipelineError {
    PipelineError::Output {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct StateRow {
    bucket_start: String,
    state_label: &'static str,
}

#[derive(Debug, Serialize)]
struct ForecastRow {
    bucket_start: String,
    actual: f64,
    predicted: f64,
    baseline: f64,
    fallback: bool,
}

#[derive(Debug, Serialize)]
struct PlanRow {
    elevator_id: u32,
    from_floor: i32,
    target_floor: i32,
    source_state: &'static str,
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    scenario: &'a str,
    policy: &'static str,
    calls: usize,
    awt_s: f64,
    p95_wait_s: f64,
    p99_wait_s: f64,
    max_wait_s: f64,
    long_wait_rate: f64,
    empty_travel_floors: u64,
    reposition_moves: u64,
    failed_epochs: usize,
    fallback_epochs: usize,
}

impl<'a> SummaryRow<'a> {
    fn new(scenario: &'a str, s: &PolicySummary) -> Self {
        Self {
            scenario,
            policy: s.policy.label(),
            calls: s.calls,
            awt_s: s.awt_s,
            p95_wait_s: s.p95_wait_s,
            p99_wait_s: s.p99_wait_s,
            max_wait_s: s.max_wait_s,
            long_wait_rate: s.long_wait_rate,
            empty_travel_floors: s.empty_travel_floors,
            reposition_moves: s.reposition_moves,
            failed_epochs: s.failed_epochs,
            fallback_epochs: s.fallback_epochs,
        }
    }
}

#[derive(Debug, Serialize)]
struct BucketRow {
    policy: &'static str,
    bucket_start: String,
    state_label: &'static str,
    forecast: Option<f64>,
    calls: usize,
    mean_wait_s: Option<f64>,
    max_wait_s: Option<f64>,
    idle_cars: usize,
    moves: u32,
    empty_travel_floors: u32,
    plan_failed: bool,
}

impl From<&BucketOutcome> for BucketRow {
    fn from(b: &BucketOutcome) -> Self {
        Self {
            policy: b.policy.label(),
            bucket_start: fmt_time(b.bucket_start),
            state_label: b.state.map(TrafficState::label).unwrap_or(""),
            forecast: b.forecast,
            calls: b.calls,
            mean_wait_s: b.mean_wait_s,
            max_wait_s: b.max_wait_s,
            idle_cars: b.idle_cars,
            moves: b.moves,
            empty_travel_floors: b.empty_travel_floors,
            plan_failed: b.plan_failed,
        }
    }
}

/// Serialize `rows` to a CSV file at `path`, creating parent directories.
pub fn write_csv<T, I>(path: &Path, rows: I) -> Result<usize, PipelineError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| output_error(path, e))?;
        }
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| output_error(path, e))?;
    let mut written = 0;
    for row in rows {
        writer.serialize(row).map_err(|e| output_error(path, e))?;
        written += 1;
    }
    writer.flush().map_err(|e| output_error(path, e))?;
    info!("Wrote {} rows to {}", written, path.display());
    Ok(written)
}

pub fn write_states(
    dir: &Path,
    timeline: &[(NaiveDateTime, TrafficState)],
) -> Result<PathBuf, PipelineError> {
    let path = dir.join(STATES_FILE);
    write_csv(
        &path,
        timeline.iter().map(|&(ts, state)| StateRow {
            bucket_start: fmt_time(ts),
            state_label: state.label(),
        }),
    )?;
    Ok(path)
}

pub fn write_forecast(
    dir: &Path,
    points: &[ForecastPoint],
    report: &ValidationReport,
) -> Result<(PathBuf, PathBuf), PipelineError> {
    let csv_path = dir.join(FORECAST_FILE);
    write_csv(
        &csv_path,
        points.iter().map(|p| ForecastRow {
            bucket_start: fmt_time(p.bucket_start),
            actual: p.actual,
            predicted: p.predicted,
            baseline: p.baseline,
            fallback: p.fallback,
        }),
    )?;

    let json_path = dir.join(FORECAST_METRICS_FILE);
    let json = serde_json::to_string_pretty(report).map_err(|e| output_error(&json_path, e))?;
    fs::write(&json_path, json).map_err(|e| output_error(&json_path, e))?;
    info!("Wrote forecast metrics to {}", json_path.display());
    Ok((csv_path, json_path))
}

pub fn write_plan(dir: &Path, plan: &ParkingPlan) -> Result<PathBuf, PipelineError> {
    let path = dir.join(PLAN_FILE);
    write_csv(
        &path,
        plan.assignments.iter().map(|a| PlanRow {
            elevator_id: a.elevator_id,
            from_floor: a.from_floor,
            target_floor: a.target_floor,
            source_state: plan.source_state.label(),
        }),
    )?;
    Ok(path)
}

/// Policy summaries and the per-bucket series of one backtest.
pub fn write_backtest(dir: &Path, runs: &[BacktestRun]) -> Result<(PathBuf, PathBuf), PipelineError> {
    let summary_path = dir.join(BACKTEST_SUMMARY_FILE);
    write_csv(
        &summary_path,
        runs.iter().map(|r| SummaryRow::new("base", &r.summary)),
    )?;
    let buckets_path = dir.join(BACKTEST_BUCKETS_FILE);
    write_csv(
        &buckets_path,
        runs.iter().flat_map(|r| r.buckets.iter().map(BucketRow::from)),
    )?;
    Ok((summary_path, buckets_path))
}

pub fn write_stress(dir: &Path, runs: &[ScenarioRun]) -> Result<PathBuf, PipelineError> {
    let path = dir.join(STRESS_SUMMARY_FILE);
    write_csv(
        &path,
        runs.iter().map(|r| SummaryRow::new(&r.scenario, &r.run.summary)),
    )?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Assignment;
    use chrono::NaiveDate;
    use std::env;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("elevator_parking_io_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_write_states() {
        let dir = scratch_dir("states");
        let ts = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap().and_hms_opt(8, 5, 0).unwrap();
        let path = write_states(&dir, &[(ts, TrafficState::MorningUpPeak)]).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some("bucket_start,state_label"));
        assert_eq!(
            lines.next(),
            Some(format!("2025-03-04 08:05:00,{}", TrafficState::MorningUpPeak.label()).as_str())
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_write_plan() {
        let dir = scratch_dir("plan");
        let plan = ParkingPlan {
            source_state: TrafficState::Idle,
            targets: vec![1, 7],
            assignments: vec![
                Assignment { elevator_id: 0, from_floor: 3, target_floor: 1 },
                Assignment { elevator_id: 1, from_floor: 9, target_floor: 7 },
            ],
            cost: 0.0,
            fallback: false,
        };
        let path = write_plan(&dir, &plan).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert!(content.starts_with("elevator_id,from_floor,target_floor,source_state"));
        let _ = fs::remove_dir_all(&dir);
    }
}
