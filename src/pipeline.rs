use chrono::{Duration, NaiveDateTime};
use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::classifier::{KMeansClassifier, RuleClassifier, StateClassifier};
use crate::classifier::clustering::{DEFAULT_CLUSTERS, DEFAULT_SEED};
use crate::config::PipelineConfig;
use crate::errors::PipelineError;
use crate::features::FeatureExtractor;
use crate::forecast::DemandForecaster;
use crate::metrics::METRICS;
use crate::models::{EventRecord, FeatureVector, FloorRange, TimeBucket, TrafficState};
use crate::optimizer::ParkingOptimizer;
use crate::parsers::{parse_events, EventFileKind};
use crate::profile::FloorDemandProfile;
use crate::simulator::{initial_positions, SimulationParams};
use crate::thresholds::ThresholdSet;
use crate::time_operation;
use crate::validation;

/// Cleaned event files. Only hall calls are required.
#[derive(Debug, Clone, Default)]
pub struct InputFiles {
    pub hall_calls: PathBuf,
    pub car_calls: Option<PathBuf>,
    pub car_stops: Option<PathBuf>,
    pub departures: Option<PathBuf>,
    pub load_changes: Option<PathBuf>,
    pub maintenance: Option<PathBuf>,
}

impl InputFiles {
    fn entries(&self) -> Vec<(&Path, EventFileKind)> {
        let mut entries = vec![(self.hall_calls.as_path(), EventFileKind::HallCalls)];
        let optional = [
            (&self.car_calls, EventFileKind::CarCalls),
            (&self.car_stops, EventFileKind::CarStops),
            (&self.departures, EventFileKind::CarDepartures),
            (&self.load_changes, EventFileKind::LoadChanges),
            (&self.maintenance, EventFileKind::Maintenance),
        ];
        for (path, kind) in optional {
            if let Some(p) = path {
                entries.push((p.as_path(), kind));
            }
        }
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierKind {
    Rules,
    KMeans,
}

/// Parse every input file and merge the records into one time-ordered stream.
pub fn load_events(
    inputs: &InputFiles,
    config: &PipelineConfig,
) -> Result<(Vec<EventRecord>, usize), PipelineError> {
    let mut events = Vec::new();
    let mut discarded = 0;
    for (path, kind) in inputs.entries() {
        let parsed = parse_events(path, kind, &config.ingest)?;
        info!("{:?}: {} records from {}", kind, parsed.records.len(), path.display());
        discarded += parsed.discarded;
        events.extend(parsed.records);
    }
    events.sort_by_key(|e| e.timestamp);
    Ok((events, discarded))
}

/// Everything derived from the event history before any policy runs.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub config: PipelineConfig,
    pub events: Vec<EventRecord>,
    pub floor_range: FloorRange,
    pub buckets: Vec<TimeBucket>,
    pub features: Vec<FeatureVector>,
    pub thresholds: ThresholdSet,
}

impl PreparedData {
    pub fn load(config: PipelineConfig, inputs: &InputFiles) -> Result<Self, PipelineError> {
        let (events, discarded) = time_operation!("ingest", load_events(inputs, &config))?;
        Self::from_events(config, events, discarded)
    }

    pub fn from_events(
        config: PipelineConfig,
        events: Vec<EventRecord>,
        discarded: usize,
    ) -> Result<Self, PipelineError> {
        let floor_range =
            validation::resolve_floor_range(&events, &config.building).ok_or(PipelineError::NoEvents)?;
        let (events, invalid) = validation::retain_valid(events, &floor_range);
        METRICS
            .lock()
            .record_ingested(events.len() as u64, (discarded + invalid) as u64);

        let extractor = FeatureExtractor::new(config.features.clone(), config.building.lobby_floor);
        let (buckets, features) = time_operation!("features", extractor.extract(&events));
        if features.is_empty() {
            return Err(PipelineError::NoEvents);
        }
        METRICS.lock().record_buckets(buckets.len() as u64);

        let counts: Vec<f64> = features.iter().map(|f| f.count as f64).collect();
        let thresholds = ThresholdSet::from_counts(&counts, &config.thresholds);
        info!(
            "Prepared {} events over floors {}..={} into {} buckets (theta_idle {:.2}, theta_high {:.2})",
            events.len(),
            floor_range.min,
            floor_range.max,
            buckets.len(),
            thresholds.theta_idle,
            thresholds.theta_high
        );

        Ok(Self {
            config,
            events,
            floor_range,
            buckets,
            features,
            thresholds,
        })
    }

    pub fn bucket_minutes(&self) -> u32 {
        self.config.features.bucket_minutes
    }

    /// The rule classifier unless k-means is requested and can be fitted.
    pub fn build_classifier(&self, kind: ClassifierKind) -> Box<dyn StateClassifier> {
        if kind == ClassifierKind::KMeans {
            match KMeansClassifier::fit(
                &self.features,
                DEFAULT_CLUSTERS,
                DEFAULT_SEED,
                self.thresholds.up_ratio,
                self.thresholds.down_ratio,
            ) {
                Some(kmeans) => return Box::new(kmeans),
                None => warn!("k-means could not be fitted, using the rule classifier"),
            }
        }
        Box::new(RuleClassifier::new(self.thresholds.clone()))
    }

    pub fn timeline(&self, classifier: &dyn StateClassifier) -> Vec<(NaiveDateTime, TrafficState)> {
        self.features
            .iter()
            .map(|f| (f.bucket_start, classifier.classify(f)))
            .collect()
    }

    pub fn profile(&self, timeline: &[(NaiveDateTime, TrafficState)]) -> FloorDemandProfile {
        FloorDemandProfile::build(&self.events, timeline, self.bucket_minutes())
    }

    pub fn optimizer(&self) -> ParkingOptimizer {
        ParkingOptimizer::new(self.floor_range, self.config.simulation.profile_fallback)
    }

    pub fn sim_params(&self) -> SimulationParams {
        SimulationParams::from_config(&self.config.simulation, &self.config.building)
    }

    /// Estimate for every bucket from the history ending `horizon` buckets earlier.
    /// `None` where that history is too short.
    pub fn rolling_forecasts(&self, forecaster: &dyn DemandForecaster) -> Vec<Option<f64>> {
        let horizon = forecaster.horizon();
        let forecasts: Vec<Option<f64>> = (0..self.features.len())
            .map(|t| {
                t.checked_sub(horizon)
                    .and_then(|origin| forecaster.forecast(&self.features[..=origin]).value())
            })
            .collect();
        let missing = forecasts.iter().filter(|f| f.is_none()).count();
        METRICS.lock().record_forecast_fallbacks(missing as u64);
        forecasts
    }

    /// Index of the first bucket inside the last `days` days of data.
    pub fn replay_start(&self, days: Option<i64>) -> usize {
        let (Some(days), Some(last)) = (days, self.features.last()) else {
            return 0;
        };
        let cutoff = last.bucket_start - Duration::days(days);
        self.features
            .iter()
            .position(|f| f.bucket_start > cutoff)
            .unwrap_or(0)
    }

    /// Last recorded stop per car at the end of the history; the idle fleet for planning.
    pub fn current_fleet(&self) -> Vec<(u32, i32)> {
        let params = self.sim_params();
        let positions = match self.events.last() {
            Some(last) => initial_positions(&self.events, last.timestamp, params.n_elevators, params.lobby_floor),
            None => vec![params.lobby_floor; params.n_elevators],
        };
        positions
            .into_iter()
            .enumerate()
            .map(|(id, floor)| (id as u32, floor))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn events() -> Vec<EventRecord> {
        let mut events = Vec::new();
        for day in 3..=5 {
            for m in 0..12 {
                events.push(EventRecord::hall_call(at(day, 8, m * 5), 1, Direction::Up));
                events.push(EventRecord::hall_call(at(day, 8, m * 5 + 1), 1, Direction::Up));
            }
            events.push(EventRecord::hall_call(at(day, 12, 0), 9, Direction::Down));
        }
        events.push(EventRecord::car_stop(at(5, 12, 1), 9, 3));
        events
    }

    #[test]
    fn test_prepare_from_events() {
        let data = PreparedData::from_events(PipelineConfig::default(), events(), 0).unwrap();
        assert_eq!(data.floor_range, FloorRange::new(1, 9));
        assert!(data.features.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start));
        assert!(data.thresholds.theta_idle >= 1.0);

        let classifier = data.build_classifier(ClassifierKind::Rules);
        let timeline = data.timeline(classifier.as_ref());
        assert_eq!(timeline.len(), data.features.len());
    }

    #[test]
    fn test_no_events_is_an_error() {
        let result = PreparedData::from_events(PipelineConfig::default(), Vec::new(), 0);
        assert!(matches!(result, Err(PipelineError::NoEvents)));
    }

    #[test]
    fn test_replay_start_and_fleet() {
        let data = PreparedData::from_events(PipelineConfig::default(), events(), 0).unwrap();
        assert_eq!(data.replay_start(None), 0);
        let start = data.replay_start(Some(1));
        assert!(data.features[start].bucket_start > at(4, 12, 0));

        let fleet = data.current_fleet();
        assert_eq!(fleet.len(), data.config.building.n_elevators);
        assert_eq!(fleet[0], (0, 9));
        assert!(fleet[1..].iter().all(|&(_, floor)| floor == 1));
    }
}
