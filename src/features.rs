use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike, Weekday};
use log::{debug, info};
use std::collections::BTreeMap;

use crate::config::FeatureConfig;
use crate::models::{Direction, EventKind, EventRecord, FeatureVector, TimeBucket};
use crate::stats;

/// Buckets in the trailing departure and load means.
pub const RECENT_WINDOW: usize = 3;

/// Floor a timestamp to the start of its bucket.
pub fn bucket_start(ts: NaiveDateTime, bucket_minutes: u32) -> NaiveDateTime {
    let minutes = ts.hour() * 60 + ts.minute();
    let floored = minutes - minutes % bucket_minutes.max(1);
    ts.date().and_time(NaiveTime::MIN) + Duration::minutes(floored as i64)
}

pub fn is_weekend(ts: NaiveDateTime) -> bool {
    matches!(ts.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Index of the bucket within its day (0..1440/bucket_minutes).
pub fn day_slot(ts: NaiveDateTime, bucket_minutes: u32) -> u32 {
    (ts.hour() * 60 + ts.minute()) / bucket_minutes.max(1)
}

/// Turns raw events into a contiguous bucket timeline and per-bucket features.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    lobby_floor: i32,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig, lobby_floor: i32) -> Self {
        Self { config, lobby_floor }
    }

    pub fn bucket_minutes(&self) -> u32 {
        self.config.bucket_minutes
    }

    pub fn lobby_floor(&self) -> i32 {
        self.lobby_floor
    }

    /// Aggregate events into buckets from the first to the last observed bucket.
    /// Buckets without activity are present and zero-filled.
    pub fn bucketize(&self, events: &[EventRecord]) -> Vec<TimeBucket> {
        let width = self.config.bucket_minutes;
        let (first, last) = match (
            events.iter().map(|e| e.timestamp).min(),
            events.iter().map(|e| e.timestamp).max(),
        ) {
            (Some(a), Some(b)) => (bucket_start(a, width), bucket_start(b, width)),
            _ => return Vec::new(),
        };

        let step = Duration::minutes(width as i64);
        let mut index: BTreeMap<NaiveDateTime, usize> = BTreeMap::new();
        let mut buckets = Vec::new();
        let mut cursor = first;
        while cursor <= last {
            index.insert(cursor, buckets.len());
            buckets.push(TimeBucket::empty(cursor));
            cursor += step;
        }

        let mut loads: Vec<Vec<f64>> = vec![Vec::new(); buckets.len()];
        let mut maintenance: Vec<Vec<bool>> = vec![Vec::new(); buckets.len()];

        let mut ordered: Vec<&EventRecord> = events.iter().collect();
        ordered.sort_by_key(|e| e.timestamp);

        for event in ordered {
            let Some(&i) = index.get(&bucket_start(event.timestamp, width)) else {
                continue;
            };
            let bucket = &mut buckets[i];
            match event.kind {
                EventKind::HallCall => {
                    bucket.total_calls += 1;
                    match event.direction {
                        Direction::Up => bucket.up_calls += 1,
                        Direction::Down => bucket.down_calls += 1,
                        Direction::Unknown => {}
                    }
                    *bucket.floor_calls.entry(event.floor).or_insert(0) += 1;
                }
                EventKind::CarCall => bucket.car_calls += 1,
                // Car stops only seed initial car positions in the simulator.
                EventKind::CarStop => {}
                EventKind::CarDeparture => bucket.departures += 1,
                EventKind::LoadChange => {
                    if let Some(load) = event.load_percent() {
                        loads[i].push(load);
                    }
                }
                EventKind::Maintenance => {
                    if let Some(active) = event.maintenance_active() {
                        maintenance[i].push(active);
                    }
                }
            }
        }

        // Maintenance windows stay open until a closing transition.
        let mut active = false;
        for (bucket, (readings, transitions)) in buckets
            .iter_mut()
            .zip(loads.iter().zip(maintenance.iter()))
        {
            // Sorted so the mean does not depend on input order.
            let mut readings = readings.clone();
            readings.sort_by(f64::total_cmp);
            bucket.mean_load = stats::mean(&readings);
            let opened_here = transitions.iter().any(|&t| t);
            bucket.maintenance_active = active || opened_here;
            if let Some(&last) = transitions.last() {
                active = last;
            }
        }

        info!(
            "Built {} buckets of {} minutes from {} events",
            buckets.len(),
            width,
            events.len()
        );
        buckets
    }

    /// Feature vector for every bucket. Entry `t` only reads buckets `..=t`.
    pub fn features(&self, buckets: &[TimeBucket]) -> Vec<FeatureVector> {
        let counts: Vec<f64> = buckets.iter().map(|b| b.total_calls as f64).collect();
        let window = self.config.rolling_window.max(1);
        let departures: Vec<f64> = buckets.iter().map(|b| b.departures as f64).collect();
        let loads: Vec<f64> = buckets.iter().map(|b| b.mean_load.unwrap_or(0.0)).collect();
        let recent = |series: &[f64], t: usize| {
            let from = (t + 1).saturating_sub(RECENT_WINDOW);
            stats::mean(&series[from..=t]).unwrap_or(0.0)
        };

        buckets
            .iter()
            .enumerate()
            .map(|(t, bucket)| {
                let lags = self
                    .config
                    .lags
                    .iter()
                    .map(|&lag| (lag, t.checked_sub(lag).map(|i| counts[i])))
                    .collect();

                let (rolling_mean, rolling_std) = if t + 1 >= window {
                    let slice = &counts[t + 1 - window..=t];
                    (stats::mean(slice), stats::std_dev(slice))
                } else {
                    (None, None)
                };

                let mut fv = self.vector_for(bucket, lags, rolling_mean, rolling_std);
                fv.departures_recent = recent(&departures, t);
                fv.load_recent = recent(&loads, t);
                fv
            })
            .collect()
    }

    fn vector_for(
        &self,
        bucket: &TimeBucket,
        lags: Vec<(usize, Option<f64>)>,
        rolling_mean: Option<f64>,
        rolling_std: Option<f64>,
    ) -> FeatureVector {
        let directional = bucket.up_calls + bucket.down_calls;
        let up_ratio = if directional > 0 {
            Some(bucket.up_calls as f64 / directional as f64)
        } else {
            None
        };
        let lobby_share = if bucket.total_calls > 0 {
            bucket.floor_calls.get(&self.lobby_floor).copied().unwrap_or(0) as f64
                / bucket.total_calls as f64
        } else {
            0.0
        };

        FeatureVector {
            bucket_start: bucket.start,
            count: bucket.total_calls,
            up_count: bucket.up_calls,
            down_count: bucket.down_calls,
            up_ratio,
            lags,
            rolling_mean,
            rolling_std,
            entropy: stats::entropy_bits(bucket.floor_calls.values().copied()),
            lobby_share,
            is_weekend: is_weekend(bucket.start),
            hour: bucket.start.hour(),
            slot: day_slot(bucket.start, self.config.bucket_minutes),
            maintenance_active: bucket.maintenance_active,
            car_calls: bucket.car_calls,
            departures: bucket.departures,
            mean_load: bucket.mean_load,
            departures_recent: bucket.departures as f64,
            load_recent: bucket.mean_load.unwrap_or(0.0),
        }
    }

    pub fn extract(&self, events: &[EventRecord]) -> (Vec<TimeBucket>, Vec<FeatureVector>) {
        let buckets = self.bucketize(events);
        let features = self.features(&buckets);
        debug!("Extracted {} feature vectors", features.len());
        (buckets, features)
    }
}
