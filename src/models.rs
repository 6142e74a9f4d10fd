use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// --- Raw events ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Unknown,
}

impl Direction {
    /// Lenient parse used at ingestion. Anything unrecognised is `Unknown`.
    pub fn parse_lenient(raw: &str) -> Self {
        let s = raw.trim().to_lowercase();
        if s.contains("up") || s == "u" || s.contains('↑') {
            Direction::Up
        } else if s.contains("down") || s == "d" || s.contains('↓') {
            Direction::Down
        } else {
            Direction::Unknown
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    HallCall,
    CarCall,
    CarStop,
    CarDeparture,
    LoadChange,
    Maintenance,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    Load { percent: f64 },
    CallAction(String),
    StopReason(String),
    Maintenance { active: bool },
}

/// One observed occurrence. Immutable once ingested.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub timestamp: NaiveDateTime,
    pub floor: i32,
    pub direction: Direction,
    pub car_id: Option<u32>,
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl EventRecord {
    pub fn hall_call(timestamp: NaiveDateTime, floor: i32, direction: Direction) -> Self {
        Self {
            timestamp,
            floor,
            direction,
            car_id: None,
            kind: EventKind::HallCall,
            payload: EventPayload::None,
        }
    }

    pub fn car_stop(timestamp: NaiveDateTime, floor: i32, car_id: u32) -> Self {
        Self {
            timestamp,
            floor,
            direction: Direction::Unknown,
            car_id: Some(car_id),
            kind: EventKind::CarStop,
            payload: EventPayload::None,
        }
    }

    pub fn departure(timestamp: NaiveDateTime, floor: i32, car_id: u32) -> Self {
        Self {
            kind: EventKind::CarDeparture,
            ..Self::car_stop(timestamp, floor, car_id)
        }
    }

    pub fn load_change(timestamp: NaiveDateTime, car_id: u32, percent: f64) -> Self {
        Self {
            floor: 0,
            direction: Direction::Unknown,
            car_id: Some(car_id),
            kind: EventKind::LoadChange,
            payload: EventPayload::Load { percent },
            timestamp,
        }
    }

    pub fn load_percent(&self) -> Option<f64> {
        match self.payload {
            EventPayload::Load { percent } => Some(percent),
            _ => None,
        }
    }

    pub fn maintenance_active(&self) -> Option<bool> {
        match self.payload {
            EventPayload::Maintenance { active } => Some(active),
            _ => None,
        }
    }
}

// --- Aggregates ---

/// Building-wide aggregate over one fixed-width interval.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBucket {
    pub start: NaiveDateTime,
    pub total_calls: u32,
    pub up_calls: u32,
    pub down_calls: u32,
    pub floor_calls: BTreeMap<i32, u32>,
    pub car_calls: u32,
    pub departures: u32,
    /// Mean of the load readings (%) taken in the bucket.
    pub mean_load: Option<f64>,
    pub maintenance_active: bool,
}

impl TimeBucket {
    pub fn empty(start: NaiveDateTime) -> Self {
        Self {
            start,
            total_calls: 0,
            up_calls: 0,
            down_calls: 0,
            floor_calls: BTreeMap::new(),
            car_calls: 0,
            departures: 0,
            mean_load: None,
            maintenance_active: false,
        }
    }
}

/// Derived per-bucket features. Only uses buckets up to and including `bucket_start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector {
    pub bucket_start: NaiveDateTime,
    pub count: u32,
    pub up_count: u32,
    pub down_count: u32,
    /// C_up / (C_up + C_down); `None` when no directional calls were seen.
    pub up_ratio: Option<f64>,
    /// Lagged counts keyed by lag (in buckets), `None` before enough history exists.
    pub lags: Vec<(usize, Option<f64>)>,
    pub rolling_mean: Option<f64>,
    pub rolling_std: Option<f64>,
    /// Shannon entropy (bits) of the per-floor call distribution.
    pub entropy: f64,
    /// Share of calls made at the lobby floor.
    pub lobby_share: f64,
    pub is_weekend: bool,
    pub hour: u32,
    /// Position of the bucket within its day.
    pub slot: u32,
    pub maintenance_active: bool,
    pub car_calls: u32,
    pub departures: u32,
    pub mean_load: Option<f64>,
    /// Trailing means over the last few buckets (fewer at the start).
    pub departures_recent: f64,
    pub load_recent: f64,
}

impl FeatureVector {
    pub const NEUTRAL_RATIO: f64 = 0.5;

    pub fn ratio_or_neutral(&self) -> f64 {
        self.up_ratio.unwrap_or(Self::NEUTRAL_RATIO)
    }

    pub fn lag(&self, lag: usize) -> Option<f64> {
        self.lags
            .iter()
            .find(|(l, _)| *l == lag)
            .and_then(|(_, v)| *v)
    }
}

// --- Traffic state ---

/// Closed set of traffic states. Declaration order is rule priority.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrafficState {
    #[serde(rename = "Idle")]
    Idle,
    #[serde(rename = "Weekend Low-Demand")]
    WeekendLowDemand,
    #[serde(rename = "Morning Up-Peak")]
    MorningUpPeak,
    #[serde(rename = "Evening Down-Peak")]
    EveningDownPeak,
    #[serde(rename = "Lunch Mixed")]
    LunchMixed,
    #[serde(rename = "Afternoon Mixed")]
    AfternoonMixed,
}

impl TrafficState {
    pub const ALL: [TrafficState; 6] = [
        TrafficState::Idle,
        TrafficState::WeekendLowDemand,
        TrafficState::MorningUpPeak,
        TrafficState::EveningDownPeak,
        TrafficState::LunchMixed,
        TrafficState::AfternoonMixed,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TrafficState::Idle => "Idle",
            TrafficState::WeekendLowDemand => "Weekend Low-Demand",
            TrafficState::MorningUpPeak => "Morning Up-Peak",
            TrafficState::EveningDownPeak => "Evening Down-Peak",
            TrafficState::LunchMixed => "Lunch Mixed",
            TrafficState::AfternoonMixed => "Afternoon Mixed",
        }
    }

    pub fn is_peak(self) -> bool {
        matches!(
            self,
            TrafficState::MorningUpPeak | TrafficState::EveningDownPeak | TrafficState::LunchMixed
        )
    }
}

impl fmt::Display for TrafficState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for TrafficState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace(['_', '-'], " ");
        TrafficState::ALL
            .iter()
            .copied()
            .find(|st| st.label().to_lowercase().replace('-', " ") == wanted)
            .ok_or_else(|| format!("Unknown traffic state '{}'", s))
    }
}

// --- Building geometry ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloorRange {
    pub min: i32,
    pub max: i32,
}

impl FloorRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, floor: i32) -> bool {
        (self.min..=self.max).contains(&floor)
    }

    pub fn len(&self) -> usize {
        if self.max < self.min {
            0
        } else {
            (self.max - self.min + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn center(&self) -> f64 {
        (self.min as f64 + self.max as f64) / 2.0
    }

    pub fn floors(&self) -> impl Iterator<Item = i32> {
        self.min..=self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!(Direction::parse_lenient("Up"), Direction::Up);
        assert_eq!(Direction::parse_lenient(" d "), Direction::Down);
        assert_eq!(Direction::parse_lenient("↓"), Direction::Down);
        assert_eq!(Direction::parse_lenient(""), Direction::Unknown);
        assert_eq!(Direction::parse_lenient("stop"), Direction::Unknown);
    }

    #[test]
    fn test_state_label_roundtrip() {
        for state in TrafficState::ALL {
            assert_eq!(state.label().parse::<TrafficState>().unwrap(), state);
        }
        assert_eq!(
            "evening_down_peak".parse::<TrafficState>().unwrap(),
            TrafficState::EveningDownPeak
        );
        assert!("rush hour".parse::<TrafficState>().is_err());
    }

    #[test]
    fn test_floor_range() {
        let range = FloorRange::new(-2, 10);
        assert_eq!(range.len(), 13);
        assert!(range.contains(-2));
        assert!(!range.contains(11));
        assert_eq!(range.center(), 4.0);
        assert!(FloorRange::new(3, 1).is_empty());
    }
}
