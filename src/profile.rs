use chrono::NaiveDateTime;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};

use crate::features::bucket_start;
use crate::models::{EventKind, EventRecord, TrafficState};

/// Per-state relative demand weight of each floor. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloorDemandProfile {
    weights: HashMap<TrafficState, BTreeMap<i32, f64>>,
}

impl FloorDemandProfile {
    /// Aggregate hall calls by the state of the bucket they fall in.
    /// `timeline` pairs bucket starts with their classified state.
    pub fn build(
        events: &[EventRecord],
        timeline: &[(NaiveDateTime, TrafficState)],
        bucket_minutes: u32,
    ) -> Self {
        let state_at: HashMap<NaiveDateTime, TrafficState> = timeline.iter().copied().collect();
        let mut counts: HashMap<TrafficState, BTreeMap<i32, f64>> = HashMap::new();
        let mut unmatched = 0usize;

        for event in events.iter().filter(|e| e.kind == EventKind::HallCall) {
            match state_at.get(&bucket_start(event.timestamp, bucket_minutes)) {
                Some(&state) => {
                    *counts.entry(state).or_default().entry(event.floor).or_insert(0.0) += 1.0;
                }
                None => unmatched += 1,
            }
        }
        if unmatched > 0 {
            debug!("{} hall calls fell outside the state timeline", unmatched);
        }

        let profile = Self::from_weights(counts);
        info!(
            "Floor-demand profile covers states: {:?}",
            profile.states()
        );
        profile
    }

    /// Normalise arbitrary non-negative weights; states with no mass are dropped.
    pub fn from_weights(raw: HashMap<TrafficState, BTreeMap<i32, f64>>) -> Self {
        let weights = raw
            .into_iter()
            .filter_map(|(state, floors)| {
                let total: f64 = floors.values().filter(|w| **w > 0.0).sum();
                if total <= 0.0 {
                    return None;
                }
                let normalised = floors
                    .into_iter()
                    .filter(|(_, w)| *w > 0.0)
                    .map(|(f, w)| (f, w / total))
                    .collect();
                Some((state, normalised))
            })
            .collect();
        Self { weights }
    }

    pub fn weights(&self, state: TrafficState) -> Option<&BTreeMap<i32, f64>> {
        self.weights.get(&state)
    }

    pub fn states(&self) -> Vec<TrafficState> {
        let mut states: Vec<TrafficState> = self.weights.keys().copied().collect();
        states.sort();
        states
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}
