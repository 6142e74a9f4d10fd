//! Record-level checks applied after parsing.

use log::{debug, warn};

use crate::config::BuildingConfig;
use crate::models::{EventKind, EventRecord, FloorRange};

/// Validates one event against the building's physical bounds.
///
/// Checks:
/// - Floor lies within the building range (floor-bearing events only).
/// - Load readings lie within 0..=100 %.
pub fn validate_record(record: &EventRecord, range: &FloorRange) -> Result<(), String> {
    if carries_floor(record.kind) && !range.contains(record.floor) {
        return Err(format!(
            "Floor {} outside building range {}..={}",
            record.floor, range.min, range.max
        ));
    }
    if let Some(load) = record.load_percent() {
        if !(0.0..=100.0).contains(&load) || load.is_nan() {
            return Err(format!("Load {} out of range (0 to 100)", load));
        }
    }
    Ok(())
}

fn carries_floor(kind: EventKind) -> bool {
    matches!(kind, EventKind::HallCall | EventKind::CarCall | EventKind::CarStop)
}

/// Drops invalid records, returning the survivors and the number rejected.
pub fn retain_valid(records: Vec<EventRecord>, range: &FloorRange) -> (Vec<EventRecord>, usize) {
    let total = records.len();
    let kept: Vec<EventRecord> = records
        .into_iter()
        .filter(|r| match validate_record(r, range) {
            Ok(()) => true,
            Err(reason) => {
                debug!("Rejecting {:?} event at {}: {}", r.kind, r.timestamp, reason);
                false
            }
        })
        .collect();
    let rejected = total - kept.len();
    if rejected > 0 {
        warn!("Rejected {} of {} events failing validation", rejected, total);
    }
    (kept, rejected)
}

/// Building floor range: configured bounds win, otherwise the span of observed floors.
pub fn resolve_floor_range(events: &[EventRecord], building: &BuildingConfig) -> Option<FloorRange> {
    let observed = events
        .iter()
        .filter(|e| carries_floor(e.kind))
        .map(|e| e.floor)
        .chain(std::iter::once(building.lobby_floor));
    let (mut lo, mut hi) = (i32::MAX, i32::MIN);
    for f in observed {
        lo = lo.min(f);
        hi = hi.max(f);
    }
    let range = FloorRange::new(building.min_floor.unwrap_or(lo), building.max_floor.unwrap_or(hi));
    if range.is_empty() {
        None
    } else {
        Some(range)
    }
}
