use chrono::{DateTime, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::IngestConfig;
use crate::errors::ParseError;
use crate::models::{Direction, EventKind, EventPayload, EventRecord};

/// Which cleaned event table a CSV file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFileKind {
    HallCalls,
    CarCalls,
    CarStops,
    CarDepartures,
    LoadChanges,
    Maintenance,
}

impl EventFileKind {
    fn event_kind(self) -> EventKind {
        match self {
            EventFileKind::HallCalls => EventKind::HallCall,
            EventFileKind::CarCalls => EventKind::CarCall,
            EventFileKind::CarStops => EventKind::CarStop,
            EventFileKind::CarDepartures => EventKind::CarDeparture,
            EventFileKind::LoadChanges => EventKind::LoadChange,
            EventFileKind::Maintenance => EventKind::Maintenance,
        }
    }

    /// Building-wide tables may omit the floor column; such rows carry floor 0.
    fn requires_floor(self) -> bool {
        matches!(
            self,
            EventFileKind::HallCalls | EventFileKind::CarCalls | EventFileKind::CarStops
        )
    }
}

#[derive(Debug, Default)]
pub struct ParsedEvents {
    pub records: Vec<EventRecord>,
    pub discarded: usize,
}

// Fallback formats tried in order after the configured one.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M",
];

/// Parse a timestamp, trying the configured format first.
pub fn parse_timestamp(raw: &str, format: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(fmt) = format {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local())
}

fn parse_floor(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    raw.parse::<i32>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i32))
}

/// Car identifiers appear as `3`, `E3` or `Elevator 3`; the digits are the id.
fn parse_car_id(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_maintenance_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on" | "maint"
    )
}

struct ColumnIndex {
    time: usize,
    floor: Option<usize>,
    direction: Option<usize>,
    elevator: Option<usize>,
    load: Option<usize>,
    status: Option<usize>,
    action: Option<usize>,
}

fn field<'a>(record: &'a StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn parse_events(
    file_path: &Path,
    kind: EventFileKind,
    ingest: &IngestConfig,
) -> Result<ParsedEvents, ParseError> {
    let file = File::open(file_path).map_err(|e| ParseError::IoError {
        path: file_path.to_path_buf(),
        source: e,
    })?;
    let parsed = parse_events_from_reader(file, file_path, kind, ingest)?;
    info!(
        "Parsed {} {:?} records from {}",
        parsed.records.len(),
        kind,
        file_path.display()
    );
    Ok(parsed)
}

/// Parse from any reader; `source` is only used for error reporting.
pub fn parse_events_from_reader<R: Read>(
    reader: R,
    source: &Path,
    kind: EventFileKind,
    ingest: &IngestConfig,
) -> Result<ParsedEvents, ParseError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| ParseError::HeaderReadError {
            path: source.to_path_buf(),
            source: e,
        })?
        .clone();
    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_string(), i))
        .collect();
    let lookup = |name: &str| header_map.get(name).copied();

    let required = |name: &str| {
        lookup(name).ok_or_else(|| ParseError::MissingColumn {
            path: source.to_path_buf(),
            column: name.to_string(),
        })
    };

    let columns = ColumnIndex {
        time: required(&ingest.time_column)?,
        floor: if kind.requires_floor() {
            Some(required(&ingest.floor_column)?)
        } else {
            lookup(&ingest.floor_column)
        },
        direction: lookup(&ingest.direction_column),
        elevator: lookup(&ingest.elevator_column),
        load: lookup(&ingest.load_column),
        status: lookup(&ingest.status_column),
        action: lookup(&ingest.action_column),
    };

    if kind == EventFileKind::LoadChanges && columns.load.is_none() {
        return Err(ParseError::MissingColumn {
            path: source.to_path_buf(),
            column: ingest.load_column.clone(),
        });
    }

    let mut parsed = ParsedEvents::default();
    for (row_idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let row = row_idx + 2;
        let record = result.map_err(|e| ParseError::RowReadError {
            path: source.to_path_buf(),
            row,
            source: e,
        })?;

        match build_event(&record, &columns, kind, ingest) {
            Some(event) => parsed.records.push(event),
            None => {
                debug!("Discarding row {} of {}: {:?}", row, source.display(), record);
                parsed.discarded += 1;
            }
        }
    }

    if parsed.discarded > 0 {
        warn!(
            "Discarded {} rows without a usable timestamp/floor in {}",
            parsed.discarded,
            source.display()
        );
    }

    parsed.records.sort_by_key(|e| e.timestamp);
    Ok(parsed)
}

fn build_event(
    record: &StringRecord,
    columns: &ColumnIndex,
    kind: EventFileKind,
    ingest: &IngestConfig,
) -> Option<EventRecord> {
    let timestamp = parse_timestamp(
        field(record, Some(columns.time))?,
        ingest.timestamp_format.as_deref(),
    )?;

    let floor = match field(record, columns.floor) {
        Some(raw) => parse_floor(raw)?,
        None if kind.requires_floor() => return None,
        None => 0,
    };

    let direction = field(record, columns.direction)
        .map(Direction::parse_lenient)
        .unwrap_or(Direction::Unknown);
    let car_id = field(record, columns.elevator).and_then(parse_car_id);
    let action = field(record, columns.action).map(str::to_string);

    let payload = match kind {
        EventFileKind::LoadChanges => {
            let percent = field(record, columns.load)?.parse::<f64>().ok()?;
            EventPayload::Load { percent }
        }
        EventFileKind::Maintenance => {
            let active = field(record, columns.status)
                .or_else(|| field(record, columns.action))
                .map(parse_maintenance_flag)
                .unwrap_or(true);
            EventPayload::Maintenance { active }
        }
        EventFileKind::CarCalls => action.map(EventPayload::CallAction).unwrap_or(EventPayload::None),
        EventFileKind::CarStops => action.map(EventPayload::StopReason).unwrap_or(EventPayload::None),
        EventFileKind::HallCalls | EventFileKind::CarDepartures => EventPayload::None,
    };

    Some(EventRecord {
        timestamp,
        floor,
        direction,
        car_id,
        kind: kind.event_kind(),
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn parse(csv: &str, kind: EventFileKind) -> Result<ParsedEvents, ParseError> {
        parse_events_from_reader(
            csv.as_bytes(),
            Path::new("memory.csv"),
            kind,
            &IngestConfig::default(),
        )
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2025-03-04 08:15:00", None), Some(expected));
        assert_eq!(parse_timestamp("2025-03-04T08:15:00", None), Some(expected));
        assert_eq!(parse_timestamp("2025/03/04 08:15:00", None), Some(expected));
        assert_eq!(parse_timestamp("2025-03-04 08:15", None), Some(expected));
        assert_eq!(parse_timestamp("04.03.2025 08:15", Some("%d.%m.%Y %H:%M")), Some(expected));
        assert_eq!(parse_timestamp("not a time", None), None);
    }

    #[test]
    fn test_hall_calls_discard_rows_without_floor_or_time() {
        let csv = "Time,Floor,Direction,Elevator\n\
                   2025-03-04 08:15:00,1,Up,E1\n\
                   2025-03-04 08:16:00,,Up,E2\n\
                   garbage,3,Down,E3\n\
                   2025-03-04 08:14:00,-1,down,\n";
        let parsed = parse(csv, EventFileKind::HallCalls).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.discarded, 2);
        // sorted by time
        assert_eq!(parsed.records[0].floor, -1);
        assert_eq!(parsed.records[0].direction, Direction::Down);
        assert_eq!(parsed.records[0].car_id, None);
        assert_eq!(parsed.records[1].car_id, Some(1));
        assert_eq!(parsed.records[1].kind, EventKind::HallCall);
    }

    #[test]
    fn test_missing_floor_column_is_an_error_for_hall_calls() {
        let err = parse("Time,Direction\n2025-03-04 08:15:00,Up\n", EventFileKind::HallCalls)
            .unwrap_err();
        assert!(matches!(err, ParseError::MissingColumn { ref column, .. } if column == "Floor"));
    }

    #[test]
    fn test_maintenance_and_load_payloads() {
        let maint = parse(
            "Time,Status\n2025-03-04 08:00:00,maint\n2025-03-04 09:00:00,0\n",
            EventFileKind::Maintenance,
        )
        .unwrap();
        assert_eq!(maint.records[0].maintenance_active(), Some(true));
        assert_eq!(maint.records[1].maintenance_active(), Some(false));
        assert_eq!(maint.records[0].floor, 0);

        let load = parse(
            "Time,Elevator,Load\n2025-03-04 08:00:00,2,45.5\n2025-03-04 08:01:00,2,n/a\n",
            EventFileKind::LoadChanges,
        )
        .unwrap();
        assert_eq!(load.records.len(), 1);
        assert_eq!(load.records[0].load_percent(), Some(45.5));
        assert_eq!(load.discarded, 1);
    }
}
