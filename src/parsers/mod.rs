pub mod csv_parser;

pub use csv_parser::{parse_events, parse_events_from_reader, parse_timestamp, EventFileKind, ParsedEvents};
