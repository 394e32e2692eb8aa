use crate::error::LoadError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use uuid::Uuid;

const TIMESTAMP_COLUMN: &str = "timestamp";
const SENSOR_ID_COLUMN: &str = "sensor_id";
const VALUE_COLUMNS: [&str; 2] = ["temperature_c", "value"];

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%d %H:%M%:z",
];
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One validated sensor observation.
///
/// `ts` is the trimmed source text and is what goes on the wire; `timestamp` is the parsed
/// instant used for filtering, ordering and pacing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub ts: String,
    #[serde(skip)]
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    /// 1-based line in the source, counting the header as row 1.
    pub row: usize,
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for SkippedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: invalid {} {:?} ({})",
            self.row, self.field, self.value, self.reason
        )
    }
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub readings: Vec<Reading>,
    pub skipped: Vec<SkippedRow>,
}

/// Parses an ISO-8601 timestamp. Seconds may be omitted, and a bare date means midnight.
/// A trailing `Z` or explicit offset is honored; anything without an offset is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    let with_offset = match raw.strip_suffix(['Z', 'z']) {
        Some(stripped) => format!("{stripped}+00:00"),
        None => raw.to_string(),
    };
    if let Some(parsed) = OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&with_offset, fmt).ok())
    {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
    {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn load_readings(path: &Path) -> Result<LoadReport, LoadError> {
    let file = File::open(path).map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => LoadError::SourceNotFound(path.to_path_buf()),
        _ => LoadError::Read {
            path: path.to_path_buf(),
            source: err,
        },
    })?;
    read_readings(file)
}

/// Reads readings from any CSV source. Bad rows are dropped with a warning and recorded in
/// the report; only a broken header or an I/O failure aborts the load.
pub fn read_readings<R: Read>(source: R) -> Result<LoadReport, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(source);
    let columns = Columns::locate(reader.headers()?)?;

    let mut report = LoadReport::default();
    for (index, record) in reader.records().enumerate() {
        let row = index + 2;
        let outcome = match record {
            Ok(record) => columns.parse(row, &record),
            Err(err) if matches!(err.kind(), csv::ErrorKind::Io(_)) => {
                return Err(LoadError::Csv(err));
            }
            Err(err) => Err(SkippedRow {
                row,
                field: "row",
                value: String::new(),
                reason: err.to_string(),
            }),
        };
        match outcome {
            Ok(reading) => report.readings.push(reading),
            Err(skipped) => {
                tracing::warn!(
                    row = skipped.row,
                    field = skipped.field,
                    value = %skipped.value,
                    reason = %skipped.reason,
                    "skipping invalid row"
                );
                report.skipped.push(skipped);
            }
        }
    }

    Ok(report)
}

struct Columns {
    timestamp: usize,
    sensor_id: usize,
    value: usize,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, LoadError> {
        let position = |name: &str| headers.iter().position(|header| header == name);

        let timestamp = position(TIMESTAMP_COLUMN);
        let sensor_id = position(SENSOR_ID_COLUMN);
        let value = VALUE_COLUMNS.iter().find_map(|name| position(name));

        match (timestamp, sensor_id, value) {
            (Some(timestamp), Some(sensor_id), Some(value)) => Ok(Self {
                timestamp,
                sensor_id,
                value,
            }),
            _ => {
                let mut missing = Vec::new();
                if timestamp.is_none() {
                    missing.push(TIMESTAMP_COLUMN.to_string());
                }
                if sensor_id.is_none() {
                    missing.push(SENSOR_ID_COLUMN.to_string());
                }
                if value.is_none() {
                    missing.push(VALUE_COLUMNS.join("|"));
                }
                Err(LoadError::MissingColumns { missing })
            }
        }
    }

    fn parse(&self, row: usize, record: &csv::StringRecord) -> Result<Reading, SkippedRow> {
        let skip = |field: &'static str, value: &str, reason: &str| SkippedRow {
            row,
            field,
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let ts = record
            .get(self.timestamp)
            .map(str::trim)
            .ok_or_else(|| skip(TIMESTAMP_COLUMN, "", "missing field"))?;
        let sensor_id = record
            .get(self.sensor_id)
            .map(str::trim)
            .ok_or_else(|| skip(SENSOR_ID_COLUMN, "", "missing field"))?;
        let raw_value = record
            .get(self.value)
            .map(str::trim)
            .ok_or_else(|| skip("value", "", "missing field"))?;

        let value = raw_value
            .parse::<f64>()
            .map_err(|err| skip("value", raw_value, &err.to_string()))?;
        if !value.is_finite() {
            return Err(skip("value", raw_value, "not a finite number"));
        }

        let timestamp = parse_timestamp(ts)
            .ok_or_else(|| skip(TIMESTAMP_COLUMN, ts, "not an ISO-8601 timestamp"))?;
        Uuid::parse_str(sensor_id).map_err(|err| skip(SENSOR_ID_COLUMN, sensor_id, &err.to_string()))?;

        Ok(Reading {
            ts: ts.to_string(),
            timestamp,
            sensor_id: sensor_id.to_string(),
            value,
        })
    }
}

/// Inclusive timestamp window; a missing bound is open on that side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }
}

pub fn filter_by_time_range(readings: Vec<Reading>, range: &TimeRange) -> Vec<Reading> {
    readings
        .into_iter()
        .filter(|reading| range.contains(reading.timestamp))
        .collect()
}

/// Earliest and latest instant in the set.
pub fn time_span(readings: &[Reading]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let first = readings.iter().map(|r| r.timestamp).min()?;
    let last = readings.iter().map(|r| r.timestamp).max()?;
    Some((first, last))
}
