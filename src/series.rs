//! Heartbeat latency series
//!
//! Reads back a heartbeat log written by the router and extracts, for one
//! COB-ID, the latency time series a plotting tool renders. Lines follow the
//! router's shape: calendar timestamp, the remaining CSV fields, then a tab and
//! a parenthesized latency in seconds, optionally followed by ` - FAILURE`.

use crate::error::CanParseError;
use crate::heartbeat::FAILURE_MARKER;
use crate::normalizer::{format_calendar, parse_calendar};
use crate::types::CobId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{BufRead, Write};
use tracing::debug;

/// One point of a latency series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySample {
    pub timestamp: DateTime<Utc>,
    pub latency_s: f64,
    pub failure: bool,
}

/// Identifier and optional time window to extract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    pub id: CobId,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl SeriesQuery {
    pub fn new(id: CobId) -> Self {
        Self {
            id,
            start: None,
            end: None,
        }
    }

    /// Restrict to `[start, end]`, both inclusive
    pub fn with_window(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// A parsed heartbeat log line
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedLine {
    pub timestamp: DateTime<Utc>,
    pub id: CobId,
    pub latency_s: Option<f64>,
    pub failure: bool,
}

/// Parse one heartbeat log line; `id_column` is the position of the COB-ID field
pub fn parse_annotated_line(line: &str, id_column: usize) -> Result<AnnotatedLine, CanParseError> {
    let (body, annotation) = line.split_once('\t').unwrap_or((line, ""));
    let fields: Vec<&str> = body.split(';').collect();

    let timestamp = parse_calendar(fields[0])?;
    let id = fields
        .get(id_column)
        .ok_or_else(|| CanParseError::MissingField {
            field: format!("column {}", id_column),
        })
        .and_then(|raw| CobId::from_hex(raw))?;

    let latency_s = match annotation
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
    {
        Some((value, _)) => Some(value.trim().parse::<f64>().map_err(|e| {
            CanParseError::InvalidLatency(format!("{}: {}", value, e))
        })?),
        None => None,
    };

    Ok(AnnotatedLine {
        timestamp,
        id,
        latency_s,
        failure: annotation.contains(FAILURE_MARKER),
    })
}

/// Read the latency samples matching `query` from a heartbeat log.
///
/// The first line must be the column header; lines that do not parse (repeated
/// headers from earlier runs, truncated lines) are skipped.
pub fn read_latency_series<R: BufRead>(
    reader: R,
    query: &SeriesQuery,
    id_column: &str,
) -> Result<Vec<LatencySample>, CanParseError> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(header) => header?,
        None => return Ok(Vec::new()),
    };
    let id_index = header
        .split(';')
        .position(|column| column.trim() == id_column)
        .ok_or_else(|| CanParseError::MissingColumn(id_column.to_string()))?;

    let mut samples = Vec::new();
    for line in lines {
        let line = line?;
        let parsed = match parse_annotated_line(&line, id_index) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "skipping heartbeat line");
                continue;
            }
        };

        if parsed.id != query.id || !query.contains(parsed.timestamp) {
            continue;
        }
        if let Some(latency_s) = parsed.latency_s {
            samples.push(LatencySample {
                timestamp: parsed.timestamp,
                latency_s,
                failure: parsed.failure,
            });
        }
    }

    Ok(samples)
}

/// Write samples as `;`-separated CSV with a header row
pub fn write_csv<W: Write>(samples: &[LatencySample], mut writer: W) -> Result<(), CanParseError> {
    writeln!(writer, "timestamp;latency_s;failure")?;
    for sample in samples {
        writeln!(
            writer,
            "{};{:.6};{}",
            format_calendar(&sample.timestamp),
            sample.latency_s,
            sample.failure
        )?;
    }
    writer.flush()?;
    Ok(())
}
