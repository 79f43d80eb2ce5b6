//! Stream routing
//!
//! The router drives one robot session: every line is normalized, written to
//! the passthrough stream, classified, and handed to the heartbeat tracker or
//! the transaction matcher, whose annotated line goes to the matching stream.

use crate::classifier::{transaction_threshold, FrameClassifier};
use crate::config::ColumnConfig;
use crate::error::CanParseError;
use crate::heartbeat::HeartbeatTracker;
use crate::normalizer::TimestampNormalizer;
use crate::transaction::{sdo_index, TransactionMatcher};
use crate::types::{
    CobId, FileStats, FrameClass, HeartbeatSummary, TimestampedRecord, TransactionSummary,
};
use std::io::{BufRead, Write};
use tracing::debug;

/// The three derived streams of a robot
#[derive(Debug)]
pub struct OutputStreams<W: Write> {
    pub heartbeats: W,
    pub transactions: W,
    pub timestamped: W,
}

impl<W: Write> OutputStreams<W> {
    pub fn flush(&mut self) -> Result<(), CanParseError> {
        self.heartbeats.flush()?;
        self.transactions.flush()?;
        self.timestamped.flush()?;
        Ok(())
    }
}

/// Column positions resolved from the session's first header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnLayout {
    id: usize,
    payload: usize,
}

impl ColumnLayout {
    fn resolve(header: &str, columns: &ColumnConfig) -> Result<Self, CanParseError> {
        let names: Vec<&str> = header.split(';').map(str::trim).collect();
        let position = |name: &str| {
            names
                .iter()
                .position(|column| *column == name)
                .ok_or_else(|| CanParseError::MissingColumn(name.to_string()))
        };

        Ok(Self {
            id: position(columns.id.as_str())?,
            payload: position(columns.payload.as_str())?,
        })
    }
}

/// Per-robot router holding all classification state
pub struct StreamRouter {
    classifier: &'static FrameClassifier,
    columns: ColumnConfig,
    layout: Option<ColumnLayout>,
    heartbeats: HeartbeatTracker,
    transactions: TransactionMatcher,
}

impl StreamRouter {
    /// Router for the fleet registry
    pub fn new(columns: ColumnConfig) -> Self {
        Self::with_classifier(FrameClassifier::shared(), columns)
    }

    pub fn with_classifier(classifier: &'static FrameClassifier, columns: ColumnConfig) -> Self {
        Self {
            classifier,
            columns,
            layout: None,
            heartbeats: HeartbeatTracker::new(),
            transactions: TransactionMatcher::new(
                classifier.request_id(),
                classifier.response_id(),
            ),
        }
    }

    /// Route one input file; its first line must be the column header
    pub fn route_file<R: BufRead, W: Write>(
        &mut self,
        reader: R,
        out: &mut OutputStreams<W>,
        stats: &mut FileStats,
    ) -> Result<(), CanParseError> {
        let mut lines = reader.split(b'\n');

        match lines.next() {
            Some(header) => self.route_header(&String::from_utf8_lossy(&header?), out)?,
            None => return Ok(()),
        }

        for line in lines {
            let line = match String::from_utf8(line?) {
                Ok(line) => line,
                Err(e) => {
                    debug!(error = %e, "skipping record with invalid UTF-8");
                    stats.processed += 1;
                    stats.skipped += 1;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            self.route_record(&line, out, stats)?;
        }

        Ok(())
    }

    /// Capture the first header of the session and write it to the heartbeat
    /// stream; later headers are skipped.
    pub fn route_header<W: Write>(
        &mut self,
        line: &str,
        out: &mut OutputStreams<W>,
    ) -> Result<(), CanParseError> {
        if self.layout.is_some() {
            debug!("skipping repeated header");
            return Ok(());
        }

        let header = line.trim_end_matches(['\r', '\n']);
        self.layout = Some(ColumnLayout::resolve(header, &self.columns)?);
        writeln!(out.heartbeats, "{}", header)?;
        Ok(())
    }

    /// Route one data record.
    ///
    /// Record-level errors are counted in `stats` and swallowed.
    pub fn route_record<W: Write>(
        &mut self,
        line: &str,
        out: &mut OutputStreams<W>,
        stats: &mut FileStats,
    ) -> Result<(), CanParseError> {
        stats.processed += 1;

        let record = match TimestampNormalizer::normalize(line) {
            Ok(Some(record)) => record,
            Ok(None) => {
                stats.dropped += 1;
                return Ok(());
            }
            Err(e) if e.is_record_level() => {
                debug!(error = %e, "skipping record");
                stats.skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        writeln!(out.timestamped, "{}", record.line)?;
        stats.timestamped += 1;

        let layout = self
            .layout
            .ok_or_else(|| CanParseError::MissingColumn(self.columns.id.clone()))?;
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(';').collect();

        let routed = self.route_classified(&fields, layout, &record, out, stats);

        match routed {
            Err(e) if e.is_record_level() => {
                debug!(error = %e, "skipping classification of record");
                stats.skipped += 1;
                Ok(())
            }
            other => other,
        }
    }

    fn route_classified<W: Write>(
        &mut self,
        fields: &[&str],
        layout: ColumnLayout,
        record: &TimestampedRecord,
        out: &mut OutputStreams<W>,
        stats: &mut FileStats,
    ) -> Result<(), CanParseError> {
        let id = CobId::from_hex(field(fields, layout.id, &self.columns.id)?)?;

        match self.classifier.classify(id) {
            FrameClass::Heartbeat { threshold } => {
                let annotation = self.heartbeats.observe(id, record.timestamp, threshold);
                writeln!(out.heartbeats, "{}", annotation.render(&record.line))?;
                stats.heartbeats += 1;
            }
            FrameClass::Transaction => {
                let payload = field(fields, layout.payload, &self.columns.payload)?;
                let index = sdo_index(payload)?;
                let annotation =
                    self.transactions
                        .observe(id, record.timestamp, index, transaction_threshold());
                writeln!(out.transactions, "{}", annotation.render(&record.line))?;
                stats.transactions += 1;
            }
            FrameClass::Unclassified => {}
        }

        Ok(())
    }

    pub fn heartbeat_summary(&self) -> Vec<HeartbeatSummary> {
        self.heartbeats.summary()
    }

    pub fn transaction_summary(&self) -> TransactionSummary {
        self.transactions.summary()
    }
}

fn field<'a>(fields: &[&'a str], index: usize, name: &str) -> Result<&'a str, CanParseError> {
    fields
        .get(index)
        .copied()
        .ok_or_else(|| CanParseError::MissingField {
            field: name.to_string(),
        })
}
