//! Core types for the CANEdge parser
//!
//! This module defines the values that flow between the pipeline stages:
//! identifiers, normalized records, frame classes, and the counters that end up
//! in the per-run report.

use crate::error::CanParseError;
use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// CANopen COB-ID of a bus frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CobId(pub u16);

impl CobId {
    /// Parse a hexadecimal identifier as written in the `ID` column (`"705"`, `"0x80"`)
    pub fn from_hex(raw: &str) -> Result<Self, CanParseError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        u16::from_str_radix(digits, 16)
            .map(CobId)
            .map_err(|_| CanParseError::InvalidIdentifier(raw.to_string()))
    }
}

impl fmt::Display for CobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl Serialize for CobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{:X}", self.0))
    }
}

/// A record whose leading epoch timestamp was replaced by a calendar timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedRecord {
    /// Rewritten line, without line terminator
    pub line: String,
    /// Parsed instant of the original epoch timestamp
    pub timestamp: DateTime<Utc>,
}

/// Class of a frame, decided by its COB-ID alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Periodic liveness frame with its maximum allowed inter-arrival time
    Heartbeat { threshold: Duration },
    /// PSU SDO request or response
    Transaction,
    /// Written to the passthrough stream only
    Unclassified,
}

/// Render a latency as seconds with microsecond precision (`0.010000`)
pub fn format_latency(latency: Duration) -> String {
    let micros = latency.num_microseconds().unwrap_or(i64::MAX);
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    format!("{sign}{}.{:06}", abs / 1_000_000, abs % 1_000_000)
}

/// Latency as fractional seconds, for reports
pub fn latency_seconds(latency: Duration) -> f64 {
    latency.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}

/// Counters for one processed input file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    pub file: PathBuf,
    /// Data lines read (header excluded)
    pub processed: u64,
    /// Lines whose timestamp did not have the epoch shape
    pub dropped: u64,
    /// Lines rejected by a record-level error
    pub skipped: u64,
    pub timestamped: u64,
    pub heartbeats: u64,
    pub transactions: u64,
}

/// Failure summary of one heartbeat identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatSummary {
    pub id: CobId,
    pub frames: u64,
    pub failures: u64,
    pub min_failure_latency_s: Option<f64>,
}

/// Counters of the PSU SDO transaction matcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub frames: u64,
    pub pairs: u64,
    pub latency_failures: u64,
    pub two_responses: u64,
    pub two_requests: u64,
    pub index_mismatches: u64,
}

impl TransactionSummary {
    pub fn failures(&self) -> u64 {
        self.latency_failures + self.two_responses + self.two_requests + self.index_mismatches
    }
}

/// Outcome of processing one bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Processed,
    MissingInput,
    NoLogFiles,
    Failed,
}

/// Per-bot section of the run report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotReport {
    pub bot: String,
    pub status: BotStatus,
    pub files: Vec<FileStats>,
    pub heartbeats: Vec<HeartbeatSummary>,
    pub transactions: TransactionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BotReport {
    /// Report for a bot that produced no output
    pub fn empty(bot: &str, status: BotStatus) -> Self {
        Self {
            bot: bot.to_string(),
            status,
            files: Vec::new(),
            heartbeats: Vec::new(),
            transactions: TransactionSummary::default(),
            error: None,
        }
    }

    /// Report for a bot whose session stopped on a fatal error
    pub fn failed(bot: &str, error: &CanParseError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::empty(bot, BotStatus::Failed)
        }
    }
}

/// Report of one `process_bots` run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub producer: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bots: Vec<BotReport>,
}
