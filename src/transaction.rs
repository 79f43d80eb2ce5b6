//! PSU SDO transaction matching
//!
//! The PSU configuration protocol is a strict alternation of the two SDO
//! identifiers of the PSU node. An exchange is opened by a frame on the response
//! identifier and closed by the following frame on the request identifier; both
//! carry the same object index. Only one exchange is in flight at a time.

use crate::error::CanParseError;
use crate::heartbeat::FAILURE_MARKER;
use crate::types::{format_latency, CobId, TransactionSummary};
use chrono::{DateTime, Duration, Utc};

/// The most recent transaction frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTransaction {
    pub id: CobId,
    pub timestamp: DateTime<Utc>,
    pub index: u16,
}

/// Annotation produced for one transaction frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAnnotation {
    /// Nothing to report (opening frame, or first frame of a session)
    None,
    /// Completed pair with its round-trip time
    Latency { latency: Duration, failure: bool },
    TwoResponsesInARow,
    TwoRequestsInARow,
    IndexMismatch,
}

impl TransactionAnnotation {
    pub fn is_failure(&self) -> bool {
        match self {
            TransactionAnnotation::None => false,
            TransactionAnnotation::Latency { failure, .. } => *failure,
            _ => true,
        }
    }

    /// Append the annotation to a normalized line
    pub fn render(&self, line: &str) -> String {
        match self {
            TransactionAnnotation::None => line.to_string(),
            TransactionAnnotation::Latency { latency, failure } => {
                let mut annotated = format!("{}\t({})", line, format_latency(*latency));
                if *failure {
                    annotated.push_str(FAILURE_MARKER);
                }
                annotated
            }
            TransactionAnnotation::TwoResponsesInARow => {
                format!("{}{} - two responses in a row", line, FAILURE_MARKER)
            }
            TransactionAnnotation::TwoRequestsInARow => {
                format!("{}{} - two requests in a row", line, FAILURE_MARKER)
            }
            TransactionAnnotation::IndexMismatch => {
                format!("{}{} - indexes don't match", line, FAILURE_MARKER)
            }
        }
    }
}

/// Single-slot matcher for the PSU SDO exchange
#[derive(Debug, Clone)]
pub struct TransactionMatcher {
    request_id: CobId,
    response_id: CobId,
    active: Option<ActiveTransaction>,
    stats: TransactionSummary,
}

impl TransactionMatcher {
    pub fn new(request_id: CobId, response_id: CobId) -> Self {
        Self {
            request_id,
            response_id,
            active: None,
            stats: TransactionSummary::default(),
        }
    }

    /// Evaluate a transaction frame against the active slot.
    ///
    /// Any identifier other than the response identifier is treated as the
    /// request side. The slot is overwritten with the current frame afterwards,
    /// protocol violations included.
    pub fn observe(
        &mut self,
        id: CobId,
        timestamp: DateTime<Utc>,
        index: u16,
        threshold: Duration,
    ) -> TransactionAnnotation {
        let annotation = match self.active {
            None => TransactionAnnotation::None,
            Some(active) if id == self.response_id => {
                if active.id == self.response_id {
                    TransactionAnnotation::TwoResponsesInARow
                } else {
                    TransactionAnnotation::None
                }
            }
            Some(active) if active.id == self.request_id => {
                TransactionAnnotation::TwoRequestsInARow
            }
            Some(active) if active.index == index => {
                let latency = timestamp - active.timestamp;
                TransactionAnnotation::Latency {
                    latency,
                    failure: latency > threshold,
                }
            }
            Some(_) => TransactionAnnotation::IndexMismatch,
        };

        self.active = Some(ActiveTransaction {
            id,
            timestamp,
            index,
        });
        self.record(&annotation);

        annotation
    }

    fn record(&mut self, annotation: &TransactionAnnotation) {
        self.stats.frames += 1;
        match annotation {
            TransactionAnnotation::None => {}
            TransactionAnnotation::Latency { failure, .. } => {
                self.stats.pairs += 1;
                if *failure {
                    self.stats.latency_failures += 1;
                }
            }
            TransactionAnnotation::TwoResponsesInARow => self.stats.two_responses += 1,
            TransactionAnnotation::TwoRequestsInARow => self.stats.two_requests += 1,
            TransactionAnnotation::IndexMismatch => self.stats.index_mismatches += 1,
        }
    }

    /// The frame the next one will be compared against
    pub fn active(&self) -> Option<&ActiveTransaction> {
        self.active.as_ref()
    }

    pub fn summary(&self) -> TransactionSummary {
        self.stats
    }
}

/// Extract the SDO object index from a hex payload.
///
/// Byte 0 is the command specifier; the index is stored little-endian in bytes
/// 1 and 2.
pub fn sdo_index(payload: &str) -> Result<u16, CanParseError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes =
        hex::decode(&compact).map_err(|e| CanParseError::InvalidPayload(format!("{}: {}", payload, e)))?;

    match bytes.get(1..3) {
        Some([low, high]) => Ok(u16::from_le_bytes([*low, *high])),
        _ => Err(CanParseError::InvalidPayload(format!(
            "{}: expected at least 3 bytes",
            payload
        ))),
    }
}
