//! Heartbeat interval tracking
//!
//! This module keeps, per heartbeat COB-ID, the arrival time of the previous
//! frame and compares every new inter-arrival time against the identifier's
//! threshold. State lives for one robot session and spans its input files.

use crate::types::{format_latency, latency_seconds, CobId, HeartbeatSummary};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Marker appended to lines that exceed a threshold
pub const FAILURE_MARKER: &str = " - FAILURE";

/// Interval state of a single identifier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalState {
    /// Arrival of the previous frame, absent until the first frame
    pub previous: Option<DateTime<Utc>>,
    /// Frames seen with this identifier
    pub frames: u64,
    /// Inter-arrival times above the threshold
    pub failures: u64,
    /// Smallest inter-arrival time that still failed
    pub min_failure: Option<Duration>,
}

/// Annotation produced for one heartbeat frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatAnnotation {
    /// Inter-arrival time, absent for the first frame of an identifier
    pub latency: Option<Duration>,
    pub failure: bool,
}

impl HeartbeatAnnotation {
    /// Append the annotation to a normalized line
    pub fn render(&self, line: &str) -> String {
        let mut annotated = line.to_string();
        if let Some(latency) = self.latency {
            annotated.push_str(&format!("\t({})", format_latency(latency)));
            if self.failure {
                annotated.push_str(FAILURE_MARKER);
            }
        }
        annotated
    }
}

/// Per-identifier heartbeat interval tracker
#[derive(Debug, Clone, Default)]
pub struct HeartbeatTracker {
    states: HashMap<CobId, IntervalState>,
}

impl HeartbeatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat arrival and compare it to `threshold`.
    ///
    /// The first frame of an identifier only establishes the baseline. A frame
    /// fails when its inter-arrival time is strictly greater than `threshold`.
    pub fn observe(
        &mut self,
        id: CobId,
        timestamp: DateTime<Utc>,
        threshold: Duration,
    ) -> HeartbeatAnnotation {
        let state = self.states.entry(id).or_default();
        state.frames += 1;

        let Some(previous) = state.previous.replace(timestamp) else {
            return HeartbeatAnnotation {
                latency: None,
                failure: false,
            };
        };

        let delta = timestamp - previous;
        let failure = delta > threshold;
        if failure {
            state.failures += 1;
            if state.min_failure.map_or(true, |min| delta < min) {
                state.min_failure = Some(delta);
            }
        }

        HeartbeatAnnotation {
            latency: Some(delta),
            failure,
        }
    }

    /// Current state of an identifier
    pub fn state(&self, id: CobId) -> Option<&IntervalState> {
        self.states.get(&id)
    }

    /// Failure summary of every identifier seen, ordered by COB-ID
    pub fn summary(&self) -> Vec<HeartbeatSummary> {
        let mut summary: Vec<HeartbeatSummary> = self
            .states
            .iter()
            .map(|(id, state)| HeartbeatSummary {
                id: *id,
                frames: state.frames,
                failures: state.failures,
                min_failure_latency_s: state.min_failure.map(latency_seconds),
            })
            .collect();
        summary.sort_by_key(|s| s.id);
        summary
    }
}
