//! Frame classification
//!
//! The robots' bus carries far more traffic than the parser cares about. A fixed
//! registry of nodes of interest decides which COB-IDs are heartbeats, which two
//! belong to the PSU SDO exchange, and everything else is passed through.

use crate::types::{CobId, FrameClass};
use chrono::Duration;
use std::collections::HashSet;
use std::sync::OnceLock;

/// CANopen heartbeat function code
pub const HEARTBEAT_BASE: u16 = 0x700;
/// Bus-wide SYNC frame, monitored like a heartbeat
pub const SYNC_ID: CobId = CobId(0x80);
/// SDO client-to-server function code
pub const SDO_REQUEST_BASE: u16 = 0x600;
/// SDO server-to-client function code
pub const SDO_RESPONSE_BASE: u16 = 0x580;

/// Node ID of the power supply
pub const PSU_NODE_ID: u8 = 59;

/// Nodes whose heartbeat is monitored
pub const NODES_OF_INTEREST: [(u8, &str); 9] = [
    (4, "turn motor"),
    (5, "left wheel motor"),
    (6, "right wheel motor"),
    (14, "top camera"),
    (15, "bottom camera"),
    (16, "front proximity sensor"),
    (17, "rear proximity sensor"),
    (PSU_NODE_ID, "psu"),
    (63, "robomoto"),
];

/// Maximum SYNC inter-arrival time (ms)
pub const SYNC_THRESHOLD_MS: i64 = 15;
/// Maximum node heartbeat inter-arrival time (ms)
pub const HEARTBEAT_THRESHOLD_MS: i64 = 150;
/// Maximum SDO round-trip time (ms)
pub const TRANSACTION_THRESHOLD_MS: i64 = 100;

/// Round-trip threshold handed to the transaction matcher
pub fn transaction_threshold() -> Duration {
    Duration::milliseconds(TRANSACTION_THRESHOLD_MS)
}

/// Classifier built from the identifier registry
#[derive(Debug, Clone)]
pub struct FrameClassifier {
    heartbeat_ids: HashSet<CobId>,
    request_id: CobId,
    response_id: CobId,
}

impl FrameClassifier {
    /// Build a classifier for the given heartbeat nodes and SDO server node
    pub fn new(nodes: &[u8], psu_node_id: u8) -> Self {
        let heartbeat_ids = nodes
            .iter()
            .map(|node| CobId(HEARTBEAT_BASE + u16::from(*node)))
            .chain(std::iter::once(SYNC_ID))
            .collect();

        Self {
            heartbeat_ids,
            request_id: CobId(SDO_REQUEST_BASE + u16::from(psu_node_id)),
            response_id: CobId(SDO_RESPONSE_BASE + u16::from(psu_node_id)),
        }
    }

    /// Process-wide classifier for the robot fleet registry
    pub fn shared() -> &'static FrameClassifier {
        static CLASSIFIER: OnceLock<FrameClassifier> = OnceLock::new();
        CLASSIFIER.get_or_init(|| {
            let nodes: Vec<u8> = NODES_OF_INTEREST.iter().map(|(node, _)| *node).collect();
            FrameClassifier::new(&nodes, PSU_NODE_ID)
        })
    }

    /// Classify a frame by its COB-ID
    pub fn classify(&self, id: CobId) -> FrameClass {
        if self.heartbeat_ids.contains(&id) {
            let threshold_ms = if id == SYNC_ID {
                SYNC_THRESHOLD_MS
            } else {
                HEARTBEAT_THRESHOLD_MS
            };
            FrameClass::Heartbeat {
                threshold: Duration::milliseconds(threshold_ms),
            }
        } else if id == self.request_id || id == self.response_id {
            FrameClass::Transaction
        } else {
            FrameClass::Unclassified
        }
    }

    pub fn request_id(&self) -> CobId {
        self.request_id
    }

    pub fn response_id(&self) -> CobId {
        self.response_id
    }

    /// Monitored heartbeat identifiers in ascending order
    pub fn heartbeat_ids(&self) -> Vec<CobId> {
        let mut ids: Vec<CobId> = self.heartbeat_ids.iter().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_identifiers() {
        let classifier = FrameClassifier::shared();

        assert_eq!(classifier.request_id(), CobId(0x63B));
        assert_eq!(classifier.response_id(), CobId(0x5BB));
        assert_eq!(
            classifier.heartbeat_ids(),
            vec![
                CobId(0x80),
                CobId(0x704),
                CobId(0x705),
                CobId(0x706),
                CobId(0x70E),
                CobId(0x70F),
                CobId(0x710),
                CobId(0x711),
                CobId(0x73B),
                CobId(0x73F),
            ]
        );
    }

    #[test]
    fn test_sync_uses_strict_threshold() {
        let classifier = FrameClassifier::shared();

        assert_eq!(
            classifier.classify(CobId(0x80)),
            FrameClass::Heartbeat {
                threshold: Duration::milliseconds(15)
            }
        );
        assert_eq!(
            classifier.classify(CobId(0x705)),
            FrameClass::Heartbeat {
                threshold: Duration::milliseconds(150)
            }
        );
    }

    #[test]
    fn test_transaction_and_passthrough() {
        let classifier = FrameClassifier::shared();

        assert_eq!(classifier.classify(CobId(0x63B)), FrameClass::Transaction);
        assert_eq!(classifier.classify(CobId(0x5BB)), FrameClass::Transaction);
        assert_eq!(classifier.classify(CobId(0x185)), FrameClass::Unclassified);
        // Heartbeat of a node outside the registry
        assert_eq!(classifier.classify(CobId(0x701)), FrameClass::Unclassified);
    }

    #[test]
    fn test_classes_are_disjoint() {
        let classifier = FrameClassifier::shared();
        for id in classifier.heartbeat_ids() {
            assert_ne!(id, classifier.request_id());
            assert_ne!(id, classifier.response_id());
        }
    }

    #[test]
    fn test_custom_registry() {
        let classifier = FrameClassifier::new(&[1], 2);
        assert!(matches!(
            classifier.classify(CobId(0x701)),
            FrameClass::Heartbeat { .. }
        ));
        assert_eq!(classifier.classify(CobId(0x602)), FrameClass::Transaction);
        assert_eq!(classifier.classify(CobId(0x704)), FrameClass::Unclassified);
    }
}
