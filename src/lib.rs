//! CANEdge parser - heartbeat and PSU SDO latency analysis for robot bus logs
//!
//! The parser turns raw CANEdge CSV exports into three derived logs per robot
//! through a streaming pipeline: timestamp normalization → frame classification
//! → heartbeat interval tracking / SDO transaction matching → output streams.
//!
//! ## Modules
//!
//! - **Core**: `normalizer`, `classifier`, `heartbeat`, `transaction`, `router`
//! - **Session**: `pipeline` drives the core over every log file of a robot
//! - **Collaborators**: `discovery`, `config`, and `series` for plotting input

pub mod classifier;
pub mod config;
pub mod discovery;
pub mod error;
pub mod heartbeat;
pub mod normalizer;
pub mod pipeline;
pub mod router;
pub mod series;
pub mod transaction;
pub mod types;

pub use classifier::FrameClassifier;
pub use config::{DataLayout, ParserConfig};
pub use error::CanParseError;
pub use heartbeat::HeartbeatTracker;
pub use normalizer::TimestampNormalizer;
pub use pipeline::{process_bots, BotProcessor};
pub use router::{OutputStreams, StreamRouter};
pub use transaction::TransactionMatcher;

/// Crate version embedded in run reports
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for run reports
pub const PRODUCER_NAME: &str = "canedge-parser";
