//! Relay chain / parachain XCM monitor: finalized head-following, failure detection, alerting.
//!
//! - **GapFillingPoller**: follows the relay chain's finalized head and visits every block
//!   exactly once, in order, checkpointing after each one.
//! - **ReconnectingExecutor**: runs chain calls, rebuilding the connection on transport
//!   failure within a bounded reconnect budget (exhaustion is fatal).
//! - **Classifier**: finds executed upward messages of the monitored parachain and the
//!   controller's own parachain events.
//! - **XcmMonitor**: the [BlockHandler] wiring failures into alerts, metrics and checkpoints.

pub mod alert;
pub mod chain;
pub mod checkpoint;
pub mod classifier;
pub mod config;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod monitor;
pub mod poller;

pub use alert::{AlertSink, LogAlertSink, TelegramAlertSink};
pub use chain::{
    BlockRef, CallDescription, ChainClient, ChainConnector, EventRecord, SidecarClient,
    SidecarConnector,
};
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, PgCheckpointStore};
pub use classifier::{classify, MessagingBundle};
pub use config::{LogLevel, ReconnectionConfig, Settings};
pub use cursor::Cursor;
pub use error::{ChainError, MonitorError};
pub use executor::ReconnectingExecutor;
pub use metrics::Metrics;
pub use monitor::XcmMonitor;
pub use poller::{BlockHandler, GapFillingPoller, TickOutcome};
