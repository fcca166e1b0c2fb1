//! Error taxonomy for the monitor.
//!
//! [ChainError] is what a single chain adapter call can fail with. [MonitorError] is what the
//! executor, poller and handlers surface; only [MonitorError::ChainUnavailable] is fatal.

use thiserror::Error;

/// Failure of one chain adapter call.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl ChainError {
    /// Transport and node-side failures. These trigger a reconnect in the executor.
    pub fn is_transport(&self) -> bool {
        matches!(self, ChainError::Http(_) | ChainError::Rpc(_))
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{chain} chain call failed: {source}")]
    Chain {
        chain: String,
        #[source]
        source: ChainError,
    },
    /// Reconnect attempts for a chain were exhausted. The monitor cannot make progress.
    #[error("{chain} chain unavailable after {attempts} reconnect attempts")]
    ChainUnavailable { chain: String, attempts: u32 },
    /// Shutdown was requested while waiting to reconnect to `chain`.
    #[error("{chain} reconnect interrupted by shutdown")]
    Interrupted { chain: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("checkpoint store error: {0}")]
    Checkpoint(String),
    #[error("alert delivery failed: {0}")]
    Alert(String),
}

impl MonitorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::ChainUnavailable { .. })
    }

    /// Fatal errors and shutdown interruptions end the poller; everything else is reported.
    pub fn stops_poller(&self) -> bool {
        self.is_fatal() || matches!(self, MonitorError::Interrupted { .. })
    }

    /// Stable label for the `service_errors_total{name}` counter.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::Chain {
                source: ChainError::Decode(_),
                ..
            } => "decode",
            MonitorError::Chain { .. } => "rpc",
            MonitorError::ChainUnavailable { .. } => "chain_unavailable",
            MonitorError::Interrupted { .. } => "interrupted",
            MonitorError::Decode(_) => "decode",
            MonitorError::Checkpoint(_) => "checkpoint",
            MonitorError::Alert(_) => "alert",
        }
    }
}
