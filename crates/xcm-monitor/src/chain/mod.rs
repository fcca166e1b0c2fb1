//! Chain client adapter: block refs, event records and the per-endpoint client seam.
//!
//! A [ChainClient] is one live connection to one chain endpoint. It carries no retry logic;
//! reconnects are the job of [crate::executor::ReconnectingExecutor], which obtains fresh
//! clients from a [ChainConnector].

pub mod call;
pub mod sidecar;

use crate::error::ChainError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub use call::{decode_call_payload, CallDescription};
pub use sidecar::{SidecarClient, SidecarConnector};

/// Block number plus, when known, its hash. Finalized blocks only; a hash is never revisited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: Option<String>,
}

impl BlockRef {
    pub fn new(number: u64, hash: impl Into<String>) -> Self {
        Self {
            number,
            hash: Some(hash.into()),
        }
    }

    pub fn number_only(number: u64) -> Self {
        Self { number, hash: None }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hash {
            Some(hash) => write!(f, "#{} ({})", self.number, hash),
            None => write!(f, "#{}", self.number),
        }
    }
}

/// One decoded runtime event. `data` keeps the node's field order and JSON rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub section: String,
    pub method: String,
    pub data: Vec<Value>,
}

impl EventRecord {
    pub fn new(section: impl Into<String>, method: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            section: section.into(),
            method: method.into(),
            data,
        }
    }

    /// Section and method match, ignoring ASCII case (nodes differ on `ump` vs `Ump`).
    pub fn is(&self, section: &str, method: &str) -> bool {
        self.section.eq_ignore_ascii_case(section) && self.method.eq_ignore_ascii_case(method)
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section, self.method)?;
        let fields: Vec<String> = self.data.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", fields.join(", "))
    }
}

/// Read access to a single chain endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest finalized header. Only the number is guaranteed.
    async fn latest_header(&self) -> Result<BlockRef, ChainError>;

    async fn block_hash_at(&self, number: u64) -> Result<String, ChainError>;

    /// Events at `hash`, in execution order.
    async fn events_at(&self, hash: &str) -> Result<Vec<EventRecord>, ChainError>;

    /// Block timestamp in milliseconds since the epoch.
    async fn timestamp_at(&self, hash: &str) -> Result<u64, ChainError>;

    fn decode_call_payload(&self, payload: &str) -> Result<CallDescription, ChainError> {
        decode_call_payload(payload)
    }
}

/// Opens fresh [ChainClient]s for one endpoint.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    /// Endpoint the connector dials (used in logs).
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Arc<dyn ChainClient>, ChainError>;
}
