//! Common helpers for integration tests: a scripted in-memory chain and a recording handler.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use xcm_monitor::{
    BlockHandler, BlockRef, ChainClient, ChainConnector, ChainError, EventRecord,
    MessagingBundle, MonitorError, ReconnectingExecutor, ReconnectionConfig,
};

pub const PARA_ID: u32 = 2004;
pub const CONTROLLER: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

/// Which failure the next scripted calls return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transport,
    Decode,
}

#[derive(Default)]
struct ChainState {
    head: u64,
    /// number -> hash
    hashes: HashMap<u64, String>,
    /// hash -> events
    events: HashMap<String, Vec<EventRecord>>,
    timestamps: HashMap<String, u64>,
    /// Failures injected into the next calls, consumed front to back.
    faults: Vec<Fault>,
    /// Failures returned by every call with this description until healed.
    sticky: HashMap<String, Fault>,
    calls: Vec<String>,
}

/// Scripted chain shared by every client a [MockConnector] hands out.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

pub fn block_hash(number: u64) -> String {
    format!("0x{:064x}", number)
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    /// Add block `number` with `events`; hash is [block_hash].
    pub fn add_block(&self, number: u64, events: Vec<EventRecord>) -> String {
        let hash = block_hash(number);
        let mut state = self.state.lock().unwrap();
        state.hashes.insert(number, hash.clone());
        state.events.insert(hash.clone(), events);
        hash
    }

    /// Events reachable by hash only (parachain blocks).
    pub fn add_events_by_hash(&self, hash: &str, events: Vec<EventRecord>) {
        self.state
            .lock()
            .unwrap()
            .events
            .insert(hash.to_string(), events);
    }

    pub fn set_timestamp(&self, hash: &str, ms: u64) {
        self.state
            .lock()
            .unwrap()
            .timestamps
            .insert(hash.to_string(), ms);
    }

    pub fn fail_next(&self, faults: &[Fault]) {
        self.state.lock().unwrap().faults.extend_from_slice(faults);
    }

    /// Make every `call` (e.g. `hash 102`) fail with `fault` until [MockChain::heal].
    pub fn fail_call(&self, call: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .sticky
            .insert(call.to_string(), fault);
    }

    pub fn heal(&self, call: &str) {
        self.state.lock().unwrap().sticky.remove(call);
    }

    /// Every call made so far, e.g. `head`, `hash 101`, `events 0x..`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, call: String) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        let fault = match state.sticky.get(&call) {
            Some(fault) => Some(*fault),
            None if state.faults.is_empty() => None,
            None => Some(state.faults.remove(0)),
        };
        state.calls.push(call);
        match fault {
            None => Ok(()),
            Some(Fault::Transport) => Err(ChainError::Rpc("connection reset".into())),
            Some(Fault::Decode) => Err(ChainError::Decode("unexpected event layout".into())),
        }
    }
}

pub struct MockClient {
    chain: MockChain,
    /// Generation of this client (1 for the first connect).
    pub generation: u32,
}

#[async_trait]
impl ChainClient for MockClient {
    async fn latest_header(&self) -> Result<BlockRef, ChainError> {
        self.chain.record("head".into())?;
        Ok(BlockRef::number_only(self.chain.state.lock().unwrap().head))
    }

    async fn block_hash_at(&self, number: u64) -> Result<String, ChainError> {
        self.chain.record(format!("hash {}", number))?;
        self.chain
            .state
            .lock()
            .unwrap()
            .hashes
            .get(&number)
            .cloned()
            .ok_or_else(|| ChainError::Rpc(format!("no block {}", number)))
    }

    async fn events_at(&self, hash: &str) -> Result<Vec<EventRecord>, ChainError> {
        self.chain.record(format!("events {}", hash))?;
        Ok(self
            .chain
            .state
            .lock()
            .unwrap()
            .events
            .get(hash)
            .cloned()
            .unwrap_or_default())
    }

    async fn timestamp_at(&self, hash: &str) -> Result<u64, ChainError> {
        self.chain.record(format!("timestamp {}", hash))?;
        self.chain
            .state
            .lock()
            .unwrap()
            .timestamps
            .get(hash)
            .copied()
            .ok_or_else(|| ChainError::Decode(format!("no timestamp at {}", hash)))
    }
}

/// Connector over a [MockChain]; the first `connect_failures` dials fail.
pub struct MockConnector {
    chain: MockChain,
    connect_failures: AtomicU32,
    connects: AtomicU32,
}

impl MockConnector {
    pub fn new(chain: MockChain) -> Self {
        Self {
            chain,
            connect_failures: AtomicU32::new(0),
            connects: AtomicU32::new(0),
        }
    }

    pub fn fail_connects(&self, n: u32) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Dial attempts so far, failed ones included.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    fn endpoint(&self) -> &str {
        "mock://chain"
    }

    async fn connect(&self) -> Result<Arc<dyn ChainClient>, ChainError> {
        let generation = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        let failing = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ChainError::Rpc("connection refused".into()));
        }
        Ok(Arc::new(MockClient {
            chain: self.chain.clone(),
            generation,
        }))
    }
}

pub fn fast_reconnect(attempts: u32) -> ReconnectionConfig {
    ReconnectionConfig {
        attempts,
        delay: Duration::ZERO,
    }
}

/// Connected executor over `chain`, plus its connector for dial counts.
pub async fn executor(
    name: &str,
    chain: &MockChain,
    attempts: u32,
) -> (Arc<ReconnectingExecutor>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new(chain.clone()));
    let exec = ReconnectingExecutor::connect(name, connector.clone(), fast_reconnect(attempts))
        .await
        .expect("mock connect");
    (Arc::new(exec), connector)
}

// Event builders, shaped the way Sidecar renders them.

pub fn executed_upward(id: &str, outcome: Value) -> EventRecord {
    EventRecord::new("ump", "ExecutedUpward", vec![json!(id), outcome])
}

pub fn complete() -> Value {
    json!({ "complete": "1000000000" })
}

pub fn incomplete() -> Value {
    json!({ "incomplete": ["1000", { "module": { "index": 31 } }] })
}

pub fn candidate_included(para_id: u32, para_head: &str) -> EventRecord {
    EventRecord::new(
        "paraInclusion",
        "CandidateIncluded",
        vec![
            json!({ "descriptor": { "paraId": para_id.to_string(), "paraHead": para_head } }),
            json!("0x"),
            json!("0"),
            json!("0"),
        ],
    )
}

pub fn transacted_derivative(controller: &str, call: &str) -> EventRecord {
    EventRecord::new(
        "xcmTransactor",
        "TransactedDerivative",
        vec![json!(controller), json!({ "parents": 1 }), json!(call), json!("0")],
    )
}

pub fn transferred_with_fee(controller: &str, amount: &str, fee: &str) -> EventRecord {
    EventRecord::new(
        "xTokens",
        "TransferredWithFee",
        vec![
            json!(controller),
            json!("SelfReserve"),
            json!(amount),
            json!(fee),
            json!({}),
        ],
    )
}

/// What a [RecordingHandler] saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Detected(u64, usize),
    Error(u64, &'static str),
    Checkpoint(u64),
}

/// [BlockHandler] that records every call. Can be told to fail checkpoints or detections.
#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<Seen>>,
    fail_checkpoints: Mutex<bool>,
    detect_error: Mutex<Option<MonitorError>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn checkpoints(&self) -> Vec<u64> {
        self.seen()
            .into_iter()
            .filter_map(|s| match s {
                Seen::Checkpoint(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn fail_checkpoints(&self, fail: bool) {
        *self.fail_checkpoints.lock().unwrap() = fail;
    }

    pub fn fail_detection_with(&self, error: MonitorError) {
        *self.detect_error.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl BlockHandler for RecordingHandler {
    async fn on_xcm_detected(
        &self,
        block: &BlockRef,
        bundle: &MessagingBundle,
    ) -> Result<(), MonitorError> {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Detected(block.number, bundle.triggering_events.len()));
        match self.detect_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn on_error(&self, block_number: u64, error: &MonitorError) {
        self.seen
            .lock()
            .unwrap()
            .push(Seen::Error(block_number, error.kind()));
    }

    async fn on_checkpoint(&self, block_number: u64) -> Result<(), MonitorError> {
        self.seen.lock().unwrap().push(Seen::Checkpoint(block_number));
        if *self.fail_checkpoints.lock().unwrap() {
            return Err(MonitorError::Checkpoint("database is down".into()));
        }
        Ok(())
    }
}
