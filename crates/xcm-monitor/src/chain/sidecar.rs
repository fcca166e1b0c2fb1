//! Chain adapter over a Substrate API Sidecar REST endpoint.
//!
//! Sidecar serves blocks with already-decoded events as JSON, so nothing here touches SCALE.
//! Paths used: `/node/version` (checked on connect), `/blocks/head/header?finalized=true`,
//! `/blocks/{number|hash}`.

use super::{BlockRef, ChainClient, ChainConnector, EventRecord};
use crate::error::ChainError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn http_get_json(client: &reqwest::Client, url: &str) -> Result<Value, ChainError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    let json: Value = resp.json().await?;
    // Sidecar reports failures as { code, message, stack } with a non-2xx status.
    if !status.is_success() || (json.get("code").is_some() && json.get("message").is_some()) {
        let message = json
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no message");
        return Err(ChainError::Rpc(format!("{} ({}): {}", url, status, message)));
    }
    Ok(json)
}

fn parse_number(value: &Value) -> Result<u64, ChainError> {
    match value {
        Value::String(s) => s
            .parse::<u64>()
            .map_err(|e| ChainError::Decode(format!("block number {:?}: {}", s, e))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ChainError::Decode(format!("block number {} not u64", n))),
        other => Err(ChainError::Decode(format!("block number not a string: {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct RawMethod {
    pallet: String,
    method: String,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    method: RawMethod,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEvents {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawExtrinsic {
    method: RawMethod,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    hash: String,
    #[serde(default)]
    on_initialize: RawEvents,
    #[serde(default)]
    extrinsics: Vec<RawExtrinsic>,
    #[serde(default)]
    on_finalize: RawEvents,
}

impl RawBlock {
    fn events(&self) -> Vec<EventRecord> {
        let to_record = |ev: &RawEvent| {
            EventRecord::new(
                ev.method.pallet.clone(),
                ev.method.method.clone(),
                ev.data.clone(),
            )
        };
        let mut out: Vec<EventRecord> =
            self.on_initialize.events.iter().map(to_record).collect();
        for ext in &self.extrinsics {
            out.extend(ext.events.iter().map(to_record));
        }
        out.extend(self.on_finalize.events.iter().map(to_record));
        out
    }

    fn timestamp(&self) -> Option<u64> {
        let set = self
            .extrinsics
            .iter()
            .find(|ext| ext.method.pallet == "timestamp" && ext.method.method == "set")?;
        parse_number(set.args.get("now")?).ok()
    }
}

/// One connected Sidecar endpoint.
///
/// The last fetched block is kept by hash: the poller resolves a number, then reads events
/// (and, for failures, the timestamp) of the same finalized block.
pub struct SidecarClient {
    http_client: reqwest::Client,
    base_url: String,
    last_block: Mutex<Option<Arc<RawBlock>>>,
}

impl SidecarClient {
    /// Build the HTTP client and check `/node/version`.
    pub async fn connect(base_url: &str, request_timeout: Duration) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder()
            .no_proxy()
            .timeout(request_timeout)
            .build()?;
        let client = Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            last_block: Mutex::new(None),
        };
        let version = http_get_json(&client.http_client, &client.url("/node/version")).await?;
        tracing::debug!(
            endpoint = %client.base_url,
            chain = version.get("chain").and_then(|c| c.as_str()).unwrap_or("unknown"),
            "connected to sidecar"
        );
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn cached(&self, hash: &str) -> Option<Arc<RawBlock>> {
        let last = self.last_block.lock().ok()?;
        last.as_ref().filter(|block| block.hash == hash).cloned()
    }

    /// Block by number or hash. Lookups by the hash of the last fetched block are served
    /// from memory.
    async fn block(&self, id: &str) -> Result<Arc<RawBlock>, ChainError> {
        if let Some(block) = self.cached(id) {
            return Ok(block);
        }
        let url = self.url(&format!("/blocks/{}", id));
        let json = http_get_json(&self.http_client, &url).await?;
        let block: RawBlock = serde_json::from_value(json)
            .map_err(|e| ChainError::Decode(format!("block {}: {}", id, e)))?;
        let block = Arc::new(block);
        if let Ok(mut last) = self.last_block.lock() {
            *last = Some(Arc::clone(&block));
        }
        Ok(block)
    }
}

#[async_trait]
impl ChainClient for SidecarClient {
    async fn latest_header(&self) -> Result<BlockRef, ChainError> {
        let header = http_get_json(
            &self.http_client,
            &self.url("/blocks/head/header?finalized=true"),
        )
        .await?;
        let number = header
            .get("number")
            .ok_or_else(|| ChainError::Decode("header without number".into()))?;
        Ok(BlockRef::number_only(parse_number(number)?))
    }

    async fn block_hash_at(&self, number: u64) -> Result<String, ChainError> {
        Ok(self.block(&number.to_string()).await?.hash.clone())
    }

    async fn events_at(&self, hash: &str) -> Result<Vec<EventRecord>, ChainError> {
        Ok(self.block(hash).await?.events())
    }

    async fn timestamp_at(&self, hash: &str) -> Result<u64, ChainError> {
        self.block(hash)
            .await?
            .timestamp()
            .ok_or_else(|| ChainError::Decode(format!("block {} has no timestamp.set", hash)))
    }
}

/// Dials [SidecarClient]s for one base URL.
#[derive(Debug, Clone)]
pub struct SidecarConnector {
    base_url: String,
    request_timeout: Duration,
}

impl SidecarConnector {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl ChainConnector for SidecarConnector {
    fn endpoint(&self) -> &str {
        &self.base_url
    }

    async fn connect(&self) -> Result<Arc<dyn ChainClient>, ChainError> {
        let client = SidecarClient::connect(&self.base_url, self.request_timeout).await?;
        Ok(Arc::new(client))
    }
}
