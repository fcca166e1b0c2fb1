//! Reconnecting call executor: runs chain calls and rebuilds the connection when they fail.
//!
//! One executor per chain (relay, parachain). A call gets at most two attempts: the first on
//! the current client, and, after a transport failure and a successful reconnect, one more
//! on the fresh client. Reconnecting is bounded by [ReconnectionConfig]; exhausting it yields
//! the fatal [MonitorError::ChainUnavailable]. With a shutdown receiver attached, the wait
//! between reconnect attempts ends early with [MonitorError::Interrupted].

use crate::chain::{BlockRef, ChainClient, ChainConnector, EventRecord};
use crate::config::ReconnectionConfig;
use crate::error::{ChainError, MonitorError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::sleep;

/// Reconnect bookkeeping for one recovery run. Not persisted.
#[derive(Debug, Clone, Copy)]
struct ReconnectState {
    consecutive_failures: u32,
    attempts_remaining: u32,
}

impl ReconnectState {
    fn new(attempts: u32) -> Self {
        Self {
            consecutive_failures: 0,
            attempts_remaining: attempts,
        }
    }
}

/// Sleep for `delay`. Returns true if shutdown was requested first.
async fn wait_or_shutdown(delay: Duration, shutdown: Option<&watch::Receiver<bool>>) -> bool {
    let mut shutdown = match shutdown {
        Some(rx) => rx.clone(),
        None => {
            sleep(delay).await;
            return false;
        }
    };
    // A dropped sender disables the shutdown branch; the full delay still applies.
    tokio::select! {
        _ = sleep(delay) => false,
        Ok(()) = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => true,
    }
}

async fn dial(
    chain: &str,
    connector: &dyn ChainConnector,
    reconnection: &ReconnectionConfig,
    shutdown: Option<&watch::Receiver<bool>>,
) -> Result<Arc<dyn ChainClient>, MonitorError> {
    let mut state = ReconnectState::new(reconnection.attempts);
    while state.attempts_remaining > 0 {
        state.attempts_remaining -= 1;
        match connector.connect().await {
            Ok(client) => {
                tracing::info!(
                    chain,
                    endpoint = connector.endpoint(),
                    failures = state.consecutive_failures,
                    "chain client connected"
                );
                return Ok(client);
            }
            Err(e) => {
                state.consecutive_failures += 1;
                tracing::warn!(
                    chain,
                    endpoint = connector.endpoint(),
                    reason = %e,
                    attempt = state.consecutive_failures,
                    remaining = state.attempts_remaining,
                    "chain connect failed"
                );
                if state.attempts_remaining > 0
                    && wait_or_shutdown(reconnection.delay, shutdown).await
                {
                    tracing::info!(chain, "shutdown requested, reconnect abandoned");
                    return Err(MonitorError::Interrupted {
                        chain: chain.to_string(),
                    });
                }
            }
        }
    }
    tracing::error!(
        chain,
        endpoint = connector.endpoint(),
        attempts = reconnection.attempts,
        "giving up on chain connection"
    );
    Err(MonitorError::ChainUnavailable {
        chain: chain.to_string(),
        attempts: reconnection.attempts,
    })
}

/// Executes chain calls against a shared, replaceable client.
pub struct ReconnectingExecutor {
    chain: String,
    connector: Arc<dyn ChainConnector>,
    client: RwLock<Arc<dyn ChainClient>>,
    reconnection: ReconnectionConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ReconnectingExecutor {
    /// Wrap an already connected client.
    pub fn new(
        chain: impl Into<String>,
        connector: Arc<dyn ChainConnector>,
        client: Arc<dyn ChainClient>,
        reconnection: ReconnectionConfig,
    ) -> Self {
        Self {
            chain: chain.into(),
            connector,
            client: RwLock::new(client),
            reconnection,
            shutdown: None,
        }
    }

    /// Let `shutdown` cut reconnect waits short.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Open the first client under the same bounded policy used for reconnects.
    pub async fn connect(
        chain: impl Into<String>,
        connector: Arc<dyn ChainConnector>,
        reconnection: ReconnectionConfig,
    ) -> Result<Self, MonitorError> {
        let chain = chain.into();
        let client = dial(&chain, connector.as_ref(), &reconnection, None).await?;
        Ok(Self::new(chain, connector, client, reconnection))
    }

    /// [ReconnectingExecutor::connect], with `shutdown` interrupting the initial dial and every
    /// later reconnect.
    pub async fn connect_with_shutdown(
        chain: impl Into<String>,
        connector: Arc<dyn ChainConnector>,
        reconnection: ReconnectionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, MonitorError> {
        let chain = chain.into();
        let client = dial(&chain, connector.as_ref(), &reconnection, Some(&shutdown)).await?;
        Ok(Self::new(chain, connector, client, reconnection).with_shutdown(shutdown))
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Current client handle.
    pub async fn client(&self) -> Arc<dyn ChainClient> {
        Arc::clone(&*self.client.read().await)
    }

    /// Run `op` against the current client, reconnecting once on a transport failure.
    ///
    /// Decode failures are returned as-is; a reconnect would not fix them.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, MonitorError>
    where
        F: Fn(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        match op(self.client().await).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transport() => return Err(self.chain_error(e)),
            Err(e) => {
                tracing::warn!(chain = %self.chain, reason = %e, "chain call failed, reconnecting");
            }
        }
        self.reconnect().await?;
        op(self.client().await)
            .await
            .map_err(|e| self.chain_error(e))
    }

    /// Replace the shared client with a freshly connected one.
    pub async fn reconnect(&self) -> Result<(), MonitorError> {
        let fresh = dial(
            &self.chain,
            self.connector.as_ref(),
            &self.reconnection,
            self.shutdown.as_ref(),
        )
        .await?;
        *self.client.write().await = fresh;
        Ok(())
    }

    pub async fn latest_header(&self) -> Result<BlockRef, MonitorError> {
        self.execute(|client| async move { client.latest_header().await })
            .await
    }

    pub async fn block_hash_at(&self, number: u64) -> Result<String, MonitorError> {
        self.execute(|client| async move { client.block_hash_at(number).await })
            .await
    }

    pub async fn events_at(&self, hash: &str) -> Result<Vec<EventRecord>, MonitorError> {
        self.execute(|client| {
            let hash = hash.to_string();
            async move { client.events_at(&hash).await }
        })
        .await
    }

    pub async fn timestamp_at(&self, hash: &str) -> Result<u64, MonitorError> {
        self.execute(|client| {
            let hash = hash.to_string();
            async move { client.timestamp_at(&hash).await }
        })
        .await
    }

    fn chain_error(&self, source: ChainError) -> MonitorError {
        MonitorError::Chain {
            chain: self.chain.clone(),
            source,
        }
    }
}
