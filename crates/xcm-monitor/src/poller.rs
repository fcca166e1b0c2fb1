//! Gap-filling poller: follows the relay chain's finalized head and visits every block once.
//!
//! Each tick reads the finalized head and walks `last_fired + 1 ..= head` in order. A block is
//! fully handled (classified, handler called, checkpoint written) before the next one starts.
//! Ticks never overlap: a tick that fires while another is running returns
//! [TickOutcome::Skipped] without touching the chain.

use crate::chain::BlockRef;
use crate::classifier::{classify, MessagingBundle};
use crate::cursor::Cursor;
use crate::error::MonitorError;
use crate::executor::ReconnectingExecutor;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

const PROGRESS_LOG_INTERVAL: u64 = 100;

/// Receives the poller's results, one block at a time and in block order.
#[async_trait]
pub trait BlockHandler: Send + Sync {
    /// A relay block carried upward messages of the monitored parachain.
    /// An error for which [MonitorError::stops_poller] holds ends the walk before the block is
    /// checkpointed; any other error is routed to [BlockHandler::on_error].
    async fn on_xcm_detected(
        &self,
        block: &BlockRef,
        bundle: &MessagingBundle,
    ) -> Result<(), MonitorError>;

    /// Non-fatal failure while handling `block_number`.
    async fn on_error(&self, block_number: u64, error: &MonitorError);

    /// `block_number` is done. Called exactly once per block, in increasing order.
    async fn on_checkpoint(&self, block_number: u64) -> Result<(), MonitorError>;
}

/// Result of one [GapFillingPoller::tick].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A previous tick was still running.
    Skipped,
    /// Head lookup failed with a recoverable error.
    HeadUnavailable,
    UpToDate { head: u64 },
    /// `visited` blocks were completed; `last_fired < head` means the walk stopped early.
    Walked { visited: u64, last_fired: u64, head: u64 },
}

/// Releases the in-progress flag when the tick ends, however it ends.
struct InProgressGuard<'a>(&'a AtomicBool);

impl<'a> InProgressGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum BlockResult {
    Done,
    /// Chain call failed transiently; the block must be retried.
    Retry(MonitorError),
}

pub struct GapFillingPoller {
    relay: Arc<ReconnectingExecutor>,
    para_id: u32,
    handler: Arc<dyn BlockHandler>,
    cursor: Cursor,
    in_progress: AtomicBool,
    tick_interval: Duration,
}

impl GapFillingPoller {
    /// `last_fired_block` is the last block already processed (checkpoint or initial block).
    pub fn new(
        relay: Arc<ReconnectingExecutor>,
        para_id: u32,
        handler: Arc<dyn BlockHandler>,
        last_fired_block: u64,
        tick_interval: Duration,
    ) -> Self {
        Self {
            relay,
            para_id,
            handler,
            cursor: Cursor::new(last_fired_block),
            in_progress: AtomicBool::new(false),
            tick_interval,
        }
    }

    pub fn last_fired_block(&self) -> u64 {
        self.cursor.last_fired_block()
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Tick until `shutdown` flips to true or a fatal error occurs.
    ///
    /// A running walk stops after the block in hand has been checkpointed, and a pending
    /// reconnect wait ends early when the relay executor shares the same receiver.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        let walk_shutdown = shutdown.clone();
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            last_fired = self.last_fired_block(),
            para_id = self.para_id,
            "poller started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick_until(Some(&walk_shutdown)).await {
                        Ok(_) => {}
                        Err(MonitorError::Interrupted { .. }) => break,
                        Err(e) => return Err(e),
                    }
                    if *walk_shutdown.borrow() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!(last_fired = self.last_fired_block(), "poller stopped");
        Ok(())
    }

    /// One polling step. Only errors that stop the poller are returned as `Err`.
    pub async fn tick(&self) -> Result<TickOutcome, MonitorError> {
        self.tick_until(None).await
    }

    async fn tick_until(
        &self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<TickOutcome, MonitorError> {
        let _guard = match InProgressGuard::acquire(&self.in_progress) {
            Some(guard) => guard,
            None => {
                tracing::trace!("previous tick still running, skipping");
                return Ok(TickOutcome::Skipped);
            }
        };

        let head = match self.relay.latest_header().await {
            Ok(header) => header.number,
            Err(e) if e.stops_poller() => return Err(e),
            Err(e) => {
                tracing::warn!(reason = %e, "finalized head lookup failed");
                self.handler.on_error(self.cursor.next_block(), &e).await;
                return Ok(TickOutcome::HeadUnavailable);
            }
        };

        let start = self.cursor.next_block();
        if head < start {
            return Ok(TickOutcome::UpToDate { head });
        }
        if head > start {
            tracing::debug!(from = start, to = head, "catching up");
        }

        let mut visited = 0;
        for number in start..=head {
            match self.process_block(number).await? {
                BlockResult::Done => {}
                BlockResult::Retry(e) => {
                    tracing::warn!(
                        block = number,
                        reason = %e,
                        "block fetch failed, retrying next tick"
                    );
                    self.handler.on_error(number, &e).await;
                    break;
                }
            }
            if !self.cursor.advance_to(number) {
                break;
            }
            visited += 1;
            if let Err(e) = self.handler.on_checkpoint(number).await {
                tracing::warn!(block = number, reason = %e, "checkpoint update failed");
                self.handler.on_error(number, &e).await;
            }
            if number % PROGRESS_LOG_INTERVAL == 0 {
                tracing::info!(block = number, head, "processed block");
            }
            if shutdown.map_or(false, |rx| *rx.borrow()) {
                tracing::info!(block = number, head, "shutdown requested, walk stopped");
                break;
            }
        }

        Ok(TickOutcome::Walked {
            visited,
            last_fired: self.cursor.last_fired_block(),
            head,
        })
    }

    async fn process_block(&self, number: u64) -> Result<BlockResult, MonitorError> {
        let hash = match self.relay.block_hash_at(number).await {
            Ok(hash) => hash,
            Err(e) => return self.fetch_failed(number, e).await,
        };
        let events = match self.relay.events_at(&hash).await {
            Ok(events) => events,
            Err(e) => return self.fetch_failed(number, e).await,
        };
        let block = BlockRef::new(number, hash);

        match classify(&events, self.para_id) {
            Ok(Some(bundle)) => {
                tracing::debug!(
                    block = %block,
                    triggering = bundle.triggering_events.len(),
                    "upward messages detected"
                );
                if let Err(e) = self.handler.on_xcm_detected(&block, &bundle).await {
                    if e.stops_poller() {
                        return Err(e);
                    }
                    self.handler.on_error(number, &e).await;
                }
            }
            Ok(None) => {}
            Err(e) => self.handler.on_error(number, &e).await,
        }
        Ok(BlockResult::Done)
    }

    /// Fatal and interrupt errors stop the poller, decode errors mark the block seen, the rest
    /// retry it.
    async fn fetch_failed(
        &self,
        number: u64,
        e: MonitorError,
    ) -> Result<BlockResult, MonitorError> {
        if e.stops_poller() {
            return Err(e);
        }
        if e.kind() == "decode" {
            self.handler.on_error(number, &e).await;
            return Ok(BlockResult::Done);
        }
        Ok(BlockResult::Retry(e))
    }
}
