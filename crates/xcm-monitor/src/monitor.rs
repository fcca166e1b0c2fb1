//! XCM monitor: the [BlockHandler] that turns classified relay blocks into alerts, metrics
//! and checkpoints.

use crate::alert::AlertSink;
use crate::chain::{BlockRef, EventRecord};
use crate::checkpoint::CheckpointStore;
use crate::classifier::{
    derivative_call_payload, our_events, MessagingBundle, TRANSFERRED_WITH_FEE,
};
use crate::error::MonitorError;
use crate::executor::ReconnectingExecutor;
use crate::metrics::Metrics;
use crate::poller::BlockHandler;
use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use std::sync::Arc;

/// One of the controller's parachain events, with its call decoded when it carries one.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerActivity {
    pub event: EventRecord,
    /// Rendered call, or the decode failure.
    pub call: Option<Result<String, String>>,
}

pub struct XcmMonitor {
    relay: Arc<ReconnectingExecutor>,
    para: Arc<ReconnectingExecutor>,
    controller: String,
    checkpoint: Arc<dyn CheckpointStore>,
    alerts: Arc<dyn AlertSink>,
    metrics: Arc<Metrics>,
}

impl XcmMonitor {
    pub fn new(
        relay: Arc<ReconnectingExecutor>,
        para: Arc<ReconnectingExecutor>,
        controller: impl Into<String>,
        checkpoint: Arc<dyn CheckpointStore>,
        alerts: Arc<dyn AlertSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            relay,
            para,
            controller: controller.into(),
            checkpoint,
            alerts,
            metrics,
        }
    }

    async fn controller_activity(
        &self,
        block: &BlockRef,
        para_block_hash: &str,
    ) -> Result<Vec<ControllerActivity>, MonitorError> {
        let events = match self.para.events_at(para_block_hash).await {
            Ok(events) => events,
            Err(e) if e.stops_poller() => return Err(e),
            Err(e) => {
                self.on_error(block.number, &e).await;
                return Ok(Vec::new());
            }
        };
        let client = self.para.client().await;
        let activity = our_events(&events, &self.controller)
            .into_iter()
            .map(|event| {
                let call = derivative_call_payload(&event).map(|payload| {
                    client
                        .decode_call_payload(payload)
                        .map(|call| call.to_string())
                        .map_err(|e| {
                            tracing::warn!(
                                block = block.number,
                                reason = %e,
                                "call payload not decodable"
                            );
                            self.metrics.inc_service_error("decode_call");
                            e.to_string()
                        })
                });
                ControllerActivity { event, call }
            })
            .collect();
        Ok(activity)
    }

    async fn block_time(&self, hash: &str) -> Result<Option<u64>, MonitorError> {
        match self.relay.timestamp_at(hash).await {
            Ok(ms) => Ok(Some(ms)),
            Err(e) if e.stops_poller() => Err(e),
            Err(e) => {
                tracing::debug!(reason = %e, "block timestamp unavailable");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl BlockHandler for XcmMonitor {
    async fn on_xcm_detected(
        &self,
        block: &BlockRef,
        bundle: &MessagingBundle,
    ) -> Result<(), MonitorError> {
        let failures = bundle.failures();
        if failures.is_empty() {
            tracing::debug!(
                block = %block,
                executed = bundle.triggering_events.len(),
                "upward messages completed"
            );
            return Ok(());
        }

        self.metrics.inc_failed_xcm(failures.len() as u64);
        self.metrics.set_last_failed_block(block.number);
        tracing::warn!(
            block = %block,
            failed = failures.len(),
            executed = bundle.triggering_events.len(),
            "failed upward messages"
        );

        let activity = self
            .controller_activity(block, &bundle.source_block_hash)
            .await?;
        let timestamp = match &block.hash {
            Some(hash) => self.block_time(hash).await?,
            None => None,
        };

        let text = format_alert(block, timestamp, bundle, &activity);
        if let Err(e) = self.alerts.send_message(&text).await {
            tracing::warn!(block = block.number, reason = %e, "alert delivery failed");
            self.metrics.inc_service_error(e.kind());
        }
        Ok(())
    }

    async fn on_error(&self, block_number: u64, error: &MonitorError) {
        tracing::error!(
            block = block_number,
            kind = error.kind(),
            reason = %error,
            "block handling error"
        );
        self.metrics.inc_service_error(error.kind());
    }

    async fn on_checkpoint(&self, block_number: u64) -> Result<(), MonitorError> {
        self.checkpoint.update_last_block(block_number).await?;
        self.metrics.set_last_processed_block(block_number);
        Ok(())
    }
}

fn field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "?".to_string(),
    }
}

fn format_time(timestamp_ms: Option<u64>) -> String {
    timestamp_ms
        .and_then(|ms| {
            let dt = DateTime::from_timestamp_millis(i64::try_from(ms).ok()?)?;
            Some(format!("{} ({})", dt.format("%Y-%m-%d %H:%M:%S UTC"), ms))
        })
        .unwrap_or_else(|| "unknown".to_string())
}

/// Failures and activity items listed per alert; the rest are counted.
pub const MAX_LISTED_ITEMS: usize = 10;

fn push_limited(lines: &mut Vec<String>, items: impl ExactSizeIterator<Item = String>) {
    let total = items.len();
    lines.extend(items.take(MAX_LISTED_ITEMS));
    if total > MAX_LISTED_ITEMS {
        lines.push(format!("... and {} more", total - MAX_LISTED_ITEMS));
    }
}

fn activity_line(item: &ControllerActivity) -> String {
    let ev = &item.event;
    let detail = match &item.call {
        Some(Ok(call)) => call.clone(),
        Some(Err(reason)) => format!("undecodable call ({})", reason),
        None if ev.is(TRANSFERRED_WITH_FEE.0, TRANSFERRED_WITH_FEE.1) => format!(
            "amount={} fee={}",
            field(ev.data.get(2)),
            field(ev.data.get(3))
        ),
        None => String::new(),
    };
    format!("- {}.{} {}", ev.section, ev.method, detail)
        .trim_end()
        .to_string()
}

/// Plain-text alert body for a block with failed upward messages.
pub fn format_alert(
    block: &BlockRef,
    timestamp_ms: Option<u64>,
    bundle: &MessagingBundle,
    activity: &[ControllerActivity],
) -> String {
    let failures = bundle.failures();
    let mut lines = vec![
        format!("XCM failure on relay block {}", block),
        format!("Time: {}", format_time(timestamp_ms)),
        format!(
            "Failed upward messages: {} of {}",
            failures.len(),
            bundle.triggering_events.len()
        ),
    ];
    push_limited(&mut lines, failures.iter().map(|ev| format!("- {}", ev)));
    lines.push(format!("Parachain block: {}", bundle.source_block_hash));
    if activity.is_empty() {
        lines.push("Controller activity: none".to_string());
    } else {
        lines.push("Controller activity:".to_string());
        push_limited(&mut lines, activity.iter().map(activity_line));
    }
    lines.join("\n")
}
