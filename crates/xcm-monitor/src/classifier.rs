//! Event classification for relay blocks and parachain blocks.
//!
//! Relay side: a block is interesting when it executed upward messages (`ump.ExecutedUpward`)
//! and included a candidate (`paraInclusion.CandidateIncluded`) of the monitored parachain.
//! Parachain side: "our" events are derivative transacts and fee-inclusive transfers sent by
//! the controller account.

use crate::chain::EventRecord;
use crate::error::MonitorError;
use serde_json::Value;

pub const UMP_SECTION: &str = "ump";
pub const EXECUTED_UPWARD: &str = "ExecutedUpward";
pub const PARA_INCLUSION_SECTION: &str = "paraInclusion";
pub const CANDIDATE_INCLUDED: &str = "CandidateIncluded";

/// Parachain event shapes decoded in alerts, as (section, method).
pub const TRANSACTED_DERIVATIVE: (&str, &str) = ("xcmTransactor", "TransactedDerivative");
pub const TRANSFERRED_WITH_FEE: (&str, &str) = ("xTokens", "TransferredWithFee");

/// Upward messages executed in one relay block, tied to the parachain block that sent them.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagingBundle {
    /// Every `ExecutedUpward` event in the relay block.
    pub triggering_events: Vec<EventRecord>,
    /// Hash of the parachain block referenced by the candidate descriptor (`paraHead`).
    pub source_block_hash: String,
}

impl MessagingBundle {
    /// Triggering events whose outcome is not `complete`.
    pub fn failures(&self) -> Vec<&EventRecord> {
        failed_events(&self.triggering_events)
    }
}

/// True when the outcome in `data[1]` carries a `complete` marker.
pub fn is_complete(event: &EventRecord) -> bool {
    match event.data.get(1) {
        Some(Value::Object(map)) => map.keys().any(|k| k.eq_ignore_ascii_case("complete")),
        Some(Value::String(s)) => s.trim_start().to_ascii_lowercase().starts_with("complete"),
        _ => false,
    }
}

pub fn failed_events(events: &[EventRecord]) -> Vec<&EventRecord> {
    events.iter().filter(|ev| !is_complete(ev)).collect()
}

fn para_id_of(descriptor: &Value) -> Option<u32> {
    let id = descriptor.get("paraId")?;
    match id {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Classify one relay block. `Ok(None)` means the block holds nothing for `para_id`.
pub fn classify(
    events: &[EventRecord],
    para_id: u32,
) -> Result<Option<MessagingBundle>, MonitorError> {
    let triggering_events: Vec<EventRecord> = events
        .iter()
        .filter(|ev| ev.is(UMP_SECTION, EXECUTED_UPWARD))
        .cloned()
        .collect();
    if triggering_events.is_empty() {
        return Ok(None);
    }

    let descriptor = events
        .iter()
        .filter(|ev| ev.is(PARA_INCLUSION_SECTION, CANDIDATE_INCLUDED))
        .filter_map(|ev| ev.data.first()?.get("descriptor"))
        .find(|descriptor| para_id_of(descriptor) == Some(para_id));
    let descriptor = match descriptor {
        Some(d) => d,
        None => return Ok(None),
    };

    let para_head = descriptor
        .get("paraHead")
        .and_then(|h| h.as_str())
        .ok_or_else(|| {
            MonitorError::Decode(format!(
                "candidate descriptor for para {} has no paraHead",
                para_id
            ))
        })?;

    Ok(Some(MessagingBundle {
        triggering_events,
        source_block_hash: para_head.to_string(),
    }))
}

fn sender_matches(event: &EventRecord, controller: &str) -> bool {
    event
        .data
        .first()
        .and_then(|v| v.as_str())
        .map(|sender| sender.eq_ignore_ascii_case(controller))
        .unwrap_or(false)
}

/// Parachain events sent by `controller` with one of the recognized shapes.
pub fn our_events(events: &[EventRecord], controller: &str) -> Vec<EventRecord> {
    events
        .iter()
        .filter(|ev| {
            ev.is(TRANSACTED_DERIVATIVE.0, TRANSACTED_DERIVATIVE.1)
                || ev.is(TRANSFERRED_WITH_FEE.0, TRANSFERRED_WITH_FEE.1)
        })
        .filter(|ev| sender_matches(ev, controller))
        .cloned()
        .collect()
}

/// Call payload of a derivative transact (`data[2]`), if `event` is one.
pub fn derivative_call_payload(event: &EventRecord) -> Option<&str> {
    if !event.is(TRANSACTED_DERIVATIVE.0, TRANSACTED_DERIVATIVE.1) {
        return None;
    }
    event.data.get(2)?.as_str()
}
