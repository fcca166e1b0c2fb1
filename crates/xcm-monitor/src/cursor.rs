//! Processing cursor: the last relay block whose processing completed.
//!
//! Seeded from the checkpoint store (or the configured initial block) and advanced one block
//! at a time by the poller. It never moves backwards and never skips.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cursor: last fired block. Shared between the poller and observers, written only by the poller.
#[derive(Debug, Default)]
pub struct Cursor {
    last_fired_block: AtomicU64,
}

impl Cursor {
    pub fn new(last_fired_block: u64) -> Self {
        Self {
            last_fired_block: AtomicU64::new(last_fired_block),
        }
    }

    pub fn last_fired_block(&self) -> u64 {
        self.last_fired_block.load(Ordering::Acquire)
    }

    /// Next block to visit.
    pub fn next_block(&self) -> u64 {
        self.last_fired_block().saturating_add(1)
    }

    /// Mark `block` as fired. Only the immediate successor is accepted.
    pub fn advance_to(&self, block: u64) -> bool {
        let current = self.last_fired_block();
        if block != current.saturating_add(1) {
            tracing::error!(current, block, "refusing non-sequential cursor advance");
            return false;
        }
        self.last_fired_block.store(block, Ordering::Release);
        true
    }
}
