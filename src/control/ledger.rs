//! Bounded record of setpoint message ids that have already been applied.

use std::collections::{HashMap, VecDeque};

/// Default number of ids retained per device.
pub const DEFAULT_CAPACITY: usize = 4096;
/// Default retention window: one day in milliseconds.
pub const DEFAULT_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// Idempotency ledger with capacity and age based eviction.
///
/// Ids are kept in insertion order. When the ledger is full the oldest id is
/// dropped, and ids older than the retention window are pruned on every
/// insert. A command re-delivered after its id was evicted would be applied
/// again; both limits should comfortably exceed the broker's redelivery
/// horizon.
#[derive(Debug, Clone)]
pub struct IdempotencyLedger {
    capacity: usize,
    retention_ms: i64,
    seen: HashMap<String, i64>,
    order: VecDeque<(String, i64)>,
}

impl Default for IdempotencyLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_RETENTION_MS)
    }
}

impl IdempotencyLedger {
    /// Creates an empty ledger. A capacity of zero is raised to one.
    pub fn new(capacity: usize, retention_ms: i64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            retention_ms: retention_ms.max(0),
            seen: HashMap::with_capacity(capacity.min(1024)),
            order: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Returns `true` if `id` was recorded and has not been evicted.
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains_key(id)
    }

    /// Records `id` as applied at `now_ms`.
    pub fn insert(&mut self, id: &str, now_ms: i64) {
        self.prune(now_ms);
        if self.seen.contains_key(id) {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(id.to_string(), now_ms);
        self.order.push_back((id.to_string(), now_ms));
    }

    /// Drops every id recorded before `now_ms - retention`.
    pub fn prune(&mut self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.retention_ms);
        while let Some((_, seen_at)) = self.order.front() {
            if *seen_at >= cutoff {
                break;
            }
            if let Some((oldest, _)) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
