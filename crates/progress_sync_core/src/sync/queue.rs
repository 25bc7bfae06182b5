//! crates/progress_sync_core/src/sync/queue.rs
//!
//! Ordered buffer of record snapshots taken while the device was offline.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::domain::ProgressRecord;

#[derive(Debug, Clone)]
pub struct QueuedUpdate {
    /// Monotonic per-queue sequence number, used to match push completions.
    pub seq: u64,
    pub record: ProgressRecord,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct OfflineQueue {
    items: VecDeque<QueuedUpdate>,
    next_seq: u64,
}

impl OfflineQueue {
    pub fn push(&mut self, record: ProgressRecord, queued_at: DateTime<Utc>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(QueuedUpdate {
            seq,
            record,
            queued_at,
        });
        seq
    }

    pub fn front(&self) -> Option<&QueuedUpdate> {
        self.items.front()
    }

    /// Removes the front item only if it is the one identified by `seq`.
    pub fn pop_if_front(&mut self, seq: u64) -> Option<QueuedUpdate> {
        match self.items.front() {
            Some(item) if item.seq == seq => self.items.pop_front(),
            _ => None,
        }
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.items.len();
        self.items.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
