//! crates/progress_sync_core/src/sync/mod.rs
//!
//! Sync & Conflict Engine: local buffering, the push path, divergence
//! detection, and the pluggable conflict policies.

pub mod conflict;
pub mod engine;
pub mod queue;

pub use conflict::{merge_by_id, reconcile_write, resolve, ConflictPolicy, Reconciled, Resolution};
pub use engine::{
    ConflictChoice, OutgoingPush, PushOutcome, PushSource, RemoteOutcome, SyncEngine, SyncState,
    SyncStatus, UpdateOutcome,
};
pub use queue::{OfflineQueue, QueuedUpdate};
