//! crates/progress_sync_core/src/sync/engine.rs
//!
//! The per-lesson sync state machine. It performs no I/O: the owning session
//! asks it for the next push, performs the store call, and hands the result
//! back. Remote snapshots from the subscription go through `apply_remote`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device::DeviceIdentity;
use crate::domain::{ConflictResolution, LessonKey, ProgressPatch, ProgressRecord, SyncConflict};
use crate::ports::{PortError, PortResult};
use crate::sync::conflict::{copy_field, resolve, ConflictPolicy};
use crate::sync::queue::OfflineQueue;

//=========================================================================================
// Status Types
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Nothing has been exchanged with the store yet.
    LocalOnly,
    Synced,
    /// A remote snapshot is waiting on the learner's conflict choices.
    Diverged,
    OfflineQueued,
    PendingPush,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub pending_sync_count: usize,
    pub conflict_count: usize,
    pub error: Option<String>,
    pub state: SyncState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Applied while online; the caller should flush.
    PushRequested,
    /// Applied while offline; a snapshot was queued.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSource {
    Queued { seq: u64 },
    Current { revision: u64 },
}

/// A record stamped and ready to be written to the store.
#[derive(Debug, Clone)]
pub struct OutgoingPush {
    pub record: ProgressRecord,
    pub source: PushSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// Already known; nothing changed.
    Echo,
    /// No unpushed local state; the remote replaced the local record.
    Adopted,
    /// The active policy combined both sides.
    Merged { conflicts: Vec<SyncConflict> },
    /// The learner must settle these fields before pushes resume.
    NeedsUser { conflicts: Vec<SyncConflict> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushOutcome {
    Accepted { sync_version: u64 },
    /// The store re-merged the write; its result went through divergence handling.
    Remerged(RemoteOutcome),
    Failed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    Local,
    Remote,
}

//=========================================================================================
// SyncEngine
//=========================================================================================

pub struct SyncEngine {
    device: DeviceIdentity,
    policy: ConflictPolicy,
    record: ProgressRecord,
    has_remote: bool,
    last_known_version: u64,
    dirty: bool,
    revision: u64,
    queue: OfflineQueue,
    online: bool,
    in_flight: Option<u64>,
    last_sync_time: Option<DateTime<Utc>>,
    pending_remote: Option<ProgressRecord>,
    unresolved: Vec<SyncConflict>,
    conflict_count: usize,
    error: Option<String>,
}

impl SyncEngine {
    pub fn new(
        key: &LessonKey,
        device: DeviceIdentity,
        policy: ConflictPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let record = ProgressRecord::new(key, &device.current_device(now), now);
        Self {
            device,
            policy,
            record,
            has_remote: false,
            last_known_version: 0,
            dirty: false,
            revision: 0,
            queue: OfflineQueue::default(),
            online: true,
            in_flight: None,
            last_sync_time: None,
            pending_remote: None,
            unresolved: Vec::new(),
            conflict_count: 0,
            error: None,
        }
    }

    pub fn record(&self) -> &ProgressRecord {
        &self.record
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    pub fn last_known_version(&self) -> u64 {
        self.last_known_version
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn has_unpushed(&self) -> bool {
        self.dirty || !self.queue.is_empty()
    }

    pub fn unresolved_conflicts(&self) -> &[SyncConflict] {
        &self.unresolved
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn state(&self) -> SyncState {
        if self.pending_remote.is_some() {
            SyncState::Diverged
        } else if !self.online && !self.queue.is_empty() {
            SyncState::OfflineQueued
        } else if self.has_unpushed() {
            SyncState::PendingPush
        } else if !self.has_remote {
            SyncState::LocalOnly
        } else {
            SyncState::Synced
        }
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_online: self.online,
            is_syncing: self.in_flight.is_some(),
            last_sync_time: self.last_sync_time,
            pending_sync_count: self.queue.len(),
            conflict_count: self.conflict_count,
            error: self.error.clone(),
            state: self.state(),
        }
    }

    //=====================================================================================
    // Local Updates
    //=====================================================================================

    /// Applies a patch to the local record. A content block of the wrong type is
    /// dropped with a warning; the universal fields still apply.
    pub fn update_progress(&mut self, patch: ProgressPatch, now: DateTime<Utc>) -> UpdateOutcome {
        if let Err(e) = self.record.apply_patch(patch) {
            warn!(lesson_id = %self.record.lesson_id, error = %e, "Ignoring mismatched content block.");
        }
        self.record.last_updated = now;
        self.record.device_id = self.device.id().to_string();
        self.record.device_info = self.device.current_device(now);
        self.revision += 1;

        if self.online {
            self.dirty = true;
            UpdateOutcome::PushRequested
        } else {
            self.queue.push(self.record.clone(), now);
            self.dirty = false;
            debug!(pending = self.queue.len(), "Queued offline update.");
            UpdateOutcome::Queued
        }
    }

    /// Returns true when coming online left something to flush.
    pub fn set_online(&mut self, online: bool) -> bool {
        if self.online != online {
            info!(online, lesson_id = %self.record.lesson_id, "Connectivity changed.");
        }
        self.online = online;
        online && self.has_unpushed()
    }

    //=====================================================================================
    // Push Path
    //=====================================================================================

    /// The next write to send: the oldest queued snapshot, else the dirty current
    /// record. `None` while offline, while a push is in flight, or while a
    /// conflict awaits the learner.
    pub fn begin_push(&mut self) -> Option<OutgoingPush> {
        if !self.online || self.in_flight.is_some() || self.pending_remote.is_some() {
            return None;
        }
        let version = self.last_known_version + 1;
        let push = if let Some(front) = self.queue.front() {
            let mut record = front.record.clone();
            record.sync_version = version;
            OutgoingPush {
                record,
                source: PushSource::Queued { seq: front.seq },
            }
        } else if self.dirty {
            let mut record = self.record.clone();
            record.sync_version = version;
            OutgoingPush {
                record,
                source: PushSource::Current {
                    revision: self.revision,
                },
            }
        } else {
            return None;
        };
        self.in_flight = Some(version);
        Some(push)
    }

    pub fn complete_push(
        &mut self,
        push: OutgoingPush,
        result: PortResult<ProgressRecord>,
        now: DateTime<Utc>,
    ) -> PushOutcome {
        self.in_flight = None;
        match result {
            Ok(stored) => {
                match push.source {
                    PushSource::Queued { seq } => {
                        self.queue.pop_if_front(seq);
                    }
                    PushSource::Current { revision } => {
                        if revision == self.revision {
                            self.dirty = false;
                        }
                    }
                }
                self.error = None;
                self.last_sync_time = Some(now);
                self.has_remote = true;

                if stored.same_progress(&push.record) {
                    self.last_known_version = stored.sync_version;
                    self.record.sync_version = stored.sync_version;
                    self.record.sync_conflicts = stored.sync_conflicts;
                    debug!(sync_version = self.last_known_version, "Push accepted.");
                    PushOutcome::Accepted {
                        sync_version: self.last_known_version,
                    }
                } else {
                    debug!(sync_version = stored.sync_version, "Store re-merged push.");
                    PushOutcome::Remerged(self.apply_remote(stored, now))
                }
            }
            Err(e) => {
                if let PushSource::Current { revision } = push.source {
                    self.queue.push(push.record, now);
                    if revision == self.revision {
                        self.dirty = false;
                    }
                }
                warn!(error = %e, pending = self.queue.len(), "Push failed; will retry.");
                let message = e.to_string();
                self.error = Some(message.clone());
                PushOutcome::Failed { message }
            }
        }
    }

    //=====================================================================================
    // Remote Path
    //=====================================================================================

    pub fn apply_remote(&mut self, remote: ProgressRecord, now: DateTime<Utc>) -> RemoteOutcome {
        if remote.user_id != self.record.user_id || remote.lesson_id != self.record.lesson_id {
            warn!(lesson_id = %remote.lesson_id, "Ignoring remote record for another lesson.");
            return RemoteOutcome::Echo;
        }
        if self.has_remote && remote.sync_version <= self.last_known_version {
            debug!(sync_version = remote.sync_version, "Ignoring echo.");
            return RemoteOutcome::Echo;
        }
        // Our own write, delivered before its push completed.
        if self.in_flight == Some(remote.sync_version) && remote.device_id == self.device.id() {
            debug!(sync_version = remote.sync_version, "Ignoring echo of in-flight push.");
            return RemoteOutcome::Echo;
        }

        self.has_remote = true;
        if !self.has_unpushed() && self.pending_remote.is_none() {
            self.last_known_version = remote.sync_version;
            self.record = remote;
            debug!(sync_version = self.last_known_version, "Adopted remote record.");
            return RemoteOutcome::Adopted;
        }

        // A newer remote replaces one still waiting on the learner.
        self.pending_remote = None;
        self.unresolved.clear();
        let resolution = resolve(self.policy, &self.record, &remote, now);
        self.last_known_version = remote.sync_version;
        self.conflict_count += resolution.conflicts.len();

        if resolution.needs_user {
            info!(
                fields = resolution.conflicts.len(),
                "Conflict needs a decision from the learner."
            );
            self.record.sync_version = remote.sync_version;
            self.unresolved = resolution.conflicts.clone();
            self.pending_remote = Some(remote);
            return RemoteOutcome::NeedsUser {
                conflicts: resolution.conflicts,
            };
        }

        let mut merged = resolution.record;
        merged.record_conflicts(&resolution.conflicts);
        let superseded = self.queue.clear();
        if superseded > 0 {
            debug!(superseded, "Merged record supersedes queued snapshots.");
        }
        self.dirty = !merged.same_progress(&remote) || superseded > 0;
        if self.dirty {
            self.revision += 1;
        }
        self.record = merged;
        info!(
            conflicts = resolution.conflicts.len(),
            policy = %self.policy,
            "Resolved divergent record."
        );
        RemoteOutcome::Merged {
            conflicts: resolution.conflicts,
        }
    }

    /// Settles one unresolved field. Returns true once every field is settled and
    /// the merged record is ready to push.
    pub fn resolve_conflict(
        &mut self,
        field: &str,
        choice: ConflictChoice,
        now: DateTime<Utc>,
    ) -> PortResult<bool> {
        let index = self
            .unresolved
            .iter()
            .position(|c| c.field == field)
            .ok_or_else(|| PortError::NotFound(format!("no unresolved conflict on '{}'", field)))?;
        let remote = self
            .pending_remote
            .as_ref()
            .ok_or_else(|| PortError::Unexpected("conflict without a remote snapshot".into()))?;

        let mut conflict = self.unresolved.remove(index);
        conflict.resolution = match choice {
            ConflictChoice::Local => ConflictResolution::Local,
            ConflictChoice::Remote => {
                copy_field(&mut self.record, remote, field);
                ConflictResolution::Remote
            }
        };
        conflict.timestamp = now;
        self.record.record_conflicts(std::slice::from_ref(&conflict));

        if !self.unresolved.is_empty() {
            return Ok(false);
        }
        self.pending_remote = None;
        self.record.last_updated = now;
        self.dirty = true;
        self.revision += 1;
        info!(lesson_id = %self.record.lesson_id, "All conflicts resolved.");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContentType;

    const UA: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0";

    fn key() -> LessonKey {
        LessonKey {
            user_id: "u1".into(),
            lesson_id: "l1".into(),
            course_id: "c1".into(),
            content_type: ContentType::Text,
        }
    }

    fn engine(policy: ConflictPolicy) -> SyncEngine {
        let device = DeviceIdentity::from_parts("device_a".into(), UA, Utc::now());
        SyncEngine::new(&key(), device, policy, Utc::now())
    }

    fn remote(version: u64, completion: f64) -> ProgressRecord {
        let device = DeviceIdentity::from_parts("device_b".into(), UA, Utc::now());
        let mut record = ProgressRecord::new(&key(), &device.current_device(Utc::now()), Utc::now());
        record.sync_version = version;
        record.completion_percentage = completion;
        record
    }

    fn pct(value: f64) -> ProgressPatch {
        ProgressPatch {
            completion_percentage: Some(value),
            ..Default::default()
        }
    }

    /// Plays the store's part: accept the write as stamped.
    fn accept(engine: &mut SyncEngine) -> Option<PushOutcome> {
        let push = engine.begin_push()?;
        let stored = push.record.clone();
        Some(engine.complete_push(push, Ok(stored), Utc::now()))
    }

    #[test]
    fn offline_updates_queue_and_replay_in_order() {
        let mut engine = engine(ConflictPolicy::MostProgress);
        engine.set_online(false);
        for value in [10.0, 20.0, 30.0] {
            assert_eq!(engine.update_progress(pct(value), Utc::now()), UpdateOutcome::Queued);
        }
        assert_eq!(engine.status().pending_sync_count, 3);
        assert_eq!(engine.state(), SyncState::OfflineQueued);
        assert!(engine.begin_push().is_none());

        assert!(engine.set_online(true));
        let mut pushed = Vec::new();
        while let Some(push) = engine.begin_push() {
            pushed.push((push.record.completion_percentage, push.record.sync_version));
            let stored = push.record.clone();
            engine.complete_push(push, Ok(stored), Utc::now());
        }
        assert_eq!(pushed, vec![(10.0, 1), (20.0, 2), (30.0, 3)]);
        assert_eq!(engine.status().pending_sync_count, 0);
        assert_eq!(engine.state(), SyncState::Synced);
    }

    #[test]
    fn failed_push_moves_current_state_into_queue() {
        let mut engine = engine(ConflictPolicy::MostProgress);
        engine.update_progress(pct(40.0), Utc::now());
        let push = engine.begin_push().unwrap();
        let outcome = engine.complete_push(
            push,
            Err(PortError::Unavailable("store down".into())),
            Utc::now(),
        );
        assert!(matches!(outcome, PushOutcome::Failed { .. }));
        let status = engine.status();
        assert_eq!(status.pending_sync_count, 1);
        assert!(status.error.unwrap().contains("store down"));

        assert!(matches!(accept(&mut engine), Some(PushOutcome::Accepted { sync_version: 1 })));
        assert_eq!(engine.status().error, None);
        assert!(accept(&mut engine).is_none());
    }

    #[test]
    fn same_snapshot_twice_is_an_echo() {
        let mut engine = engine(ConflictPolicy::MostProgress);
        let snapshot = remote(3, 55.0);
        assert_eq!(engine.apply_remote(snapshot.clone(), Utc::now()), RemoteOutcome::Adopted);
        let before = engine.record().clone();
        assert_eq!(engine.apply_remote(snapshot, Utc::now()), RemoteOutcome::Echo);
        assert_eq!(engine.record(), &before);
        assert_eq!(engine.last_known_version(), 3);
    }

    #[test]
    fn unpushed_local_state_is_merged_with_remote() {
        let mut engine = engine(ConflictPolicy::MostProgress);
        engine.apply_remote(remote(1, 10.0), Utc::now());
        engine.update_progress(pct(60.0), Utc::now());

        let outcome = engine.apply_remote(remote(2, 40.0), Utc::now());
        assert!(matches!(outcome, RemoteOutcome::Merged { .. }));
        assert_eq!(engine.record().completion_percentage, 60.0);
        assert_eq!(engine.state(), SyncState::PendingPush);

        let push = engine.begin_push().unwrap();
        assert_eq!(push.record.sync_version, 3);
    }

    #[test]
    fn user_choice_pauses_pushes_until_every_field_is_settled() {
        let mut engine = engine(ConflictPolicy::UserChoice);
        engine.apply_remote(remote(1, 10.0), Utc::now());
        engine.update_progress(
            ProgressPatch {
                completion_percentage: Some(30.0),
                time_spent: Some(100.0),
                ..Default::default()
            },
            Utc::now(),
        );
        let mut theirs = remote(2, 70.0);
        theirs.time_spent = 20.0;
        let outcome = engine.apply_remote(theirs, Utc::now());
        let RemoteOutcome::NeedsUser { conflicts } = outcome else {
            panic!("expected a pending decision");
        };
        assert_eq!(conflicts.len(), 2);
        assert_eq!(engine.state(), SyncState::Diverged);
        assert!(engine.begin_push().is_none());

        assert!(!engine
            .resolve_conflict("completionPercentage", ConflictChoice::Remote, Utc::now())
            .unwrap());
        assert!(engine
            .resolve_conflict("timeSpent", ConflictChoice::Local, Utc::now())
            .unwrap());
        assert!(engine
            .resolve_conflict("timeSpent", ConflictChoice::Local, Utc::now())
            .is_err());

        assert_eq!(engine.record().completion_percentage, 70.0);
        assert_eq!(engine.record().time_spent, 100.0);
        let push = engine.begin_push().unwrap();
        assert_eq!(push.record.sync_version, 3);
    }

    #[test]
    fn remerged_store_result_is_fed_back() {
        let mut engine = engine(ConflictPolicy::MostProgress);
        engine.update_progress(pct(20.0), Utc::now());
        let push = engine.begin_push().unwrap();
        let mut stored = push.record.clone();
        stored.completion_percentage = 80.0;
        stored.sync_version = 4;
        let outcome = engine.complete_push(push, Ok(stored), Utc::now());
        assert_eq!(outcome, PushOutcome::Remerged(RemoteOutcome::Adopted));
        assert_eq!(engine.record().completion_percentage, 80.0);
        assert_eq!(engine.last_known_version(), 4);
        assert_eq!(engine.state(), SyncState::Synced);
    }
}
