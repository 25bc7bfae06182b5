//! crates/progress_sync_core/src/store/memory.rs
//!
//! An in-process `ProgressStore`. It reconciles writes exactly like the
//! Postgres adapter, keeps a device registry, and can be switched unavailable
//! to exercise retry and offline paths.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::device::mark_inactive;
use crate::domain::{DeviceInfo, ProgressRecord};
use crate::ports::{PortError, PortResult, ProgressStore, ProgressStream};
use crate::store::hub::ChangeHub;
use crate::sync::conflict::{reconcile_write, ConflictPolicy};

#[derive(Default)]
struct Inner {
    records: HashMap<(String, String), ProgressRecord>,
    devices: HashMap<String, Vec<DeviceInfo>>,
    writes: Vec<ProgressRecord>,
}

pub struct InMemoryProgressStore {
    inner: Mutex<Inner>,
    hub: ChangeHub,
    policy: ConflictPolicy,
    inactive_after: Duration,
    available: AtomicBool,
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new(ConflictPolicy::MostProgress)
    }
}

impl InMemoryProgressStore {
    /// `policy` decides how stale writes are re-merged.
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            hub: ChangeHub::default(),
            policy,
            inactive_after: Duration::hours(24),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_inactive_after(mut self, inactive_after: Duration) -> Self {
        self.inactive_after = inactive_after;
        self
    }

    /// While unavailable every call fails with `PortError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Every record this store has persisted, in order.
    pub fn writes(&self) -> Vec<ProgressRecord> {
        self.lock().writes.clone()
    }

    pub fn subscriber_count(&self, user_id: &str, lesson_id: &str) -> usize {
        self.hub.subscriber_count(user_id, lesson_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> PortResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PortError::Unavailable("progress store is offline".into()))
        }
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get(&self, user_id: &str, lesson_id: &str) -> PortResult<Option<ProgressRecord>> {
        self.check_available()?;
        let inner = self.lock();
        Ok(inner
            .records
            .get(&(user_id.to_string(), lesson_id.to_string()))
            .cloned())
    }

    async fn put(&self, record: ProgressRecord) -> PortResult<ProgressRecord> {
        self.check_available()?;
        if record.user_id.is_empty() || record.lesson_id.is_empty() {
            return Err(PortError::InvalidInput(
                "record is missing its user or lesson id".into(),
            ));
        }

        let stored = {
            let mut inner = self.lock();
            let key = (record.user_id.clone(), record.lesson_id.clone());
            let reconciled = reconcile_write(inner.records.get(&key), record, self.policy, Utc::now());
            let stored = reconciled.record;
            if reconciled.merged {
                debug!(lesson_id = %stored.lesson_id, sync_version = stored.sync_version, "Re-merged stale write.");
            }

            let devices = inner.devices.entry(stored.user_id.clone()).or_default();
            let mut device = stored.device_info.clone();
            device.last_seen = stored.last_updated;
            device.is_active = true;
            match devices.iter_mut().find(|d| d.id == device.id) {
                Some(existing) => *existing = device,
                None => devices.push(device),
            }

            inner.records.insert(key, stored.clone());
            inner.writes.push(stored.clone());
            stored
        };

        self.hub.publish(&stored);
        Ok(stored)
    }

    async fn subscribe(&self, user_id: &str, lesson_id: &str) -> PortResult<ProgressStream> {
        self.check_available()?;
        Ok(self.hub.subscribe(user_id, lesson_id))
    }

    async fn list_devices(&self, user_id: &str) -> PortResult<Vec<DeviceInfo>> {
        self.check_available()?;
        let mut inner = self.lock();
        let Some(devices) = inner.devices.get_mut(user_id) else {
            return Ok(Vec::new());
        };
        mark_inactive(devices, Utc::now(), self.inactive_after);
        let mut listed = devices.clone();
        listed.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(listed)
    }

    async fn remove_device(&self, user_id: &str, device_id: &str) -> PortResult<()> {
        self.check_available()?;
        let mut inner = self.lock();
        let devices = inner.devices.entry(user_id.to_string()).or_default();
        let before = devices.len();
        devices.retain(|d| d.id != device_id);
        if devices.len() == before {
            return Err(PortError::NotFound(format!("device {}", device_id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceIdentity;
    use crate::domain::{ContentType, LessonKey};
    use futures::StreamExt;

    const UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) Safari/605.1.15";

    fn record(device_id: &str, version: u64) -> ProgressRecord {
        let key = LessonKey {
            user_id: "u1".into(),
            lesson_id: "l1".into(),
            course_id: "c1".into(),
            content_type: ContentType::Audio,
        };
        let device = DeviceIdentity::from_parts(device_id.into(), UA, Utc::now());
        let mut record = ProgressRecord::new(&key, &device.current_device(Utc::now()), Utc::now());
        record.sync_version = version;
        record
    }

    #[tokio::test]
    async fn writes_are_versioned_and_published() {
        let store = InMemoryProgressStore::default();
        let mut changes = store.subscribe("u1", "l1").await.unwrap();

        let first = store.put(record("device_a", 0)).await.unwrap();
        assert_eq!(first.sync_version, 1);
        let second = store.put(record("device_a", 2)).await.unwrap();
        assert_eq!(second.sync_version, 2);
        let stale = store.put(record("device_b", 1)).await.unwrap();
        assert_eq!(stale.sync_version, 3);

        let delivered: Vec<u64> = changes
            .by_ref()
            .take(3)
            .map(|r| r.unwrap().sync_version)
            .collect()
            .await;
        assert_eq!(delivered, vec![1, 2, 3]);
        assert_eq!(store.writes().len(), 3);
    }

    #[tokio::test]
    async fn device_registry_tracks_and_removes_devices() {
        let store = InMemoryProgressStore::default();
        store.put(record("device_a", 0)).await.unwrap();
        store.put(record("device_b", 2)).await.unwrap();

        let devices = store.list_devices("u1").await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "device_b");
        assert_eq!(devices[0].os, "macOS");

        store.remove_device("u1", "device_a").await.unwrap();
        assert!(matches!(
            store.remove_device("u1", "device_a").await,
            Err(PortError::NotFound(_))
        ));
        assert!(store.list_devices("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryProgressStore::default();
        store.set_available(false);
        assert!(matches!(
            store.put(record("device_a", 0)).await,
            Err(PortError::Unavailable(_))
        ));
        assert!(store.get("u1", "l1").await.is_err());
        store.set_available(true);
        assert!(store.get("u1", "l1").await.unwrap().is_none());
    }
}
