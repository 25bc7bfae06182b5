//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `ProgressStore` port from the core crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Writes are reconciled inside a transaction holding the row lock, then
//! announced with `pg_notify`. A listener task turns those notifications back
//! into records and fans them out to subscribers through a `ChangeHub`, so
//! every API instance sees writes made by the others.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use progress_sync_core::device::mark_inactive;
use progress_sync_core::ports::{PortError, PortResult, ProgressStore, ProgressStream};
use progress_sync_core::store::ChangeHub;
use progress_sync_core::{reconcile_write, ConflictPolicy, DeviceInfo, ProgressRecord};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The `LISTEN/NOTIFY` channel accepted writes are announced on.
pub const CHANGE_CHANNEL: &str = "lesson_progress_changed";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `ProgressStore` port.
#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
    hub: Arc<ChangeHub>,
    policy: ConflictPolicy,
    inactive_after: Duration,
}

impl PgProgressStore {
    /// Creates a new `PgProgressStore`. Subscribers only receive changes once
    /// `start_change_feed` is running.
    pub fn new(pool: PgPool, policy: ConflictPolicy, inactive_after: Duration) -> Self {
        Self {
            pool,
            hub: Arc::new(ChangeHub::default()),
            policy,
            inactive_after,
        }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Listens for write notifications and republishes the written records
    /// until `cancel` fires.
    pub async fn start_change_feed(
        &self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, sqlx::Error> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(CHANGE_CHANNEL).await?;
        info!(channel = CHANGE_CHANNEL, "Listening for progress changes.");

        let store = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = listener.recv() => match notification {
                        Ok(notification) => store.relay(notification.payload()).await,
                        Err(e) => {
                            // The listener reconnects on the next `recv`.
                            warn!(error = %e, "Progress change listener lost its connection.");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    },
                }
            }
            debug!("Progress change feed stopped.");
        }))
    }

    async fn relay(&self, payload: &str) {
        let notice = match serde_json::from_str::<ChangeNotice>(payload) {
            Ok(notice) => notice,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed change notification.");
                return;
            }
        };
        if self.hub.subscriber_count(&notice.user_id, &notice.lesson_id) == 0 {
            return;
        }
        match self.get(&notice.user_id, &notice.lesson_id).await {
            Ok(Some(record)) => {
                debug!(
                    lesson_id = %record.lesson_id,
                    sync_version = record.sync_version,
                    announced = notice.sync_version,
                    "Relaying progress change."
                );
                self.hub.publish(&record);
            }
            Ok(None) => debug!(lesson_id = %notice.lesson_id, "Changed record no longer exists."),
            Err(e) => warn!(error = %e, "Failed to load changed record."),
        }
    }

    /// One attempt at a write. `None` means a concurrent first write won the
    /// insert and the caller should try again against the stored row.
    async fn write_once(&self, record: &ProgressRecord) -> PortResult<Option<ProgressRecord>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let existing = sqlx::query_scalar::<_, Json<ProgressRecord>>(
            "SELECT record FROM lesson_progress WHERE user_id = $1 AND lesson_id = $2 FOR UPDATE",
        )
        .bind(&record.user_id)
        .bind(&record.lesson_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .map(|json| json.0);

        let reconciled = reconcile_write(existing.as_ref(), record.clone(), self.policy, Utc::now());
        let stored = reconciled.record;
        let version = to_db_version(stored.sync_version)?;

        if existing.is_some() {
            sqlx::query(
                "UPDATE lesson_progress SET sync_version = $3, record = $4, updated_at = now() \
                 WHERE user_id = $1 AND lesson_id = $2",
            )
            .bind(&stored.user_id)
            .bind(&stored.lesson_id)
            .bind(version)
            .bind(Json(&stored))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        } else {
            let inserted = sqlx::query(
                "INSERT INTO lesson_progress (user_id, lesson_id, sync_version, record) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (user_id, lesson_id) DO NOTHING",
            )
            .bind(&stored.user_id)
            .bind(&stored.lesson_id)
            .bind(version)
            .bind(Json(&stored))
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            if inserted.rows_affected() == 0 {
                return Ok(None);
            }
        }

        upsert_device(&mut tx, &stored).await?;

        let notice = ChangeNotice {
            user_id: stored.user_id.clone(),
            lesson_id: stored.lesson_id.clone(),
            sync_version: stored.sync_version,
        };
        let payload =
            serde_json::to_string(&notice).map_err(|e| PortError::Unexpected(e.to_string()))?;
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(CHANGE_CHANNEL)
            .bind(payload)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        if reconciled.merged {
            debug!(lesson_id = %stored.lesson_id, sync_version = stored.sync_version, "Re-merged stale write.");
        }
        Ok(Some(stored))
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

/// Payload of a change notification; the record itself is re-read because
/// notifications are size-limited.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeNotice {
    user_id: String,
    lesson_id: String,
    sync_version: u64,
}

#[derive(FromRow)]
struct DeviceRow {
    info: Json<DeviceInfo>,
    last_seen: DateTime<Utc>,
    is_active: bool,
}

impl DeviceRow {
    fn to_domain(self) -> DeviceInfo {
        DeviceInfo {
            last_seen: self.last_seen,
            is_active: self.is_active,
            ..self.info.0
        }
    }
}

async fn upsert_device(
    tx: &mut Transaction<'static, Postgres>,
    record: &ProgressRecord,
) -> PortResult<()> {
    sqlx::query(
        "INSERT INTO user_devices (user_id, device_id, info, last_seen, is_active) \
         VALUES ($1, $2, $3, $4, TRUE) \
         ON CONFLICT (user_id, device_id) \
         DO UPDATE SET info = EXCLUDED.info, last_seen = EXCLUDED.last_seen, is_active = TRUE",
    )
    .bind(&record.user_id)
    .bind(&record.device_info.id)
    .bind(Json(&record.device_info))
    .bind(record.last_updated)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;
    Ok(())
}

fn to_db_version(version: u64) -> PortResult<i64> {
    i64::try_from(version)
        .map_err(|_| PortError::InvalidInput(format!("sync version {} is out of range", version)))
}

fn db_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// `ProgressStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn get(&self, user_id: &str, lesson_id: &str) -> PortResult<Option<ProgressRecord>> {
        let record = sqlx::query_scalar::<_, Json<ProgressRecord>>(
            "SELECT record FROM lesson_progress WHERE user_id = $1 AND lesson_id = $2",
        )
        .bind(user_id)
        .bind(lesson_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(record.map(|json| json.0))
    }

    async fn put(&self, record: ProgressRecord) -> PortResult<ProgressRecord> {
        if record.user_id.is_empty() || record.lesson_id.is_empty() {
            return Err(PortError::InvalidInput(
                "record is missing its user or lesson id".into(),
            ));
        }
        // A lost first-write race leaves a stored row, so the retry takes the
        // update path.
        for _ in 0..2 {
            if let Some(stored) = self.write_once(&record).await? {
                return Ok(stored);
            }
        }
        Err(PortError::Unavailable(format!(
            "could not write progress for lesson {}",
            record.lesson_id
        )))
    }

    async fn subscribe(&self, user_id: &str, lesson_id: &str) -> PortResult<ProgressStream> {
        Ok(self.hub.subscribe(user_id, lesson_id))
    }

    async fn list_devices(&self, user_id: &str) -> PortResult<Vec<DeviceInfo>> {
        let cutoff = Utc::now() - self.inactive_after;
        sqlx::query(
            "UPDATE user_devices SET is_active = FALSE \
             WHERE user_id = $1 AND is_active AND last_seen < $2",
        )
        .bind(user_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT info, last_seen, is_active FROM user_devices \
             WHERE user_id = $1 ORDER BY last_seen DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut devices: Vec<DeviceInfo> = rows.into_iter().map(|r| r.to_domain()).collect();
        // Rows written between the update and the select are judged here too.
        mark_inactive(&mut devices, Utc::now(), self.inactive_after);
        Ok(devices)
    }

    async fn remove_device(&self, user_id: &str, device_id: &str) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM user_devices WHERE user_id = $1 AND device_id = $2")
            .bind(user_id)
            .bind(device_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("device {}", device_id)));
        }
        Ok(())
    }
}
