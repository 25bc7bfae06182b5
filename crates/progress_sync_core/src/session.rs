//! crates/progress_sync_core/src/session.rs
//!
//! `LessonSession` is the caller-facing handle for one open lesson. It owns the
//! sync engine, metric collector, completion tracker and resume tracker behind
//! one async mutex, and one driver task that runs the sampling tick, the
//! periodic sync, flush requests and the store subscription.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::completion::{CompletionCriteria, CompletionTracker, Milestone};
use crate::config::{ResumePreferences, SyncOptions};
use crate::device::DeviceIdentity;
use crate::domain::{DeviceInfo, LessonKey, ProgressPatch, ProgressRecord, SyncConflict};
use crate::metrics::{Interaction, MetricAggregate, MetricCollector};
use crate::ports::{LocalStore, PortError, PortResult, ProgressStore, ProgressStream};
use crate::resume::{ResumeAction, ResumeContext, ResumePoint, ResumeTracker};
use crate::sync::{ConflictChoice, PushOutcome, RemoteOutcome, SyncEngine, SyncStatus, UpdateOutcome};

const EVENT_CAPACITY: usize = 64;

//=========================================================================================
// Public Types
//=========================================================================================

/// Everything needed to open a lesson.
#[derive(Debug, Clone)]
pub struct LessonConfig {
    pub key: LessonKey,
    pub title: String,
    pub criteria: Option<CompletionCriteria>,
    pub options: SyncOptions,
    pub resume: ResumePreferences,
}

impl LessonConfig {
    pub fn new(key: LessonKey, title: impl Into<String>) -> Self {
        Self {
            key,
            title: title.into(),
            criteria: None,
            options: SyncOptions::default(),
            resume: ResumePreferences::default(),
        }
    }
}

/// Notifications a session emits over its lifetime.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Completed { score: f64 },
    Milestone(Milestone),
    /// Fields that wait on `resolve_conflict`.
    ConflictDetected { conflicts: Vec<SyncConflict> },
    SyncCompleted { sync_version: u64 },
    SyncFailed { message: String },
    ResumeSelected(ResumePoint),
    ResumeDeclined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub completion_percentage: f64,
    pub completion_score: f64,
    pub is_completed: bool,
    pub milestones: usize,
    pub engagement_score: f64,
    pub time_spent: f64,
    pub interaction_count: u32,
    /// Seconds of active time this session.
    pub focus_time: f64,
}

//=========================================================================================
// Shared State
//=========================================================================================

struct SessionState {
    engine: SyncEngine,
    collector: MetricCollector,
    completion: CompletionTracker,
    resume: ResumeTracker,
    closed: bool,
}

struct Shared {
    key: LessonKey,
    options: SyncOptions,
    store: Arc<dyn ProgressStore>,
    state: Mutex<SessionState>,
    flush_lock: Mutex<()>,
    flush_requested: Notify,
    progress_tx: watch::Sender<ProgressRecord>,
    status_tx: watch::Sender<SyncStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }

    fn publish(&self, state: &SessionState) {
        let record = state.engine.record();
        self.progress_tx.send_if_modified(|current| {
            if current != record {
                *current = record.clone();
                true
            } else {
                false
            }
        });
        let status = state.engine.status();
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    /// Follow-up for any remote snapshot the engine processed.
    fn after_remote(&self, state: &mut SessionState, outcome: RemoteOutcome, now: DateTime<Utc>) {
        match outcome {
            RemoteOutcome::Echo => return,
            RemoteOutcome::Adopted | RemoteOutcome::Merged { .. } => {}
            RemoteOutcome::NeedsUser { conflicts } => {
                self.emit(SessionEvent::ConflictDetected { conflicts });
            }
        }
        let recorded = state.engine.record().time_spent;
        if recorded > state.collector.projected_time(now) {
            state.collector.rebase(recorded, now);
        }
        let record = state.engine.record().clone();
        state.completion.seed(&record);
        state.resume.observe(&record, now);
        if state.engine.has_unpushed() {
            self.flush_requested.notify_one();
        }
    }

    async fn on_remote(&self, remote: ProgressRecord) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let outcome = state.engine.apply_remote(remote, now);
        self.after_remote(&mut state, outcome, now);
        self.publish(&state);
    }

    async fn on_subscription_error(&self, error: PortError) {
        warn!(lesson_id = %self.key.lesson_id, error = %error, "Progress subscription error.");
        let mut state = self.state.lock().await;
        state.engine.set_error(error.to_string());
        self.publish(&state);
        drop(state);
        self.emit(SessionEvent::SyncFailed {
            message: error.to_string(),
        });
    }

    async fn subscribe(&self) -> Option<ProgressStream> {
        match self
            .store
            .subscribe(&self.key.user_id, &self.key.lesson_id)
            .await
        {
            Ok(stream) => {
                debug!(lesson_id = %self.key.lesson_id, "Subscribed to remote changes.");
                Some(stream)
            }
            Err(e) => {
                self.on_subscription_error(e).await;
                None
            }
        }
    }

    /// One sampling tick: metrics, time projection, completion and milestones.
    async fn on_tracking_tick(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let tick = state.collector.tick(now);
        let mut push = state.engine.update_progress(
            ProgressPatch {
                time_spent: Some(tick.time_spent),
                ..Default::default()
            },
            tick.last_updated,
        ) == UpdateOutcome::PushRequested;

        let record = state.engine.record().clone();
        let metrics = state.collector.aggregate().clone();
        if let Some(outcome) = state.completion.check(&record, &metrics) {
            info!(lesson_id = %self.key.lesson_id, score = outcome.score, "Lesson completed.");
            push |= state.engine.update_progress(
                ProgressPatch {
                    is_completed: Some(true),
                    ..Default::default()
                },
                now,
            ) == UpdateOutcome::PushRequested;
            self.emit(SessionEvent::Completed {
                score: outcome.score,
            });
        }
        for milestone in state.completion.check_milestones(&record, &metrics, now) {
            debug!(milestone = %milestone.id, "Milestone reached.");
            self.emit(SessionEvent::Milestone(milestone));
        }
        let record = state.engine.record().clone();
        state.resume.observe(&record, now);
        self.publish(&state);
        if push {
            self.flush_requested.notify_one();
        }
    }

    /// Pushes queued snapshots then the current record, stopping at the first
    /// failure. Serialised by the flush lock so replay stays ordered.
    async fn flush(&self) -> PortResult<()> {
        let _flushing = self.flush_lock.lock().await;
        loop {
            let push = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(PortError::Unexpected("lesson session is closed".into()));
                }
                let Some(push) = state.engine.begin_push() else {
                    return Ok(());
                };
                self.publish(&state);
                push
            };

            let result = self.store.put(push.record.clone()).await;

            let now = Utc::now();
            let mut state = self.state.lock().await;
            if state.closed {
                debug!(lesson_id = %self.key.lesson_id, "Discarding push result after close.");
                return Err(PortError::Unexpected("lesson session is closed".into()));
            }
            match state.engine.complete_push(push, result, now) {
                PushOutcome::Accepted { sync_version } => {
                    self.emit(SessionEvent::SyncCompleted { sync_version });
                }
                PushOutcome::Remerged(outcome) => {
                    self.after_remote(&mut state, outcome, now);
                    self.emit(SessionEvent::SyncCompleted {
                        sync_version: state.engine.last_known_version(),
                    });
                }
                PushOutcome::Failed { message } => {
                    self.publish(&state);
                    self.emit(SessionEvent::SyncFailed {
                        message: message.clone(),
                    });
                    return Err(PortError::Unavailable(message));
                }
            }
            self.publish(&state);
        }
    }
}

async fn next_change(
    subscription: &mut Option<ProgressStream>,
) -> Option<PortResult<ProgressRecord>> {
    match subscription {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// The driver's in-flight flush. Polled as its own `select!` arm so a slow
/// push never holds up ticks or remote changes.
type FlushTask = Pin<Box<dyn Future<Output = ()> + Send>>;

fn start_flush(shared: &Arc<Shared>) -> FlushTask {
    let shared = shared.clone();
    Box::pin(async move {
        if let Err(e) = shared.flush().await {
            debug!(lesson_id = %shared.key.lesson_id, error = %e, "Flush did not complete.");
        }
    })
}

/// Starts a flush, or marks one to follow the flush already running.
fn request_flush(shared: &Arc<Shared>, flushing: &mut Option<FlushTask>, again: &mut bool) {
    if flushing.is_some() {
        *again = true;
    } else {
        *flushing = Some(start_flush(shared));
    }
}

async fn run_flush(flushing: &mut Option<FlushTask>) {
    match flushing {
        Some(task) => task.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Dropping an in-flight flush on cancellation abandons its push.
async fn run_driver(shared: Arc<Shared>, mut subscription: Option<ProgressStream>) {
    let mut tracking = interval(shared.options.tracking_interval());
    let mut sync = interval(shared.options.sync_interval());
    tracking.set_missed_tick_behavior(MissedTickBehavior::Delay);
    sync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Both intervals fire immediately on the first tick.
    tracking.tick().await;
    sync.tick().await;

    let mut flushing: Option<FlushTask> = None;
    let mut flush_again = false;

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tracking.tick() => shared.on_tracking_tick(Utc::now()).await,
            _ = sync.tick() => {
                if subscription.is_none() && shared.options.enable_real_time_sync {
                    subscription = shared.subscribe().await;
                }
                request_flush(&shared, &mut flushing, &mut flush_again);
            }
            _ = shared.flush_requested.notified() => {
                request_flush(&shared, &mut flushing, &mut flush_again);
            }
            _ = run_flush(&mut flushing) => {
                flushing = None;
                if std::mem::take(&mut flush_again) {
                    flushing = Some(start_flush(&shared));
                }
            }
            change = next_change(&mut subscription) => match change {
                Some(Ok(record)) => shared.on_remote(record).await,
                Some(Err(e)) => shared.on_subscription_error(e).await,
                None => {
                    debug!(lesson_id = %shared.key.lesson_id, "Subscription ended; will resubscribe.");
                    subscription = None;
                }
            },
        }
    }
    debug!(lesson_id = %shared.key.lesson_id, "Lesson driver stopped.");
}

//=========================================================================================
// LessonSession
//=========================================================================================

pub struct LessonSession {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LessonSession {
    /// Loads the lesson's record, subscribes to remote changes, and starts the
    /// driver task. A store that cannot be reached is not fatal: the session
    /// starts local-only and retries on the sync interval.
    pub async fn open(
        config: LessonConfig,
        store: Arc<dyn ProgressStore>,
        device: DeviceIdentity,
        local_store: Arc<dyn LocalStore>,
    ) -> Self {
        let now = Utc::now();
        let key = config.key.clone();
        let mut engine = SyncEngine::new(&key, device, config.options.conflict_resolution, now);

        let loaded = match store.get(&key.user_id, &key.lesson_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(lesson_id = %key.lesson_id, error = %e, "Could not load progress; starting local-only.");
                engine.set_error(e.to_string());
                None
            }
        };
        let has_loaded = loaded.is_some();
        if let Some(record) = loaded {
            engine.apply_remote(record, now);
        }

        let collector = MetricCollector::new(
            key.content_type,
            engine.record().time_spent,
            config.options.tracking_interval(),
            now,
        );
        let mut completion = CompletionTracker::new(config.criteria.clone());
        completion.seed(engine.record());
        let mut resume = ResumeTracker::new(
            &key.lesson_id,
            &config.title,
            config.resume.clone(),
            local_store,
            now,
        );
        if has_loaded {
            resume.observe(engine.record(), now);
        } else {
            resume.disarm();
        }

        let (progress_tx, _) = watch::channel(engine.record().clone());
        let (status_tx, _) = watch::channel(engine.status());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            key: key.clone(),
            options: config.options.clone(),
            store,
            state: Mutex::new(SessionState {
                engine,
                collector,
                completion,
                resume,
                closed: false,
            }),
            flush_lock: Mutex::new(()),
            flush_requested: Notify::new(),
            progress_tx,
            status_tx,
            events_tx,
            cancel: CancellationToken::new(),
        });

        let subscription = if config.options.enable_real_time_sync {
            shared.subscribe().await
        } else {
            None
        };
        let driver = tokio::spawn(run_driver(shared.clone(), subscription));
        info!(lesson_id = %key.lesson_id, content_type = %key.content_type, "Lesson session opened.");

        Self {
            shared,
            driver: Mutex::new(Some(driver)),
        }
    }

    pub fn key(&self) -> &LessonKey {
        &self.shared.key
    }

    //=====================================================================================
    // Progress and Sync
    //=====================================================================================

    /// Applies a partial update locally and schedules a push (or queues it
    /// while offline).
    pub async fn update_progress(&self, patch: ProgressPatch) {
        let now = Utc::now();
        let mut state = self.shared.state.lock().await;
        if state.closed {
            return;
        }
        let outcome = state.engine.update_progress(patch, now);
        let record = state.engine.record().clone();
        state.resume.observe(&record, now);
        self.shared.publish(&state);
        if outcome == UpdateOutcome::PushRequested {
            self.shared.flush_requested.notify_one();
        }
    }

    pub async fn track_interaction(&self, interaction: Interaction) {
        let mut state = self.shared.state.lock().await;
        state.collector.track(interaction, Utc::now());
    }

    /// Pushes everything pending now. A no-op while offline; returns the first
    /// push failure.
    pub async fn force_sync(&self) -> PortResult<()> {
        self.shared.flush().await
    }

    pub async fn resolve_conflict(&self, field: &str, choice: ConflictChoice) -> PortResult<()> {
        let mut state = self.shared.state.lock().await;
        let settled = state.engine.resolve_conflict(field, choice, Utc::now())?;
        self.shared.publish(&state);
        if settled {
            self.shared.flush_requested.notify_one();
        }
        Ok(())
    }

    pub async fn set_online(&self, online: bool) {
        let mut state = self.shared.state.lock().await;
        let flush = state.engine.set_online(online);
        self.shared.publish(&state);
        if flush {
            self.shared.flush_requested.notify_one();
        }
    }

    /// Runs one sampling tick immediately.
    pub async fn tick(&self) {
        self.shared.on_tracking_tick(Utc::now()).await;
    }

    pub fn progress_data(&self) -> watch::Receiver<ProgressRecord> {
        self.shared.progress_tx.subscribe()
    }

    pub fn sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub async fn snapshot(&self) -> ProgressRecord {
        self.shared.state.lock().await.engine.record().clone()
    }

    pub async fn status(&self) -> SyncStatus {
        self.shared.state.lock().await.engine.status()
    }

    pub async fn unresolved_conflicts(&self) -> Vec<SyncConflict> {
        self.shared
            .state
            .lock()
            .await
            .engine
            .unresolved_conflicts()
            .to_vec()
    }

    pub async fn connected_devices(&self) -> PortResult<Vec<DeviceInfo>> {
        self.shared.store.list_devices(&self.shared.key.user_id).await
    }

    //=====================================================================================
    // Resume
    //=====================================================================================

    pub async fn resume_point(&self) -> Option<ResumePoint> {
        self.shared.state.lock().await.resume.point().cloned()
    }

    pub async fn resume_context(&self) -> Option<ResumeContext> {
        self.shared.state.lock().await.resume.context().cloned()
    }

    pub async fn show_resume_prompt(&self) -> bool {
        self.shared.state.lock().await.resume.show_prompt()
    }

    pub async fn resume_recommendation(&self) -> ResumeAction {
        self.shared.state.lock().await.resume.recommendation(Utc::now())
    }

    pub async fn time_remaining(&self) -> String {
        self.shared.state.lock().await.resume.time_remaining()
    }

    pub async fn resume_history(&self) -> Vec<ResumePoint> {
        self.shared.state.lock().await.resume.history().to_vec()
    }

    /// Accepts the offered resume point.
    pub async fn handle_resume_action(&self) -> Option<ResumePoint> {
        let point = self.shared.state.lock().await.resume.accept()?;
        self.shared.emit(SessionEvent::ResumeSelected(point.clone()));
        Some(point)
    }

    /// Declines resuming and resets the lesson's universal progress.
    pub async fn handle_restart_action(&self) {
        let now = Utc::now();
        let mut state = self.shared.state.lock().await;
        state.resume.dismiss();
        let outcome = state.engine.update_progress(ProgressPatch::restart(), now);
        state.collector.rebase(0.0, now);
        let record = state.engine.record().clone();
        state.resume.observe(&record, now);
        self.shared.publish(&state);
        drop(state);
        if outcome == UpdateOutcome::PushRequested {
            self.shared.flush_requested.notify_one();
        }
        self.shared.emit(SessionEvent::ResumeDeclined);
    }

    pub async fn dismiss_resume_prompt(&self) {
        self.shared.state.lock().await.resume.dismiss();
        self.shared.emit(SessionEvent::ResumeDeclined);
    }

    //=====================================================================================
    // Metrics and Completion
    //=====================================================================================

    pub async fn metrics(&self) -> MetricAggregate {
        self.shared.state.lock().await.collector.aggregate().clone()
    }

    pub async fn milestones(&self) -> Vec<Milestone> {
        self.shared.state.lock().await.completion.milestones().to_vec()
    }

    pub async fn is_completed(&self) -> bool {
        self.shared.state.lock().await.completion.is_completed()
    }

    pub async fn completion_score(&self) -> f64 {
        self.shared.state.lock().await.completion.score()
    }

    pub async fn progress_summary(&self) -> ProgressSummary {
        let state = self.shared.state.lock().await;
        let metrics = state.collector.aggregate();
        ProgressSummary {
            completion_percentage: state.engine.record().completion_percentage,
            completion_score: state.completion.score(),
            is_completed: state.completion.is_completed(),
            milestones: state.completion.milestones().len(),
            engagement_score: metrics.engagement_score(),
            time_spent: metrics.total_time(),
            interaction_count: metrics.interaction_count(),
            focus_time: state.collector.active_seconds(),
        }
    }

    //=====================================================================================
    // Teardown
    //=====================================================================================

    /// Stops the driver and waits for it. Push results arriving afterwards are
    /// discarded.
    pub async fn close(&self) {
        self.shared.cancel.cancel();
        self.shared.state.lock().await.closed = true;
        if let Some(driver) = self.driver.lock().await.take() {
            if let Err(e) = driver.await {
                warn!(error = %e, "Lesson driver task ended abnormally.");
            }
        }
        info!(lesson_id = %self.shared.key.lesson_id, "Lesson session closed.");
    }
}

impl Drop for LessonSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
