pub mod completion;
pub mod config;
pub mod device;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod resume;
pub mod session;
pub mod store;
pub mod sync;

pub use completion::{CompletionCriteria, CompletionOutcome, CompletionTracker, Milestone};
pub use config::{ResumePreferences, SyncOptions};
pub use device::DeviceIdentity;
pub use domain::{
    ContentProgress, ContentType, DeviceInfo, DeviceType, LessonKey, ProgressPatch, ProgressRecord,
    SyncConflict,
};
pub use metrics::{Interaction, MetricAggregate, MetricCollector};
pub use ports::{LocalStore, PortError, PortResult, ProgressStore, ProgressStream};
pub use resume::{ResumeAction, ResumeContext, ResumePoint};
pub use session::{LessonConfig, LessonSession, ProgressSummary, SessionEvent};
pub use sync::{reconcile_write, ConflictChoice, ConflictPolicy, SyncState, SyncStatus};
