//! crates/progress_sync_core/src/ports.rs
//!
//! Defines the service contracts (traits) the sync core depends on.
//! These traits form the boundary of the hexagonal architecture: the Progress
//! Store and the device-local key/value storage are supplied by adapters.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{DeviceInfo, ProgressRecord};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Every accepted write to one lesson's record, including the subscriber's own.
/// Dropping the stream unsubscribes.
pub type ProgressStream = Pin<Box<dyn Stream<Item = PortResult<ProgressRecord>> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, user_id: &str, lesson_id: &str) -> PortResult<Option<ProgressRecord>>;

    /// Upserts a record. A write whose `sync_version` is not exactly one past the
    /// stored version is re-merged with the stored record. Returns what was stored.
    async fn put(&self, record: ProgressRecord) -> PortResult<ProgressRecord>;

    async fn subscribe(&self, user_id: &str, lesson_id: &str) -> PortResult<ProgressStream>;

    // --- Device Registry ---
    /// Devices that have written for this user, most recently seen first.
    async fn list_devices(&self, user_id: &str) -> PortResult<Vec<DeviceInfo>>;

    async fn remove_device(&self, user_id: &str, device_id: &str) -> PortResult<()>;
}

/// Device-local persistent key/value storage (the device id, resume history).
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> PortResult<()>;
}
