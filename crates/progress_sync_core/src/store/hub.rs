//! crates/progress_sync_core/src/store/hub.rs
//!
//! Per-lesson fan-out of accepted writes. Every subscriber of a (user, lesson)
//! pair gets an independent broadcast receiver wrapped as a `ProgressStream`.

use futures::stream;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::domain::ProgressRecord;
use crate::ports::{PortError, ProgressStream};

/// Writes buffered per subscriber before a slow one starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

type ChannelKey = (String, String);

pub struct ChangeHub {
    channels: Mutex<HashMap<ChannelKey, broadcast::Sender<ProgressRecord>>>,
    capacity: usize,
}

impl Default for ChangeHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Sends a write to every current subscriber of its lesson. Returns how many
    /// subscribers received it.
    pub fn publish(&self, record: &ProgressRecord) -> usize {
        let key = (record.user_id.clone(), record.lesson_id.clone());
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = channels.get(&key) else {
            return 0;
        };
        match sender.send(record.clone()) {
            Ok(count) => count,
            Err(_) => {
                // Every receiver is gone.
                channels.remove(&key);
                0
            }
        }
    }

    pub fn subscribe(&self, user_id: &str, lesson_id: &str) -> ProgressStream {
        let receiver = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            channels
                .entry((user_id.to_string(), lesson_id.to_string()))
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };
        debug!(user_id, lesson_id, "Subscribed to progress changes.");

        Box::pin(stream::unfold(receiver, |mut receiver| async move {
            let item = match receiver.recv().await {
                Ok(record) => Ok(record),
                Err(RecvError::Lagged(skipped)) => Err(PortError::Unavailable(format!(
                    "subscriber fell behind by {} updates",
                    skipped
                ))),
                Err(RecvError::Closed) => return None,
            };
            Some((item, receiver))
        }))
    }

    pub fn subscriber_count(&self, user_id: &str, lesson_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(&(user_id.to_string(), lesson_id.to_string()))
            .map_or(0, |sender| sender.receiver_count())
    }
}
