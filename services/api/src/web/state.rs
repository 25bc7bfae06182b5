//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use progress_sync_core::ProgressStore;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProgressStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }
}
