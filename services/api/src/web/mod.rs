pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    routing::{delete, get, put},
    Router,
};
use std::sync::Arc;

pub use rest::{get_progress_handler, list_devices_handler, put_progress_handler, remove_device_handler};
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Builds the API routes over a shared state. Layers such as CORS and the
/// Swagger UI are added by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/progress", put(put_progress_handler))
        .route("/progress/{lesson_id}", get(get_progress_handler))
        .route("/devices", get(list_devices_handler))
        .route("/devices/{device_id}", delete(remove_device_handler))
        .route("/ws/progress/{lesson_id}", get(ws_handler))
        .with_state(app_state)
}
