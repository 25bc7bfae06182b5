//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::port_error_response;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use progress_sync_core::{DeviceInfo, ProgressRecord, SyncConflict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        get_progress_handler,
        put_progress_handler,
        list_devices_handler,
        remove_device_handler,
    ),
    components(
        schemas(ProgressResponse, SyncInfo, PutProgressRequest, PutProgressResponse, DevicesResponse, DeviceStats)
    ),
    tags(
        (name = "Progress Sync API", description = "Cross-device lesson progress, conflict history and device registry.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncInfo {
    pub last_sync_version: u64,
    pub last_sync_device: Option<String>,
    pub last_sync_time: Option<DateTime<Utc>>,
    #[schema(value_type = Vec<Object>)]
    pub conflict_history: Vec<SyncConflict>,
}

/// A lesson's stored progress plus the learner's devices.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    #[schema(value_type = Option<Object>)]
    pub progress: Option<ProgressRecord>,
    #[schema(value_type = Vec<Object>)]
    pub devices: Vec<DeviceInfo>,
    pub sync_info: SyncInfo,
}

#[derive(Deserialize, ToSchema)]
pub struct PutProgressRequest {
    #[schema(value_type = Object)]
    pub record: ProgressRecord,
}

#[derive(Serialize, ToSchema)]
pub struct PutProgressResponse {
    #[schema(value_type = Object)]
    pub record: ProgressRecord,
    /// True when the write was stale and the store merged it with newer data.
    pub merged: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub total_devices: usize,
    pub active_devices: usize,
    pub device_types: BTreeMap<String, usize>,
}

#[derive(Serialize, ToSchema)]
pub struct DevicesResponse {
    #[schema(value_type = Vec<Object>)]
    pub devices: Vec<DeviceInfo>,
    pub stats: DeviceStats,
}

impl DeviceStats {
    pub fn from_devices(devices: &[DeviceInfo]) -> Self {
        let mut device_types = BTreeMap::new();
        for device in devices {
            *device_types
                .entry(device.device_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        Self {
            total_devices: devices.len(),
            active_devices: devices.iter().filter(|d| d.is_active).count(),
            device_types,
        }
    }
}

//=========================================================================================
// Request Validation
//=========================================================================================

/// Reads the caller's id from the `x-user-id` header.
pub fn user_id_from(headers: &HeaderMap) -> Result<String, (StatusCode, String)> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "x-user-id header is required".to_string(),
            )
        })
}

/// Checks that a pushed record is well formed and belongs to `user_id`.
pub fn validate_record(record: &ProgressRecord, user_id: &str) -> Result<(), (StatusCode, String)> {
    if record.user_id != user_id {
        return Err((
            StatusCode::FORBIDDEN,
            "Only your own progress can be written".to_string(),
        ));
    }
    let bad_request = |message: String| Err((StatusCode::BAD_REQUEST, message));
    if record.lesson_id.trim().is_empty() {
        return bad_request("lessonId is required".to_string());
    }
    if !(0.0..=100.0).contains(&record.completion_percentage) {
        return bad_request(format!(
            "completionPercentage must be between 0 and 100, got {}",
            record.completion_percentage
        ));
    }
    if !(record.time_spent.is_finite() && record.time_spent >= 0.0) {
        return bad_request("timeSpent must be a non-negative number".to_string());
    }
    if !(record.last_position.is_finite() && record.last_position >= 0.0) {
        return bad_request("lastPosition must be a non-negative number".to_string());
    }
    if let Some(content) = &record.content {
        if content.content_type() != record.content_type {
            return bad_request(format!(
                "a {} progress block does not belong to a {} lesson",
                content.content_type(),
                record.content_type
            ));
        }
    }
    Ok(())
}

/// Accepted writes keep their version and first writes become version 1, so
/// any other outcome is a re-merge.
pub fn was_merged(incoming_version: u64, stored: &ProgressRecord) -> bool {
    stored.sync_version != incoming_version && stored.sync_version > 1
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Fetch the stored progress for one lesson.
#[utoipa::path(
    get,
    path = "/progress/{lesson_id}",
    responses(
        (status = 200, description = "Stored progress, or null when the lesson was never synced", body = ProgressResponse),
        (status = 400, description = "Missing x-user-id header"),
        (status = 503, description = "Progress store unavailable")
    ),
    params(
        ("lesson_id" = String, Path, description = "The lesson to look up."),
        ("x-user-id" = String, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn get_progress_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(lesson_id): Path<String>,
) -> Result<Json<ProgressResponse>, (StatusCode, String)> {
    let user_id = user_id_from(&headers)?;
    let store = &app_state.store;

    let Some(record) = store
        .get(&user_id, &lesson_id)
        .await
        .map_err(port_error_response)?
    else {
        return Ok(Json(ProgressResponse {
            progress: None,
            devices: Vec::new(),
            sync_info: SyncInfo {
                last_sync_version: 0,
                last_sync_device: None,
                last_sync_time: None,
                conflict_history: Vec::new(),
            },
        }));
    };

    let devices = store
        .list_devices(&user_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(ProgressResponse {
        sync_info: SyncInfo {
            last_sync_version: record.sync_version,
            last_sync_device: Some(record.device_id.clone()),
            last_sync_time: Some(record.last_updated),
            conflict_history: record.sync_conflicts.clone(),
        },
        progress: Some(record),
        devices,
    }))
}

/// Write a progress record. Stale writes are merged with the stored record.
#[utoipa::path(
    put,
    path = "/progress",
    request_body = PutProgressRequest,
    responses(
        (status = 200, description = "The record as stored", body = PutProgressResponse),
        (status = 400, description = "Malformed record or missing header"),
        (status = 403, description = "Record belongs to another learner"),
        (status = 503, description = "Progress store unavailable")
    ),
    params(
        ("x-user-id" = String, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn put_progress_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PutProgressRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = user_id_from(&headers)?;
    let record = request.record;
    if let Err(rejection) = validate_record(&record, &user_id) {
        warn!(user_id = %user_id, lesson_id = %record.lesson_id, reason = %rejection.1, "Rejected progress write.");
        return Err(rejection);
    }

    let incoming_version = record.sync_version;
    let stored = app_state.store.put(record).await.map_err(|e| {
        error!("Failed to store progress: {:?}", e);
        port_error_response(e)
    })?;
    let merged = was_merged(incoming_version, &stored);
    info!(lesson_id = %stored.lesson_id, sync_version = stored.sync_version, merged, "Progress stored.");
    Ok((StatusCode::OK, Json(PutProgressResponse { record: stored, merged })))
}

/// List the learner's devices, most recently seen first.
#[utoipa::path(
    get,
    path = "/devices",
    responses(
        (status = 200, description = "Devices and summary counts", body = DevicesResponse),
        (status = 400, description = "Missing x-user-id header")
    ),
    params(
        ("x-user-id" = String, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn list_devices_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DevicesResponse>, (StatusCode, String)> {
    let user_id = user_id_from(&headers)?;
    let devices = app_state
        .store
        .list_devices(&user_id)
        .await
        .map_err(port_error_response)?;
    let stats = DeviceStats::from_devices(&devices);
    Ok(Json(DevicesResponse { devices, stats }))
}

/// Forget one of the learner's devices.
#[utoipa::path(
    delete,
    path = "/devices/{device_id}",
    responses(
        (status = 204, description = "Device removed"),
        (status = 404, description = "Unknown device")
    ),
    params(
        ("device_id" = String, Path, description = "The device to remove."),
        ("x-user-id" = String, Header, description = "The unique ID of the learner.")
    )
)]
pub async fn remove_device_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(device_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    let user_id = user_id_from(&headers)?;
    app_state
        .store
        .remove_device(&user_id, &device_id)
        .await
        .map_err(port_error_response)?;
    info!(user_id = %user_id, device_id = %device_id, "Device removed.");
    Ok(StatusCode::NO_CONTENT)
}
