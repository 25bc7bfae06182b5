//! Router tests against the in-memory progress store.

use api_lib::web::{router, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use progress_sync_core::domain::{Bookmark, VideoProgress};
use progress_sync_core::store::InMemoryProgressStore;
use progress_sync_core::{
    ContentProgress, ContentType, DeviceIdentity, LessonKey, ProgressRecord, ProgressStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const DESKTOP: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/120.0 Safari/537.36";
const PHONE: &str = "Mozilla/5.0 (Linux; Android 14) Chrome/120.0 Mobile Safari/537.36";

fn app() -> (Router, Arc<InMemoryProgressStore>) {
    let store = Arc::new(InMemoryProgressStore::default());
    (router(Arc::new(AppState::new(store.clone()))), store)
}

fn video_record(device_id: &str, user_agent: &str, current_time: f64, bookmark: &str) -> ProgressRecord {
    let key = LessonKey {
        user_id: "learner-1".into(),
        lesson_id: "lesson-1".into(),
        course_id: "course-1".into(),
        content_type: ContentType::Video,
    };
    let device = DeviceIdentity::from_parts(device_id.into(), user_agent, Utc::now());
    let mut record = ProgressRecord::new(&key, &device.current_device(Utc::now()), Utc::now());
    record.completion_percentage = current_time / 6.0;
    record.last_position = current_time;
    record.content = Some(ContentProgress::Video(VideoProgress {
        current_time,
        duration: 600.0,
        bookmarks: vec![Bookmark {
            id: bookmark.into(),
            timestamp: current_time,
            title: bookmark.into(),
            note: None,
        }],
        ..Default::default()
    }));
    record
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn put(user_id: &str, record: &ProgressRecord) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri("/progress")
        .header("content-type", "application/json")
        .header("x-user-id", user_id)
        .body(Body::from(json!({ "record": record }).to_string()))
        .unwrap()
}

fn get(uri: &str, user_id: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user_id)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn unknown_lesson_returns_empty_sync_info() {
    let (app, _) = app();
    let (status, body) = send(&app, get("/progress/lesson-1", "learner-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress"], Value::Null);
    assert_eq!(body["syncInfo"]["lastSyncVersion"], 0);
    assert_eq!(body["syncInfo"]["lastSyncDevice"], Value::Null);
}

#[tokio::test]
async fn missing_user_header_is_rejected() {
    let (app, _) = app();
    let request = Request::builder()
        .uri("/progress/lesson-1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stale_writes_are_merged_and_reported() {
    let (app, store) = app();

    let (status, body) = send(&app, put("learner-1", &video_record("device_b", PHONE, 120.0, "b2"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["record"]["syncVersion"], 1);
    assert_eq!(body["merged"], false);

    // Written against version 0 without having seen device_b's write.
    let (status, body) = send(&app, put("learner-1", &video_record("device_a", DESKTOP, 300.0, "b1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["merged"], true);
    assert_eq!(body["record"]["syncVersion"], 2);

    let stored = store.get("learner-1", "lesson-1").await.unwrap().unwrap();
    let video = stored.video().unwrap();
    assert_eq!(video.current_time, 300.0);
    let mut ids: Vec<&str> = video.bookmarks.iter().map(|b| b.id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, ["b1", "b2"]);

    let (status, body) = send(&app, get("/progress/lesson-1", "learner-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["syncInfo"]["lastSyncVersion"], 2);
    assert_eq!(body["devices"].as_array().unwrap().len(), 2);
    let history = body["syncInfo"]["conflictHistory"].as_array().unwrap();
    assert!(history.iter().any(|c| c["field"] == "syncVersion"));
}

#[tokio::test]
async fn writes_for_another_learner_are_forbidden() {
    let (app, store) = app();
    let record = video_record("device_a", DESKTOP, 60.0, "b1");
    let (status, _) = send(&app, put("learner-2", &record)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn malformed_records_are_rejected() {
    let (app, store) = app();
    let mut record = video_record("device_a", DESKTOP, 60.0, "b1");
    record.completion_percentage = 140.0;
    let (status, _) = send(&app, put("learner-1", &record)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut record = video_record("device_a", DESKTOP, 60.0, "b1");
    record.content_type = ContentType::Pdf;
    let (status, _) = send(&app, put("learner-1", &record)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn devices_are_listed_with_stats_and_removable() {
    let (app, _) = app();
    send(&app, put("learner-1", &video_record("device_a", DESKTOP, 60.0, "b1"))).await;
    let mut second = video_record("device_b", PHONE, 90.0, "b2");
    second.sync_version = 2;
    send(&app, put("learner-1", &second)).await;

    let (status, body) = send(&app, get("/devices", "learner-1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["devices"][0]["id"], "device_b");
    assert_eq!(body["stats"]["totalDevices"], 2);
    assert_eq!(body["stats"]["activeDevices"], 2);
    assert_eq!(body["stats"]["deviceTypes"]["desktop"], 1);
    assert_eq!(body["stats"]["deviceTypes"]["mobile"], 1);

    let delete = |device: &str| {
        Request::builder()
            .method("DELETE")
            .uri(format!("/devices/{}", device))
            .header("x-user-id", "learner-1")
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = send(&app, delete("device_a")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, delete("device_a")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, get("/devices", "learner-1")).await;
    assert_eq!(body["stats"]["totalDevices"], 1);
}

#[tokio::test]
async fn unavailable_store_maps_to_service_unavailable() {
    let (app, store) = app();
    store.set_available(false);
    let (status, _) = send(&app, get("/progress/lesson-1", "learner-1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
