use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use coach_core::clock::ManualClock;
use coach_core::config::EngineConfig;
use coach_core::model::{DialogOption, DialogOptionType, DialogStatus, Intervention, Participant};
use coach_core::store::Store;
use coach_core::transport::RecordingTransport;
use coach_core::Engine;
use coach_server::state::AppState;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const PHONE: &str = "+41790000001";

/// An engine over a fresh store with one participant reachable by SMS.
fn setup(dir: &TempDir) -> (AppState, Participant) {
    let store = Store::open(&dir.path().join("engine.redb")).unwrap();
    let intervention = Intervention {
        id: Uuid::new_v4(),
        name: "Move more".into(),
        active: true,
        monitoring_active: true,
        monitoring_starting_days: Vec::new(),
        sender_identification: None,
        created_at: Utc::now(),
    };
    let participant = Participant {
        id: Uuid::new_v4(),
        intervention_id: intervention.id,
        nickname: "Ada".into(),
        language: "en".into(),
        group: None,
        monitoring_active: true,
        created_at: Utc::now(),
    };
    let mut status = DialogStatus::new(participant.id);
    status.contact_data_available = true;
    status.screening_survey_performed = true;
    store.save(&intervention).unwrap();
    store.save(&participant).unwrap();
    store.save(&status).unwrap();
    store
        .save(&DialogOption {
            id: Uuid::new_v4(),
            participant_id: participant.id,
            kind: DialogOptionType::Sms,
            data: PHONE.into(),
        })
        .unwrap();

    let engine = Engine::new(
        store,
        EngineConfig::default(),
        Arc::new(ManualClock::new(Utc::now())),
        Arc::new(RecordingTransport::new()),
    );
    (AppState::new(Arc::new(engine)), participant)
}

async fn request(
    state: &AppState,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let app = coach_server::build_router(state.clone());
    let builder = axum::http::Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    };
    let response = app.oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

// ---------------------------------------------------------------------------
// Health and statistics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_empty_inbox() {
    let dir = TempDir::new().unwrap();
    let (state, _) = setup(&dir);
    let (status, json) = request(&state, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["inbox"], 0);
}

#[tokio::test]
async fn statistics_list_active_interventions() {
    let dir = TempDir::new().unwrap();
    let (state, _) = setup(&dir);
    let (status, json) = request(&state, "GET", "/api/statistics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["name"], "Move more");
    assert_eq!(json[0]["participants"], 1);
}

// ---------------------------------------------------------------------------
// Inbound webhook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inbound_message_is_queued_then_recorded() {
    let dir = TempDir::new().unwrap();
    let (state, participant) = setup(&dir);

    let (status, json) = request(
        &state,
        "POST",
        "/api/inbound/sms",
        Some(serde_json::json!({ "sender": PHONE, "body": "hello there", "client_id": "gw-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["queued"], 1);

    assert_eq!(state.engine.run_inbound_pass(), 1);

    let uri = format!("/api/participants/{}/messages", participant.id);
    let (status, json) = request(&state, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = json.as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["status"], "RECEIVED_UNEXPECTEDLY");
}

#[tokio::test]
async fn inbound_on_unknown_channel_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (state, _) = setup(&dir);
    let (status, json) = request(
        &state,
        "POST",
        "/api/inbound/pigeon",
        Some(serde_json::json!({ "sender": PHONE, "body": "hi" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("pigeon"));
    assert_eq!(state.engine.inbox_len(), 0);
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_of_participant() {
    let dir = TempDir::new().unwrap();
    let (state, participant) = setup(&dir);
    let uri = format!("/api/participants/{}/status", participant.id);
    let (status, json) = request(&state, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["participant_id"], participant.id.to_string());
    assert_eq!(json["contact_data_available"], true);
}

#[tokio::test]
async fn unknown_participant_is_404() {
    let dir = TempDir::new().unwrap();
    let (state, _) = setup(&dir);
    let uri = format!("/api/participants/{}/messages", Uuid::new_v4());
    let (status, json) = request(&state, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn manual_message_is_rendered_and_queued() {
    let dir = TempDir::new().unwrap();
    let (state, participant) = setup(&dir);
    let uri = format!("/api/participants/{}/messages", participant.id);
    let (status, json) = request(
        &state,
        "POST",
        &uri,
        Some(serde_json::json!({ "text": "Hello $participantName", "reply_window_minutes": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["text"], "Hello Ada");
    assert_eq!(json["status"], "PREPARED_FOR_SENDING");

    let report = state.engine.run_dispatch_pass().unwrap();
    assert_eq!(report.sent, 1);
}

#[tokio::test]
async fn supervisor_message_without_contact_is_422() {
    let dir = TempDir::new().unwrap();
    let (state, participant) = setup(&dir);
    let uri = format!("/api/participants/{}/messages", participant.id);
    let (status, _) = request(
        &state,
        "POST",
        &uri,
        Some(serde_json::json!({ "text": "Please call Ada", "supervisor": true })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn reserved_variable_cannot_be_set() {
    let dir = TempDir::new().unwrap();
    let (state, participant) = setup(&dir);
    let uri = format!("/api/participants/{}/variables", participant.id);

    let (status, _) = request(
        &state,
        "PUT",
        &uri,
        Some(serde_json::json!({ "name": "$mood", "value": "7" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = request(
        &state,
        "PUT",
        &uri,
        Some(serde_json::json!({ "name": "$participantName", "value": "Bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("write protected"));
}

#[tokio::test]
async fn switching_monitoring_toggles_flag() {
    let dir = TempDir::new().unwrap();
    let (state, participant) = setup(&dir);
    let (status, json) = request(
        &state,
        "POST",
        "/api/participants/monitoring",
        Some(serde_json::json!({ "participants": [participant.id] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["monitoring_active"], false);
}

// ---------------------------------------------------------------------------
// Problem solving
// ---------------------------------------------------------------------------

#[tokio::test]
async fn solving_a_pending_message_conflicts() {
    let dir = TempDir::new().unwrap();
    let (state, participant) = setup(&dir);
    let message = state
        .engine
        .send_manual_message(participant.id, "Hi", false, None)
        .unwrap();

    let uri = format!("/api/messages/{}/solve", message.id);
    let (status, _) = request(
        &state,
        "POST",
        &uri,
        Some(serde_json::json!({ "corrected": "5" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
