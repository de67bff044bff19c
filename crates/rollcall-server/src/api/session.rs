//! Attendance session API endpoints.
//!
//! A session is started with the registry as it is at that moment, runs on
//! its own until stopped, and then produces one verdict per participant.
//! Stopping returns immediately; the verdicts appear under `/session/last`
//! once finalization is done.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use rollcall_core::{RollcallError, SessionOutcome, SessionStatus, StartOutcome, StopOutcome};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::{track_session, SharedState};

/// Longest accepted session label, in characters.
pub const MAX_LABEL_LENGTH: usize = 200;

/// Creates the session router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_session))
        .route("/start", post(start_session))
        .route("/stop", post(stop_session))
        .route("/last", get(get_last_session))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Optional body for starting a session.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[schema(example = json!({
    "label": "Semester 5 / Batch B / Period 2"
}))]
pub struct StartSessionRequest {
    /// Free-form context stored with the session (class, batch, period...).
    #[schema(example = "Semester 5 / Batch B / Period 2", max_length = 200)]
    #[serde(default)]
    pub label: Option<String>,
}

/// Response after starting a session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "session_id": "01947a3c-5d2e-7f00-8000-000000000000",
    "label": "Semester 5 / Batch B / Period 2",
    "participants": 30,
    "warning": null
}))]
pub struct StartSessionResponse {
    /// Identifier of the new session.
    pub session_id: Uuid,

    /// Label stored with the session.
    pub label: Option<String>,

    /// Participants tracked by the session.
    #[schema(example = 30)]
    pub participants: usize,

    /// Set when the session cannot produce verdicts (empty registry).
    #[schema(nullable)]
    pub warning: Option<String>,
}

/// Response after a stop request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "stopped": "requested" }))]
pub struct StopSessionResponse {
    /// `requested` or `already_stopping`.
    #[schema(example = "requested")]
    pub stopped: String,
}

/// Progress of one participant in the running session.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Asha Rao",
    "device_id": "AA:BB:CC:DD:EE:01",
    "detections": 3,
    "seen_last_scan": true
}))]
pub struct ParticipantProgress {
    /// Participant name.
    #[schema(example = "Asha Rao")]
    pub name: String,

    /// Registered device.
    #[schema(example = "AA:BB:CC:DD:EE:01")]
    pub device_id: String,

    /// Scans the device was detected in so far.
    #[schema(example = 3)]
    pub detections: u32,

    /// Whether the device was detected in the latest scan.
    #[schema(example = true)]
    pub seen_last_scan: bool,
}

/// Current session state.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "running",
    "session_id": "01947a3c-5d2e-7f00-8000-000000000000",
    "label": "Semester 5 / Batch B / Period 2",
    "started_at_utc": "2025-01-15T03:30:00Z",
    "scan_number": 3,
    "threshold": 0.8,
    "participants": []
}))]
pub struct SessionStatusResponse {
    /// Engine lifecycle state.
    pub status: SessionStatus,

    /// Session identifier, when one is active.
    pub session_id: Option<Uuid>,

    /// Session label.
    pub label: Option<String>,

    /// When the session was started.
    pub started_at_utc: Option<String>,

    /// Scans completed so far.
    #[schema(example = 3)]
    pub scan_number: u32,

    /// Configured detection-rate threshold.
    #[schema(example = 0.8)]
    pub threshold: f64,

    /// Per-participant detections so far.
    pub participants: Vec<ParticipantProgress>,
}

/// The most recently finished session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LastSessionResponse {
    /// Session label.
    pub label: Option<String>,

    /// Verdicts and export result, or the abort reason.
    pub outcome: SessionOutcome,
}

// ============================================================================
// Handlers
// ============================================================================

/// Start an attendance session.
///
/// The body is optional; a request without one starts an unlabelled session.
/// A body sent as anything other than `application/json` is rejected with 415.
#[utoipa::path(
    post,
    path = "/session/start",
    tag = "session",
    operation_id = "startSession",
    summary = "Start an attendance session",
    description = "Snapshots the registry and starts scanning. The session runs \
        until stopped. With an empty registry the session ends immediately \
        without verdicts and the response carries a warning.",
    request_body(content = StartSessionRequest, description = "Optional session label"),
    responses(
        (status = 202, description = "Session started", body = StartSessionResponse),
        (status = 400, description = "Malformed JSON or label too long"),
        (status = 409, description = "A session is running or the radio is busy", body = ErrorResponse),
        (status = 415, description = "Body is not JSON"),
        (status = 422, description = "Body does not match the request schema")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    request: Option<Json<StartSessionRequest>>,
) -> ApiResult<(StatusCode, Json<StartSessionResponse>)> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let label = session_label(request.label)?;

    let mut state_guard = state.write().await;
    if state_guard.engine.status().is_active() {
        return Err(RollcallError::SessionAlreadyRunning.into());
    }
    let radio = Arc::clone(&state_guard.radio)
        .try_lock_owned()
        .map_err(|_| ApiError::radio_busy())?;

    let snapshot = state_guard.registration.snapshot();
    let participants = state_guard.registration.registry().participants();

    let handle = match state_guard
        .engine
        .start(snapshot, Arc::clone(&state_guard.discovery))
    {
        StartOutcome::Started(handle) => handle,
        StartOutcome::AlreadyRunning => return Err(RollcallError::SessionAlreadyRunning.into()),
    };

    let session_id = handle.id();
    let warning = participants
        .is_empty()
        .then(|| RollcallError::EmptyRegistry.to_string());
    info!(%session_id, label = ?label, participants = participants.len(), "Session started via API");

    let count = participants.len();
    state_guard
        .session
        .begin(session_id, label.clone(), participants);
    track_session(&state, handle, radio);

    Ok((
        StatusCode::ACCEPTED,
        Json(StartSessionResponse {
            session_id,
            label,
            participants: count,
            warning,
        }),
    ))
}

/// Stop the running session.
#[utoipa::path(
    post,
    path = "/session/stop",
    tag = "session",
    operation_id = "stopSession",
    summary = "Stop the running session",
    description = "Signals the running session to stop and returns at once. A \
        scan in progress is abandoned. Verdicts are available from \
        `/api/session/last` after finalization.",
    responses(
        (status = 202, description = "Stop signalled", body = StopSessionResponse),
        (status = 409, description = "No session is running", body = ErrorResponse)
    )
)]
pub async fn stop_session(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<StopSessionResponse>)> {
    let outcome = state.read().await.engine.stop();

    let stopped = match outcome {
        StopOutcome::Requested => "requested",
        StopOutcome::AlreadyStopping => "already_stopping",
        StopOutcome::NotRunning => return Err(RollcallError::SessionNotRunning.into()),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(StopSessionResponse {
            stopped: stopped.to_string(),
        }),
    ))
}

/// Get the current session state.
#[utoipa::path(
    get,
    path = "/session",
    tag = "session",
    operation_id = "getSession",
    summary = "Get current session state",
    description = "Returns the engine state and, while a session is active, the \
        scans completed so far and per-participant detection counts.",
    responses(
        (status = 200, description = "Session state", body = SessionStatusResponse)
    )
)]
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionStatusResponse> {
    let state_guard = state.read().await;
    let status = state_guard.engine.status();
    let threshold = state_guard.config.session.threshold;

    let Some(active) = state_guard.session.active.as_ref() else {
        return Json(SessionStatusResponse {
            status,
            session_id: None,
            label: None,
            started_at_utc: None,
            scan_number: 0,
            threshold,
            participants: Vec::new(),
        });
    };

    let participants = active
        .participants
        .iter()
        .map(|record| ParticipantProgress {
            name: record.name.clone(),
            device_id: record.device_id.to_string(),
            detections: active.detections(&record.device_id),
            seen_last_scan: active.seen_last_scan(&record.device_id),
        })
        .collect();

    Json(SessionStatusResponse {
        status,
        session_id: Some(active.id),
        label: active.label.clone(),
        started_at_utc: Some(active.started_at_utc.to_rfc3339()),
        scan_number: active.progress.as_ref().map_or(0, |p| p.scan_number),
        threshold,
        participants,
    })
}

/// Get the most recently finished session.
#[utoipa::path(
    get,
    path = "/session/last",
    tag = "session",
    operation_id = "getLastSession",
    summary = "Get the last finished session",
    description = "Returns the verdicts of the most recently finished session, \
        or its abort reason.",
    responses(
        (status = 200, description = "Last session outcome", body = LastSessionResponse),
        (status = 404, description = "No session has finished yet", body = ErrorResponse)
    )
)]
pub async fn get_last_session(
    State(state): State<SharedState>,
) -> ApiResult<Json<LastSessionResponse>> {
    let state_guard = state.read().await;
    let last = state_guard
        .session
        .last
        .as_ref()
        .ok_or_else(|| ApiError::NotFound {
            error_code: "no_finished_session".to_string(),
            message: "No attendance session has finished yet".to_string(),
        })?;

    Ok(Json(LastSessionResponse {
        label: last.label.clone(),
        outcome: last.outcome.clone(),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Trimmed label, `None` when blank.
fn session_label(label: Option<String>) -> ApiResult<Option<String>> {
    let label = label
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty());

    if label
        .as_ref()
        .is_some_and(|label| label.chars().count() > MAX_LABEL_LENGTH)
    {
        return Err(ApiError::BadRequest {
            error_code: "label_too_long".to_string(),
            message: format!("Session label cannot exceed {MAX_LABEL_LENGTH} characters"),
        });
    }

    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_label_is_dropped() {
        assert_eq!(session_label(None).unwrap(), None);
        assert_eq!(session_label(Some("   ".into())).unwrap(), None);
    }

    #[test]
    fn test_label_is_trimmed() {
        let label = session_label(Some("  Period 2 ".into())).unwrap();
        assert_eq!(label.as_deref(), Some("Period 2"));
    }

    #[test]
    fn test_missing_label_field_defaults() {
        let request: StartSessionRequest = serde_json::from_str("{}").unwrap();
        assert!(request.label.is_none());
    }

    #[test]
    fn test_overlong_label_is_rejected() {
        assert!(matches!(
            session_label(Some("x".repeat(MAX_LABEL_LENGTH + 1))),
            Err(ApiError::BadRequest { ref error_code, .. }) if error_code == "label_too_long"
        ));
        assert!(session_label(Some("x".repeat(MAX_LABEL_LENGTH))).is_ok());
    }
}
