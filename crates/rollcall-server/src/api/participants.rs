//! Participant registration API endpoints.
//!
//! Participants are registered once with the device they carry. The registry
//! file is rewritten after each registration; when that write fails the
//! participant is still registered for this process and the response says
//! so.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use rollcall_core::ParticipantRecord;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiResult, ErrorResponse};
use crate::state::SharedState;

/// Creates the participants router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(list_participants).post(register_participant))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Registered participants.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "participants": [
        { "name": "Asha Rao", "beacon_id": "AA:BB:CC:DD:EE:01" }
    ],
    "count": 1
}))]
pub struct ParticipantsResponse {
    /// Participants ordered by name.
    pub participants: Vec<ParticipantRecord>,

    /// Number of participants.
    #[schema(example = 1)]
    pub count: usize,
}

/// Request body for registering a participant.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "device_id": "aa:bb:cc:dd:ee:01",
    "name": "Asha Rao"
}))]
pub struct RegisterRequest {
    /// Device identifier. MAC addresses are normalized to upper-case.
    #[schema(example = "aa:bb:cc:dd:ee:01")]
    pub device_id: String,

    /// Participant display name.
    #[schema(example = "Asha Rao", min_length = 1, max_length = 100)]
    pub name: String,
}

/// Response after registering a participant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "participant": { "name": "Asha Rao", "beacon_id": "AA:BB:CC:DD:EE:01" },
    "persisted": true,
    "warning": null
}))]
pub struct RegisterResponse {
    /// The registered participant.
    pub participant: ParticipantRecord,

    /// Whether the registry file was updated.
    #[schema(example = true)]
    pub persisted: bool,

    /// Why the registry file was not updated.
    #[schema(nullable)]
    pub warning: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List registered participants.
#[utoipa::path(
    get,
    path = "/participants",
    tag = "participants",
    operation_id = "listParticipants",
    summary = "List registered participants",
    description = "Returns every registered participant ordered by name.",
    responses(
        (status = 200, description = "Registered participants", body = ParticipantsResponse)
    )
)]
pub async fn list_participants(State(state): State<SharedState>) -> Json<ParticipantsResponse> {
    let participants = state.read().await.registration.registry().participants();

    Json(ParticipantsResponse {
        count: participants.len(),
        participants,
    })
}

/// Register a participant's device.
#[utoipa::path(
    post,
    path = "/participants",
    tag = "participants",
    operation_id = "registerParticipant",
    summary = "Register a participant",
    description = "Registers a device under a participant name. Each device can \
        belong to one participant only. Registrations made while a session is \
        running take effect from the next session.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Participant registered", body = RegisterResponse),
        (status = 400, description = "Empty name or malformed device id", body = ErrorResponse),
        (status = 409, description = "Device already registered", body = ErrorResponse)
    )
)]
pub async fn register_participant(
    State(state): State<SharedState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let mut state_guard = state.write().await;

    let outcome = state_guard
        .registration
        .register(&request.device_id, &request.name)?;
    let snapshot = state_guard.registration.snapshot();
    state_guard.discovery.set_roster(&snapshot);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            participant: outcome.record,
            persisted: outcome.persisted,
            warning: outcome.warning,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_deserialization() {
        let request: RegisterRequest =
            serde_json::from_str(r#"{"device_id":"aa:bb:cc:dd:ee:01","name":"Asha"}"#).unwrap();
        assert_eq!(request.device_id, "aa:bb:cc:dd:ee:01");
        assert_eq!(request.name, "Asha");
    }
}
