//! OpenAPI specification generation for the rollcall API.
//!
//! The generated document is served at `/api/openapi.json` and written to the
//! workspace root by the `gen-openapi` binary for client generation.

use axum::Json;
use rollcall_core::{
    AbortReason, AttendanceReport, AttendanceStatus, AttendanceVerdict, ExportStatus,
    ParticipantRecord, SessionOutcome, SessionStatus,
};
use utoipa::OpenApi;

use super::devices::{DiscoveredDevice, ScanDevicesResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::participants::{ParticipantsResponse, RegisterRequest, RegisterResponse};
use super::session::{
    LastSessionResponse, ParticipantProgress, SessionStatusResponse, StartSessionRequest,
    StartSessionResponse, StopSessionResponse,
};

/// Serve the OpenAPI specification as JSON.
///
/// This endpoint is available at `/api/openapi.json` and returns the complete
/// OpenAPI 3.0 specification for the rollcall API.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as a pretty-printed JSON string.
/// Used by the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for rollcall.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "rollcall API",
        version = "0.1.0",
        description = r#"
# rollcall API

rollcall takes attendance by repeatedly scanning for the devices participants carry.

## Overview

1. **Register** each participant with the device they carry (`POST /api/participants`).
   `GET /api/devices` lists what is in range to help pick the right device.
2. **Start** a session (`POST /api/session/start`). The registry is snapshotted; the
   session scans, waits, and scans again until stopped.
3. **Stop** the session (`POST /api/session/stop`). The call returns at once.
4. **Read** the verdicts (`GET /api/session/last`). A participant is present when
   detected in at least `round(scans x threshold)` scans.

Each finished session is also exported as `attendance_YYYY-MM-DD.csv`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local rollcall server")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "participants",
            description = "Participant registration"
        ),
        (
            name = "devices",
            description = "Device scanning for registration"
        ),
        (
            name = "session",
            description = "Attendance sessions: start, stop, live progress, and verdicts"
        )
    ),
    paths(
        // Health endpoints
        super::health::health_check,
        // Participant endpoints
        super::participants::list_participants,
        super::participants::register_participant,
        // Device endpoints
        super::devices::scan_devices,
        // Session endpoints
        super::session::start_session,
        super::session::stop_session,
        super::session::get_session,
        super::session::get_last_session,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            SessionStatus,
            // Participant types
            ParticipantRecord,
            ParticipantsResponse,
            RegisterRequest,
            RegisterResponse,
            // Device types
            DiscoveredDevice,
            ScanDevicesResponse,
            // Session types
            StartSessionRequest,
            StartSessionResponse,
            StopSessionResponse,
            ParticipantProgress,
            SessionStatusResponse,
            LastSessionResponse,
            SessionOutcome,
            AttendanceReport,
            AttendanceVerdict,
            AttendanceStatus,
            ExportStatus,
            AbortReason,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "rollcall API");
        assert!(!spec.paths.paths.is_empty());
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"rollcall API\""));
        assert!(json.contains("/session/start"));
    }
}
