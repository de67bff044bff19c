//! Device scanning API endpoint.
//!
//! A registration scan runs one discovery pass and lists everything in range,
//! marking devices that already belong to a participant. Used to pick the
//! device to register.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use rollcall_core::{discover_bounded, DeviceDiscovery, RollcallError};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// A device seen during a registration scan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "address": "AA:BB:CC:DD:EE:01",
    "name": "Pixel 8",
    "registered_to": "Asha Rao"
}))]
pub struct DiscoveredDevice {
    /// Normalized device identifier.
    #[schema(example = "AA:BB:CC:DD:EE:01")]
    pub address: String,

    /// Broadcast name, if any.
    #[schema(example = "Pixel 8")]
    pub name: Option<String>,

    /// Participant owning the device, if registered.
    #[schema(example = "Asha Rao")]
    pub registered_to: Option<String>,
}

/// Device scan response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "devices": [
        {
            "address": "AA:BB:CC:DD:EE:01",
            "name": "Pixel 8",
            "registered_to": "Asha Rao"
        },
        {
            "address": "AA:BB:CC:DD:EE:02",
            "name": null,
            "registered_to": null
        }
    ],
    "scan_duration_secs": 5,
    "scanned_at_utc": "2025-01-15T03:30:00Z"
}))]
pub struct ScanDevicesResponse {
    /// Devices in range, in identifier order.
    pub devices: Vec<DiscoveredDevice>,

    /// Scan duration requested from the provider.
    #[schema(example = 5)]
    pub scan_duration_secs: u64,

    /// When the scan completed.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub scanned_at_utc: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Scan for nearby devices.
///
/// Refused while an attendance session or another scan holds the radio.
#[utoipa::path(
    get,
    path = "/devices",
    tag = "devices",
    operation_id = "scanDevices",
    summary = "Scan for nearby devices",
    description = "Runs one discovery scan and returns every device in range. \
        Devices that are already registered carry the participant's name in \
        `registered_to`.",
    responses(
        (status = 200, description = "Scan completed", body = ScanDevicesResponse),
        (status = 409, description = "A session or another scan is using the radio", body = ErrorResponse),
        (status = 503, description = "Discovery unavailable", body = ErrorResponse)
    )
)]
pub async fn scan_devices(State(state): State<SharedState>) -> ApiResult<Json<ScanDevicesResponse>> {
    let (_radio, discovery, snapshot, duration) = {
        let state_guard = state.read().await;
        if state_guard.engine.status().is_active() {
            return Err(RollcallError::SessionAlreadyRunning.into());
        }
        // Taken under the state lock: a session start holds it for writing
        let radio = Arc::clone(&state_guard.radio)
            .try_lock_owned()
            .map_err(|_| ApiError::radio_busy())?;
        (
            radio,
            Arc::clone(&state_guard.discovery),
            state_guard.registration.snapshot(),
            state_guard.config.session.scan_duration(),
        )
    };

    info!(provider = discovery.name(), "Scanning for nearby devices");
    let detected = discover_bounded(discovery.as_ref(), duration).await?;

    let devices: Vec<DiscoveredDevice> = detected
        .iter()
        .map(|(device_id, name)| DiscoveredDevice {
            address: device_id.to_string(),
            name: name.map(str::to_string),
            registered_to: snapshot.get(device_id).map(|record| record.name.clone()),
        })
        .collect();

    Ok(Json(ScanDevicesResponse {
        devices,
        scan_duration_secs: duration.as_secs(),
        scanned_at_utc: Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_response_serialization() {
        let response = ScanDevicesResponse {
            devices: vec![DiscoveredDevice {
                address: "AA:BB:CC:DD:EE:01".to_string(),
                name: Some("Pixel 8".to_string()),
                registered_to: None,
            }],
            scan_duration_secs: 5,
            scanned_at_utc: "2025-01-15T03:30:00Z".to_string(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"registered_to\":null"));
        assert!(json.contains("devices"));
    }
}
