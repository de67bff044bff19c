//! Shared types and OpenAPI schemas.
//!
//! These types cross the boundary between the attendance engine and its
//! callers (the HTTP server, the reporter), so they carry serde and
//! `ToSchema` derives.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::registry::DeviceId;

/// Presence verdict for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum AttendanceStatus {
    /// Detected in at least the required number of scans.
    Present,
    /// Detected in fewer scans than required.
    Absent,
}

impl AttendanceStatus {
    /// Human-readable label used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finalized attendance result for one tracked participant.
///
/// Created only when a session finalizes and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Asha Rao",
    "device_id": "AA:BB:CC:DD:EE:01",
    "date": "2025-01-15",
    "status": "Present",
    "detections": 4,
    "scan_count": 5,
    "required_detections": 4
}))]
pub struct AttendanceVerdict {
    /// Participant display name, taken from the session snapshot.
    #[schema(example = "Asha Rao")]
    pub name: String,

    /// Registered device identifier.
    #[schema(value_type = String, example = "AA:BB:CC:DD:EE:01")]
    pub device_id: DeviceId,

    /// Session date in the configured timezone.
    #[schema(value_type = String, format = Date, example = "2025-01-15")]
    pub date: NaiveDate,

    /// Presence verdict.
    pub status: AttendanceStatus,

    /// Number of scans the device was detected in.
    #[schema(example = 4)]
    pub detections: u32,

    /// Number of scans completed in the session.
    #[schema(example = 5)]
    pub scan_count: u32,

    /// Detections needed for a `Present` verdict.
    #[schema(example = 4)]
    pub required_detections: u32,
}

/// Lifecycle state of the attendance engine.
///
/// `Idle -> Running -> Stopping -> Finalizing -> Completed -> Idle`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionStatus {
    /// No session in progress; `start` is accepted.
    Idle = 0,
    /// The scan/wait loop is executing.
    Running = 1,
    /// Cancellation observed; no further scans will start.
    Stopping = 2,
    /// Verdicts are being computed and published.
    Finalizing = 3,
    /// Outcome delivered; about to return to `Idle`.
    Completed = 4,
}

impl SessionStatus {
    /// Decode the atomic representation. Unknown values map to `Idle`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Finalizing,
            4 => Self::Completed,
            _ => Self::Idle,
        }
    }

    /// Whether a session currently owns the engine.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}
