//! Unified error types for the rollcall core library.
//!
//! This module provides a unified error type [`RollcallError`] that covers all failure
//! modes across the rollcall system. Each module also has its own specific error types
//! (`ConfigError`, `RegistryError`, `DiscoveryError`, `ReportError`) for internal use.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Context preservation**: Wrapped errors maintain their original context
//! - **HTTP-ready**: Error types include HTTP status codes and error codes
//!
//! # Example
//!
//! ```rust
//! use rollcall_core::error::{RollcallError, Result};
//!
//! fn require_participants(count: usize) -> Result<()> {
//!     if count == 0 {
//!         return Err(RollcallError::EmptyRegistry);
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all rollcall operations.
///
/// No variant is fatal to the process: discovery and persistence failures are
/// recoverable, validation failures are rejected before any state changes, and
/// the attendance engine stays restartable after every one of them.
#[derive(Debug, Error)]
pub enum RollcallError {
    // =========================================================================
    // DISCOVERY ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// A discovery scan failed or did not finish in time.
    #[error("Device discovery failed: {0}")]
    DiscoveryFailed(String),

    // =========================================================================
    // REGISTRATION ERRORS
    // =========================================================================
    /// The device is already registered to a participant.
    #[error("Device '{device_id}' is already registered to {registered_to}")]
    DuplicateDevice {
        /// Device identifier that was submitted.
        device_id: String,
        /// Name of the participant who owns the device.
        registered_to: String,
    },

    /// The participant name was empty or otherwise unusable.
    #[error("Invalid participant name: {0}")]
    InvalidName(String),

    /// The device identifier was empty or malformed.
    #[error("Invalid device identifier: '{0}'")]
    InvalidDeviceId(String),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// No participants are registered, so a session cannot run.
    #[error("No participants are registered. Register at least one device before starting a session.")]
    EmptyRegistry,

    /// An attendance session is already in progress.
    #[error("An attendance session is already running")]
    SessionAlreadyRunning,

    /// No attendance session is in progress.
    #[error("No attendance session is currently running")]
    SessionNotRunning,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for rollcall operations.
pub type Result<T> = std::result::Result<T, RollcallError>;

/// Short alias for [`RollcallError`].
pub type Error = RollcallError;

impl RollcallError {
    /// Returns `true` if this error is related to device discovery.
    #[inline]
    #[must_use]
    pub const fn is_discovery_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::DiscoveryFailed(_)
        )
    }

    /// Returns `true` if this error is a rejected registration.
    #[inline]
    #[must_use]
    pub const fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateDevice { .. } | Self::InvalidName(_) | Self::InvalidDeviceId(_)
        )
    }

    /// Returns `true` if this error concerns the attendance session lifecycle.
    #[inline]
    #[must_use]
    pub const fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyRegistry | Self::SessionAlreadyRunning | Self::SessionNotRunning
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if this error is likely recoverable without user intervention.
    ///
    /// A failed scan is simply retried on the next cycle, and a failed save
    /// leaves the in-memory registry authoritative.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::DiscoveryFailed(_) | Self::PersistenceError(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidName(_) | Self::InvalidDeviceId(_) => 400,

            // 409 Conflict - valid input refused by current state
            Self::DuplicateDevice { .. }
            | Self::SessionAlreadyRunning
            | Self::SessionNotRunning => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::EmptyRegistry | Self::ConfigParseError(_) | Self::ConfigValidationError(_) => {
                422
            }

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::DiscoveryFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            Self::DuplicateDevice { .. } => "DUPLICATE_DEVICE",
            Self::InvalidName(_) => "INVALID_NAME",
            Self::InvalidDeviceId(_) => "INVALID_DEVICE_ID",
            Self::EmptyRegistry => "EMPTY_REGISTRY",
            Self::SessionAlreadyRunning => "SESSION_ALREADY_RUNNING",
            Self::SessionNotRunning => "SESSION_NOT_RUNNING",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for RollcallError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::registry::RegistryError> for RollcallError {
    fn from(err: crate::registry::RegistryError) -> Self {
        use crate::registry::RegistryError;
        match err {
            RegistryError::DuplicateDevice {
                device_id,
                registered_to,
            } => Self::DuplicateDevice {
                device_id,
                registered_to,
            },
            RegistryError::InvalidName { reason } => Self::InvalidName(reason),
            RegistryError::InvalidDeviceId { device_id } => Self::InvalidDeviceId(device_id),
            RegistryError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            RegistryError::SerializeError(e) => {
                Self::PersistenceError(format!("Failed to serialize registry: {e}"))
            }
            RegistryError::CreateDirError { path, source } => Self::PersistenceError(format!(
                "Failed to create directory {}: {source}",
                path.display()
            )),
        }
    }
}

impl From<crate::discovery::DiscoveryError> for RollcallError {
    fn from(err: crate::discovery::DiscoveryError) -> Self {
        use crate::discovery::DiscoveryError;
        match err {
            DiscoveryError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            DiscoveryError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            DiscoveryError::ScanTimeout { duration_secs } => {
                Self::DiscoveryFailed(format!("Scan timed out after {duration_secs} seconds"))
            }
            DiscoveryError::ScanFailed { message } => Self::DiscoveryFailed(message),
        }
    }
}

impl From<crate::report::ReportError> for RollcallError {
    fn from(err: crate::report::ReportError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoErr, ErrorKind};

    fn duplicate() -> RollcallError {
        RollcallError::DuplicateDevice {
            device_id: "AA:BB:CC:DD:EE:01".into(),
            registered_to: "Asha".into(),
        }
    }

    #[test]
    fn test_discovery_error_classification() {
        assert!(RollcallError::BluetoothAdapterNotFound.is_discovery_error());
        assert!(RollcallError::BluetoothAdapterPoweredOff.is_discovery_error());
        assert!(RollcallError::DiscoveryFailed("test".into()).is_discovery_error());

        assert!(!RollcallError::EmptyRegistry.is_discovery_error());
    }

    #[test]
    fn test_registration_error_classification() {
        assert!(duplicate().is_registration_error());
        assert!(RollcallError::InvalidName("empty".into()).is_registration_error());
        assert!(RollcallError::InvalidDeviceId(String::new()).is_registration_error());

        assert!(!RollcallError::SessionNotRunning.is_registration_error());
    }

    #[test]
    fn test_session_error_classification() {
        assert!(RollcallError::EmptyRegistry.is_session_error());
        assert!(RollcallError::SessionAlreadyRunning.is_session_error());
        assert!(RollcallError::SessionNotRunning.is_session_error());

        assert!(!duplicate().is_session_error());
    }

    #[test]
    fn test_config_and_io_classification() {
        assert!(RollcallError::ConfigParseError("syntax".into()).is_config_error());
        assert!(RollcallError::ConfigValidationError("threshold".into()).is_config_error());
        assert!(RollcallError::PersistenceError("disk full".into()).is_io_error());
        assert!(RollcallError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());

        assert!(!RollcallError::BluetoothAdapterNotFound.is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(RollcallError::DiscoveryFailed("timeout".into()).is_recoverable());
        assert!(RollcallError::PersistenceError("read-only".into()).is_recoverable());
        assert!(!RollcallError::BluetoothAdapterNotFound.is_recoverable());
        assert!(!duplicate().is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(RollcallError::InvalidName("x".into()).http_status_code(), 400);
        assert_eq!(duplicate().http_status_code(), 409);
        assert_eq!(RollcallError::SessionAlreadyRunning.http_status_code(), 409);
        assert_eq!(RollcallError::EmptyRegistry.http_status_code(), 422);
        assert_eq!(
            RollcallError::PersistenceError("error".into()).http_status_code(),
            500
        );
        assert_eq!(
            RollcallError::BluetoothAdapterNotFound.http_status_code(),
            503
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(duplicate().error_code(), "DUPLICATE_DEVICE");
        assert_eq!(RollcallError::EmptyRegistry.error_code(), "EMPTY_REGISTRY");
        assert_eq!(
            RollcallError::DiscoveryFailed("x".into()).error_code(),
            "DISCOVERY_FAILED"
        );
    }

    #[test]
    fn test_from_discovery_error() {
        let err: RollcallError = crate::discovery::DiscoveryError::ScanTimeout { duration_secs: 7 }.into();
        assert!(matches!(err, RollcallError::DiscoveryFailed(ref m) if m.contains("7 seconds")));
    }

    #[test]
    fn test_from_registry_error() {
        let err: RollcallError = crate::registry::RegistryError::InvalidName {
            reason: "name cannot be empty".into(),
        }
        .into();
        assert!(matches!(err, RollcallError::InvalidName(_)));
    }

    #[test]
    fn test_error_display_messages() {
        assert!(duplicate().to_string().contains("already registered to Asha"));
        assert!(RollcallError::EmptyRegistry
            .to_string()
            .contains("No participants are registered"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RollcallError>();
        assert_sync::<RollcallError>();
    }
}
