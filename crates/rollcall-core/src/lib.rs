//! # rollcall-core
//!
//! Core business logic for the rollcall attendance tracking system.
//!
//! This crate provides:
//! - Device discovery (simulated, or BlueZ behind the `bluetooth` feature)
//! - The participant registry and its JSON store
//! - The attendance session engine: cancellable scan/wait loop and
//!   threshold-based presence verdicts
//! - CSV export and table rendering of finalized verdicts
//! - Layered configuration (TOML file + environment)
//!
//! ## Architecture
//!
//! - [`discovery`] - Discovery provider trait and the simulated provider
//! - [`registry`] - Device identifiers, participant registry, persistence
//! - [`session`] - The attendance engine and its caller-facing handle
//! - [`report`] - Reporter trait and the CSV reporter
//! - [`config`] - Configuration loading, saving, and validation
//! - [`storage`] - Data directory defaults and atomic file writes
//! - [`error`] - Unified error type for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
pub mod bluetooth;
pub mod config;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod report;
pub mod session;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
pub use bluetooth::BluetoothDiscovery;
pub use config::{
    default_config_path, is_valid_timezone, Config, ConfigError, ConfigResult, DiscoveryConfig,
    DiscoveryMode, SessionConfig, StorageConfig, SystemConfig, ZeroScanPolicy, MAX_INTERVAL_SECS,
};
pub use discovery::{
    discover_bounded, DetectedDevices, DeviceDiscovery, Discovery, DiscoveryError, DiscoveryResult,
    SimulatedDiscovery, SimulationSettings, DISCOVERY_GRACE,
};
pub use error::{Error, Result, RollcallError};
pub use registry::{
    DeviceId, ParticipantRecord, RegisterOutcome, RegistrationService, Registry, RegistryError,
    RegistryResult, RegistrySnapshot, RegistryStore, MAX_NAME_LENGTH,
};
pub use report::{render_table, CsvReporter, ReportError, ReportResult, Reporter};
pub use session::{
    required_detections, AbortReason, AttendanceEngine, AttendanceReport, ExportStatus,
    ScanProgress, SessionHandle, SessionOutcome, SessionSettings, StartOutcome, StopOutcome,
};
pub use storage::{default_data_dir, default_registry_path};
pub use types::{AttendanceStatus, AttendanceVerdict, SessionStatus};
