//! Application configuration management.
//!
//! Handles loading, saving, and validating rollcall configuration including:
//! - Scan duration, wait interval and detection-rate threshold for sessions
//! - Which device discovery provider to use (simulated or Bluetooth)
//! - Where the participant registry and attendance exports live
//! - Timezone used to date sessions, and the HTTP bind address
//!
//! Configuration is fixed at deployment time. It is read once at startup from
//! an optional TOML file, overlaid with `ROLLCALL__SECTION__KEY` environment
//! variables, and validated before anything else starts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::default_data_dir;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "ROLLCALL";

/// Longest accepted scan duration or wait interval, in seconds.
pub const MAX_INTERVAL_SECS: u64 = 3600;

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Errors raised while loading, saving, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be written.
    #[error("Failed to write config file {}: {source}", path.display())]
    WriteError {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be serialized back to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field failed validation.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path, e.g. `session.threshold`.
        field: String,
        /// What is wrong with the value.
        message: String,
    },

    /// More than one field failed validation.
    #[error("{} configuration fields are invalid", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Attendance session timing and threshold.
    pub session: SessionConfig,

    /// Device discovery provider selection.
    pub discovery: DiscoveryConfig,

    /// File locations.
    pub storage: StorageConfig,

    /// Process-level settings.
    pub system: SystemConfig,
}

/// Session timing and verdict configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long each discovery scan lasts.
    pub scan_duration_secs: u64,

    /// Pause between the end of one scan and the start of the next.
    pub wait_interval_secs: u64,

    /// Fraction of scans (0.0-1.0) a participant must be detected in.
    pub threshold: f64,

    /// Verdict given to every participant when a session ends with zero scans.
    pub zero_scan_policy: ZeroScanPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_duration_secs: 5,
            wait_interval_secs: 5,
            threshold: 0.8,
            zero_scan_policy: ZeroScanPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Scan duration as a [`Duration`].
    #[must_use]
    pub const fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration_secs)
    }

    /// Wait interval as a [`Duration`].
    #[must_use]
    pub const fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs)
    }
}

/// How a session that completed zero scans is judged.
///
/// With zero scans the required detection count rounds to zero, so the plain
/// threshold rule marks everyone present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroScanPolicy {
    /// Apply the threshold rule unchanged: everyone is present.
    #[default]
    Present,
    /// Treat zero scans as insufficient data: everyone is absent.
    Absent,
}

/// Which discovery provider backs attendance sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Pseudo-random detections over the registered devices.
    #[default]
    Simulated,
    /// Real BlueZ scans (requires the `bluetooth` feature).
    Bluetooth,
}

/// Discovery provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Provider to use.
    pub mode: DiscoveryMode,

    /// Simulation only: chance that a registered device is seen in one scan.
    pub detection_probability: f64,

    /// Simulation only: chance that a whole scan fails.
    pub failure_probability: f64,

    /// Simulation only: RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            detection_probability: 0.75,
            failure_probability: 0.0,
            seed: None,
        }
    }
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding registered participants.
    pub registry_path: PathBuf,

    /// Directory receiving dated attendance exports.
    pub export_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            registry_path: data_dir.join("registered_participants.json"),
            export_dir: data_dir.join("exports"),
        }
    }
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// IANA timezone used to date sessions.
    pub timezone: String,

    /// Address the HTTP server binds to.
    pub bind_address: String,

    /// Production logging (JSON files + compact stdout).
    pub production: bool,

    /// Directory for production log files; the platform default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            bind_address: "0.0.0.0:3000".to_string(),
            production: false,
            log_dir: None,
        }
    }
}

impl SystemConfig {
    /// Parsed timezone, falling back to UTC for unvalidated input.
    #[must_use]
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

impl Config {
    /// Load configuration from an optional TOML file plus environment overrides.
    ///
    /// A missing file is not an error; defaults apply. Environment variables
    /// take precedence, e.g. `ROLLCALL__SESSION__THRESHOLD=0.75`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.to_path_buf())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single problem, or
    /// [`ConfigError::MultipleValidationErrors`] when there are several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if !is_unit_fraction(self.session.threshold) {
            errors.push(invalid(
                "session.threshold",
                format!("must be between 0.0 and 1.0 (got {})", self.session.threshold),
            ));
        }
        if !(1..=MAX_INTERVAL_SECS).contains(&self.session.scan_duration_secs) {
            errors.push(invalid(
                "session.scan_duration_secs",
                format!("must be between 1 and {MAX_INTERVAL_SECS} seconds"),
            ));
        }
        if self.session.wait_interval_secs > MAX_INTERVAL_SECS {
            errors.push(invalid(
                "session.wait_interval_secs",
                format!("must be at most {MAX_INTERVAL_SECS} seconds"),
            ));
        }
        if !is_unit_fraction(self.discovery.detection_probability) {
            errors.push(invalid(
                "discovery.detection_probability",
                "must be between 0.0 and 1.0",
            ));
        }
        if !is_unit_fraction(self.discovery.failure_probability) {
            errors.push(invalid(
                "discovery.failure_probability",
                "must be between 0.0 and 1.0",
            ));
        }
        if !is_valid_timezone(&self.system.timezone) {
            errors.push(invalid(
                "system.timezone",
                format!("'{}' is not an IANA timezone", self.system.timezone),
            ));
        }
        if self.system.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(invalid(
                "system.bind_address",
                format!("'{}' is not a socket address", self.system.bind_address),
            ));
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default configuration file location.
///
/// On Linux: `/etc/rollcall/config.toml`
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/rollcall/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "rollcall").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

/// Returns `true` if `tz` names a known IANA timezone.
#[must_use]
pub fn is_valid_timezone(tz: &str) -> bool {
    tz.parse::<Tz>().is_ok()
}

fn is_unit_fraction(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.scan_duration_secs, 5);
        assert_eq!(config.session.wait_interval_secs, 5);
        assert!((config.session.threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.session.zero_scan_policy, ZeroScanPolicy::Present);
        assert_eq!(config.discovery.mode, DiscoveryMode::Simulated);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[session]
threshold = 0.5
zero_scan_policy = "absent"

[discovery]
mode = "simulated"
seed = 42

[system]
timezone = "Asia/Kolkata"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!((config.session.threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.session.zero_scan_policy, ZeroScanPolicy::Absent);
        assert_eq!(config.session.scan_duration_secs, 5);
        assert_eq!(config.discovery.seed, Some(42));
        assert_eq!(config.system.tz(), chrono_tz::Asia::Kolkata);
    }

    #[test]
    fn test_load_rejects_invalid_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nthreshold = 1.5\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "session.threshold"));
    }

    #[test]
    fn test_validate_collects_multiple_errors() {
        let mut config = Config::default();
        config.session.threshold = -0.1;
        config.session.scan_duration_secs = 0;
        config.system.timezone = "Mars/Olympus".to_string();

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_bounds_scan_and_wait_intervals() {
        let mut config = Config::default();
        config.session.scan_duration_secs = MAX_INTERVAL_SECS;
        config.session.wait_interval_secs = 0;
        assert!(config.validate().is_ok());

        config.session.scan_duration_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. }) if field == "session.scan_duration_secs"
        ));

        config.session.scan_duration_secs = 0;
        config.session.wait_interval_secs = MAX_INTERVAL_SECS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MultipleValidationErrors(ref errors)) if errors.len() == 2
        ));
    }

    #[test]
    fn test_threshold_bounds_are_inclusive() {
        let mut config = Config::default();
        config.session.threshold = 0.0;
        assert!(config.validate().is_ok());
        config.session.threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.session.wait_interval_secs = 12;
        config.discovery.detection_probability = 0.4;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.session.wait_interval_secs, 12);
        assert!((loaded.discovery.detection_probability - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_is_valid_timezone() {
        assert!(is_valid_timezone("UTC"));
        assert!(is_valid_timezone("America/Los_Angeles"));
        assert!(!is_valid_timezone("Nowhere/Special"));
    }
}
