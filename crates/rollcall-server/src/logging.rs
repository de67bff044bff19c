//! Tracing setup for the server.
//!
//! Production writes JSON to a daily rolling file plus compact, colourless
//! stdout for the journal. Development writes pretty stdout with span
//! open/close events. Both share one filter, resolved from `RUST_LOG`, then
//! `ROLLCALL_LOG_LEVEL`, then `info`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use rollcall_core::SystemConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter when `RUST_LOG` is unset.
pub const LOG_LEVEL_ENV: &str = "ROLLCALL_LOG_LEVEL";

/// Environment variable forcing production logging.
pub const PRODUCTION_ENV: &str = "ROLLCALL_PRODUCTION";

/// Filter used when neither variable is set.
pub const DEFAULT_FILTER: &str = "info";

const LOG_FILE_PREFIX: &str = "rollcall";

/// Non-blocking writers stop flushing once their guard drops.
static WRITER_GUARDS: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Resolved logging parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// JSON files + compact stdout instead of pretty stdout.
    pub production: bool,
    /// Where production log files go.
    pub directory: PathBuf,
    /// `EnvFilter` directive.
    pub filter: String,
}

impl LogSettings {
    /// Settings from configuration and the process environment.
    #[must_use]
    pub fn from_env(system: &SystemConfig) -> Self {
        Self::new(
            system,
            production_from_env(),
            std::env::var("RUST_LOG").ok().as_deref(),
            std::env::var(LOG_LEVEL_ENV).ok().as_deref(),
        )
    }

    fn new(
        system: &SystemConfig,
        production_env: bool,
        rust_log: Option<&str>,
        log_level: Option<&str>,
    ) -> Self {
        Self {
            production: system.production || production_env,
            directory: system.log_dir.clone().unwrap_or_else(default_log_directory),
            filter: filter_directive(rust_log, log_level).to_string(),
        }
    }
}

/// Whether production logging is requested through the environment.
#[must_use]
pub fn production_from_env() -> bool {
    std::env::var(PRODUCTION_ENV).is_ok_and(|value| is_truthy(&value))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// First non-blank of `RUST_LOG`, `ROLLCALL_LOG_LEVEL`, then [`DEFAULT_FILTER`].
fn filter_directive<'a>(rust_log: Option<&'a str>, log_level: Option<&'a str>) -> &'a str {
    [rust_log, log_level]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|directive| !directive.is_empty())
        .unwrap_or(DEFAULT_FILTER)
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter does not parse, the log directory cannot
/// be created, or a subscriber is already installed.
pub fn init(settings: &LogSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(&settings.filter)
        .with_context(|| format!("Invalid log filter '{}'", settings.filter))?;

    let (json_file, journal, pretty) = if settings.production {
        let (file_writer, file_guard) =
            tracing_appender::non_blocking(daily_file(&settings.directory)?);
        let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
        let _ = WRITER_GUARDS.set(vec![file_guard, stdout_guard]);

        let json_file = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        let journal = fmt::layer()
            .compact()
            .with_writer(stdout_writer)
            .with_ansi(false);
        (Some(json_file), Some(journal), None)
    } else {
        let pretty = fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
        (None, None, Some(pretty))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_file)
        .with(journal)
        .with(pretty)
        .try_init()
        .context("A tracing subscriber is already installed")?;

    Ok(())
}

fn daily_file(directory: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create log directory {}", directory.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(directory)
        .with_context(|| format!("Failed to open log file in {}", directory.display()))
}

/// `/var/log/rollcall` on Linux, the platform data directory elsewhere.
fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/rollcall")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "rollcall")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_wins() {
        assert_eq!(filter_directive(Some("debug"), Some("warn")), "debug");
    }

    #[test]
    fn test_rollcall_log_level_is_fallback() {
        assert_eq!(filter_directive(None, Some("warn")), "warn");
        assert_eq!(filter_directive(Some("  "), Some("rollcall_core=trace")), "rollcall_core=trace");
    }

    #[test]
    fn test_default_filter_is_info() {
        assert_eq!(filter_directive(None, None), DEFAULT_FILTER);
        assert_eq!(filter_directive(Some(""), Some(" ")), DEFAULT_FILTER);
    }

    #[test]
    fn test_settings_follow_system_config() {
        let system = SystemConfig {
            production: true,
            log_dir: Some(PathBuf::from("/tmp/rollcall-logs")),
            ..SystemConfig::default()
        };

        let settings = LogSettings::new(&system, false, None, Some("debug"));
        assert!(settings.production);
        assert_eq!(settings.directory, PathBuf::from("/tmp/rollcall-logs"));
        assert_eq!(settings.filter, "debug");
    }

    #[test]
    fn test_environment_can_force_production() {
        let settings = LogSettings::new(&SystemConfig::default(), true, None, None);
        assert!(settings.production);
        assert_eq!(settings.directory, default_log_directory());
        assert_eq!(settings.filter, "info");
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" TRUE "));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_production_logs_to_configured_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("logs");
        let appender = daily_file(&nested);
        assert!(appender.is_ok());
        assert!(nested.is_dir());
    }
}
