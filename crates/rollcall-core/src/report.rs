//! Attendance reporting.
//!
//! A [`Reporter`] receives the finalized verdicts of a session. The default
//! [`CsvReporter`] mirrors them to the log as a table and writes one dated CSV
//! file per session.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use thiserror::Error;
use tracing::info;

use crate::types::AttendanceVerdict;

/// Column headers of the attendance export, in order.
pub const EXPORT_HEADERS: [&str; 7] = [
    "Name",
    "Beacon ID",
    "Date",
    "Status",
    "Total Detections",
    "Total Scans",
    "Required Detections",
];

/// Result type for reporting operations.
pub type ReportResult<T> = std::result::Result<T, ReportError>;

/// Errors raised while publishing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The export directory could not be created.
    #[error("Failed to create export directory {}: {source}", path.display())]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The export file could not be written.
    #[error("Failed to write attendance export {}: {source}", path.display())]
    Write {
        /// File path.
        path: PathBuf,
        /// Underlying CSV or I/O error.
        source: csv::Error,
    },

    /// Flushing the export file failed.
    #[error("Failed to flush attendance export {}: {source}", path.display())]
    Flush {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Downstream consumer of finalized verdicts.
pub trait Reporter: Send + Sync {
    /// Publish the verdicts of a session held on `date`.
    ///
    /// Returns the location of the written artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be written. The verdicts
    /// themselves remain valid.
    fn publish(&self, verdicts: &[AttendanceVerdict], date: NaiveDate) -> ReportResult<PathBuf>;
}

#[derive(Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Beacon ID")]
    beacon_id: &'a str,
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Total Detections")]
    detections: u32,
    #[serde(rename = "Total Scans")]
    scan_count: u32,
    #[serde(rename = "Required Detections")]
    required_detections: u32,
}

impl<'a> From<&'a AttendanceVerdict> for ExportRow<'a> {
    fn from(v: &'a AttendanceVerdict) -> Self {
        Self {
            name: &v.name,
            beacon_id: v.device_id.as_str(),
            date: v.date,
            status: v.status.as_str(),
            detections: v.detections,
            scan_count: v.scan_count,
            required_detections: v.required_detections,
        }
    }
}

#[derive(Tabled)]
struct TableRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Beacon ID")]
    beacon_id: String,
    #[tabled(rename = "Date")]
    date: NaiveDate,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Total Detections")]
    detections: u32,
    #[tabled(rename = "Total Scans")]
    scan_count: u32,
    #[tabled(rename = "Required Detections")]
    required_detections: u32,
}

/// Render verdicts as a human-readable table.
#[must_use]
pub fn render_table(verdicts: &[AttendanceVerdict]) -> String {
    let rows = verdicts.iter().map(|v| TableRow {
        name: v.name.clone(),
        beacon_id: v.device_id.to_string(),
        date: v.date,
        status: v.status.as_str(),
        detections: v.detections,
        scan_count: v.scan_count,
        required_detections: v.required_detections,
    });
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    table.to_string()
}

/// Writes `attendance_YYYY-MM-DD.csv` files into a directory.
///
/// A second session on the same date gets a numbered file
/// (`attendance_YYYY-MM-DD_2.csv`) instead of overwriting the first.
#[derive(Debug, Clone)]
pub struct CsvReporter {
    export_dir: PathBuf,
}

impl CsvReporter {
    /// Create a reporter writing into `export_dir`.
    #[must_use]
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    /// Directory receiving exports.
    #[must_use]
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    fn export_path(&self, date: NaiveDate) -> PathBuf {
        let first = self.export_dir.join(format!("attendance_{date}.csv"));
        if !first.exists() {
            return first;
        }
        (2u32..)
            .map(|n| self.export_dir.join(format!("attendance_{date}_{n}.csv")))
            .find(|path| !path.exists())
            .unwrap_or(first)
    }
}

impl Reporter for CsvReporter {
    fn publish(&self, verdicts: &[AttendanceVerdict], date: NaiveDate) -> ReportResult<PathBuf> {
        info!("Final attendance report\n{}", render_table(verdicts));

        std::fs::create_dir_all(&self.export_dir).map_err(|source| ReportError::CreateDir {
            path: self.export_dir.clone(),
            source,
        })?;

        let path = self.export_path(date);
        let write_err = |source| ReportError::Write {
            path: path.clone(),
            source,
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .map_err(write_err)?;
        writer.write_record(EXPORT_HEADERS).map_err(write_err)?;
        for verdict in verdicts {
            writer.serialize(ExportRow::from(verdict)).map_err(write_err)?;
        }
        writer.flush().map_err(|source| ReportError::Flush {
            path: path.clone(),
            source,
        })?;

        info!(path = %path.display(), rows = verdicts.len(), "Attendance data saved");
        Ok(path)
    }
}
