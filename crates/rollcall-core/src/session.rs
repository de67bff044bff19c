//! Attendance session engine.
//!
//! The engine owns one background task per session. That task repeatedly
//! scans for devices, counts detections for every participant in the registry
//! snapshot taken at start, waits, and on cancellation turns the counts into
//! presence verdicts which are handed to a [`Reporter`].
//!
//! ```text
//! Idle -> Running -> Stopping -> Finalizing -> Completed -> Idle
//! ```
//!
//! The controlling side never touches worker state directly. It only:
//! - calls [`AttendanceEngine::start`] / [`AttendanceEngine::stop`],
//! - reads [`AttendanceEngine::status`] (an atomic),
//! - listens to [`ScanProgress`] and the final [`SessionOutcome`] through the
//!   [`SessionHandle`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{Config, ZeroScanPolicy};
use crate::discovery::{discover_bounded, DetectedDevices, DeviceDiscovery, DiscoveryResult};
use crate::registry::{DeviceId, RegistrySnapshot};
use crate::report::Reporter;
use crate::types::{AttendanceStatus, AttendanceVerdict, SessionStatus};

/// Progress events buffered per subscriber before it starts lagging.
pub const PROGRESS_CAPACITY: usize = 64;

/// Compute the detections needed for a `Present` verdict.
///
/// `round(scan_count * threshold)` with ties rounded up. Products that land a
/// hair below a tie because of float representation (`5 * 0.7`) still round
/// up.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn required_detections(scan_count: u32, threshold: f64) -> u32 {
    let exact = f64::from(scan_count) * threshold.clamp(0.0, 1.0);
    (exact + 0.5 + 1e-9).floor() as u32
}

/// Timing and verdict parameters, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    /// Duration handed to the discovery provider for each scan.
    pub scan_duration: Duration,
    /// Pause between scans.
    pub wait_interval: Duration,
    /// Fraction of scans a participant must be detected in.
    pub threshold: f64,
    /// Verdict rule for sessions that end before any scan.
    pub zero_scan_policy: ZeroScanPolicy,
    /// Timezone that decides the session date.
    pub timezone: Tz,
}

impl SessionSettings {
    /// Settings from loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            scan_duration: config.session.scan_duration(),
            wait_interval: config.session.wait_interval(),
            threshold: config.session.threshold,
            zero_scan_policy: config.session.zero_scan_policy,
            timezone: config.system.tz(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Live per-scan report, published after every completed scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ScanProgress {
    /// Session the scan belongs to.
    pub session_id: Uuid,

    /// 1-based number of the scan that just completed.
    #[schema(example = 3)]
    pub scan_number: u32,

    /// Whether each tracked device was seen in this scan.
    #[schema(value_type = Object)]
    pub detected: BTreeMap<DeviceId, bool>,

    /// Detections so far for each tracked device.
    #[schema(value_type = Object)]
    pub totals: BTreeMap<DeviceId, u32>,

    /// Set when discovery failed and the scan counted with zero detections.
    pub discovery_error: Option<String>,
}

/// Why a session ended without verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The registry snapshot was empty at start.
    EmptyRegistry,
}

/// Where the finalized verdicts were exported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExportStatus {
    /// The reporter wrote an artifact.
    Written {
        /// Location of the artifact.
        #[schema(value_type = String, example = "/var/lib/rollcall/exports/attendance_2025-01-15.csv")]
        path: PathBuf,
    },
    /// The reporter failed. The verdicts are still valid.
    Failed {
        /// Reporter error.
        message: String,
    },
}

/// Finalized result of a session that ran.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AttendanceReport {
    /// Session identifier.
    pub session_id: Uuid,
    /// Session date in the configured timezone.
    pub date: NaiveDate,
    /// When the session started.
    pub started_at_utc: DateTime<Utc>,
    /// When finalization began.
    pub ended_at_utc: DateTime<Utc>,
    /// Detection-rate threshold applied.
    #[schema(example = 0.8)]
    pub threshold: f64,
    /// Scans completed.
    #[schema(example = 5)]
    pub scan_count: u32,
    /// Detections needed for `Present`.
    #[schema(example = 4)]
    pub required_detections: u32,
    /// One verdict per tracked participant, ordered by name then device id.
    pub verdicts: Vec<AttendanceVerdict>,
    /// Export result.
    pub export: ExportStatus,
}

impl AttendanceReport {
    /// Number of participants marked present.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|v| v.status == AttendanceStatus::Present)
            .count()
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The session ran and produced verdicts.
    Finalized(AttendanceReport),
    /// The session could not run.
    Aborted {
        /// Session identifier.
        session_id: Uuid,
        /// Why it was aborted.
        reason: AbortReason,
    },
}

impl SessionOutcome {
    /// Session identifier.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        match self {
            Self::Finalized(report) => report.session_id,
            Self::Aborted { session_id, .. } => *session_id,
        }
    }

    /// Verdicts of the session; empty when aborted.
    #[must_use]
    pub fn verdicts(&self) -> &[AttendanceVerdict] {
        match self {
            Self::Finalized(report) => &report.verdicts,
            Self::Aborted { .. } => &[],
        }
    }

    /// The finalized report, if the session ran.
    #[must_use]
    pub const fn report(&self) -> Option<&AttendanceReport> {
        match self {
            Self::Finalized(report) => Some(report),
            Self::Aborted { .. } => None,
        }
    }

    /// Whether the session was aborted.
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

/// Result of [`AttendanceEngine::start`].
#[derive(Debug)]
pub enum StartOutcome {
    /// A new session is running.
    Started(SessionHandle),
    /// Another session owns the engine; nothing changed.
    AlreadyRunning,
}

impl StartOutcome {
    /// The handle, if a session was started.
    #[must_use]
    pub fn handle(self) -> Option<SessionHandle> {
        match self {
            Self::Started(handle) => Some(handle),
            Self::AlreadyRunning => None,
        }
    }
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    /// Cancellation was signalled.
    Requested,
    /// Cancellation had already been signalled.
    AlreadyStopping,
    /// No session is running.
    NotRunning,
}

struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
}

struct EngineInner {
    status: AtomicU8,
    settings: SessionSettings,
    reporter: Arc<dyn Reporter>,
    active: Mutex<Option<ActiveSession>>,
}

impl EngineInner {
    fn set_status(&self, status: SessionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs attendance sessions, one at a time.
///
/// Cloning is cheap and every clone controls the same engine.
#[derive(Clone)]
pub struct AttendanceEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for AttendanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttendanceEngine")
            .field("status", &self.status())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl AttendanceEngine {
    /// Create an idle engine.
    #[must_use]
    pub fn new(settings: SessionSettings, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                status: AtomicU8::new(SessionStatus::Idle as u8),
                settings,
                reporter,
                active: Mutex::new(None),
            }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.inner.status.load(Ordering::Acquire))
    }

    /// Engine settings.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Identifier of the session currently owning the engine.
    #[must_use]
    pub fn current_session(&self) -> Option<Uuid> {
        self.inner.active().as_ref().map(|active| active.id)
    }

    /// Start a session over `snapshot`, scanning with `discovery`.
    ///
    /// Returns [`StartOutcome::AlreadyRunning`] without side effects when the
    /// engine is not idle.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start<D>(&self, snapshot: RegistrySnapshot, discovery: Arc<D>) -> StartOutcome
    where
        D: DeviceDiscovery + 'static,
    {
        let mut active = self.inner.active();
        if self
            .inner
            .status
            .compare_exchange(
                SessionStatus::Idle as u8,
                SessionStatus::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            info!("Start ignored, a session is already running");
            return StartOutcome::AlreadyRunning;
        }

        let id = Uuid::now_v7();
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = broadcast::channel(PROGRESS_CAPACITY);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        *active = Some(ActiveSession {
            id,
            cancel: cancel.clone(),
        });
        drop(active);

        let worker = SessionWorker {
            id,
            inner: Arc::clone(&self.inner),
            snapshot,
            discovery,
            cancel,
            progress: progress_tx,
        };
        tokio::spawn(worker.run(outcome_tx).instrument(info_span!("session", %id)));

        StartOutcome::Started(SessionHandle {
            id,
            engine: self.clone(),
            progress: progress_rx,
            outcome: outcome_rx,
        })
    }

    /// Request cancellation of the running session.
    ///
    /// Returns immediately; completion is observed through the session handle.
    /// Calling it again, or with no session running, changes nothing.
    pub fn stop(&self) -> StopOutcome {
        self.stop_session(None)
    }

    fn stop_session(&self, only: Option<Uuid>) -> StopOutcome {
        let active = self.inner.active();
        let Some(session) = active.as_ref() else {
            return StopOutcome::NotRunning;
        };
        if only.is_some_and(|id| id != session.id) {
            return StopOutcome::NotRunning;
        }

        match self.inner.status.compare_exchange(
            SessionStatus::Running as u8,
            SessionStatus::Stopping as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                session.cancel.cancel();
                info!(session_id = %session.id, "Stop requested");
                StopOutcome::Requested
            }
            Err(current) if current == SessionStatus::Stopping as u8 => {
                debug!(session_id = %session.id, "Stop already requested");
                StopOutcome::AlreadyStopping
            }
            Err(_) => StopOutcome::NotRunning,
        }
    }
}

/// Caller-side view of one session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    engine: AttendanceEngine,
    progress: broadcast::Receiver<ScanProgress>,
    outcome: watch::Receiver<Option<SessionOutcome>>,
}

impl SessionHandle {
    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// A new receiver for progress events published from now on.
    #[must_use]
    pub fn progress(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress.resubscribe()
    }

    /// Run `callback` for every scan of this session.
    ///
    /// The returned task ends once the session's worker has finished.
    pub fn on_progress<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(&ScanProgress) + Send + 'static,
    {
        let mut progress = self.progress();
        tokio::spawn(async move {
            loop {
                match progress.recv().await {
                    Ok(event) => callback(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Progress listener fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Run `callback` once with the session outcome.
    pub fn on_completed<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(SessionOutcome) + Send + 'static,
    {
        let outcome = self.outcome.clone();
        tokio::spawn(async move {
            if let Some(outcome) = wait_outcome(outcome).await {
                callback(outcome);
            }
        })
    }

    /// Wait for the session outcome.
    ///
    /// Returns `None` only if the worker died without producing one.
    pub async fn completed(&self) -> Option<SessionOutcome> {
        wait_outcome(self.outcome.clone()).await
    }

    /// The outcome if the session has already completed.
    #[must_use]
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.outcome.borrow().clone()
    }

    /// Request cancellation of this session. A no-op once it has ended.
    pub fn stop(&self) -> StopOutcome {
        self.engine.stop_session(Some(self.id))
    }
}

async fn wait_outcome(
    mut outcome: watch::Receiver<Option<SessionOutcome>>,
) -> Option<SessionOutcome> {
    let ready = outcome.wait_for(Option::is_some).await.ok()?;
    (*ready).clone()
}

/// Returns the engine to `Idle` when the worker ends, including by panic.
struct IdleOnDrop {
    inner: Arc<EngineInner>,
    id: Uuid,
}

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        let mut active = self.inner.active();
        if active.as_ref().is_some_and(|session| session.id == self.id) {
            *active = None;
        }
        self.inner.set_status(SessionStatus::Idle);
    }
}

/// Detection counters, written only by the worker.
struct Tally {
    detections: BTreeMap<DeviceId, u32>,
    scan_count: u32,
}

struct SessionWorker<D> {
    id: Uuid,
    inner: Arc<EngineInner>,
    snapshot: RegistrySnapshot,
    discovery: Arc<D>,
    cancel: CancellationToken,
    progress: broadcast::Sender<ScanProgress>,
}

impl<D: DeviceDiscovery> SessionWorker<D> {
    async fn run(self, outcome_tx: watch::Sender<Option<SessionOutcome>>) {
        let reset = IdleOnDrop {
            inner: Arc::clone(&self.inner),
            id: self.id,
        };
        let outcome = self.execute().await;
        drop(self);
        drop(reset);
        outcome_tx.send_replace(Some(outcome));
    }

    async fn execute(&self) -> SessionOutcome {
        let started_at = Utc::now();

        if self.snapshot.is_empty() {
            warn!("No participants registered, aborting session");
            self.inner.set_status(SessionStatus::Completed);
            return SessionOutcome::Aborted {
                session_id: self.id,
                reason: AbortReason::EmptyRegistry,
            };
        }

        let settings = self.inner.settings;
        info!(
            participants = self.snapshot.len(),
            provider = self.discovery.name(),
            threshold_pct = settings.threshold * 100.0,
            scan_secs = settings.scan_duration.as_secs(),
            wait_secs = settings.wait_interval.as_secs(),
            "Attendance session started"
        );

        let mut tally = Tally {
            detections: self.snapshot.device_ids().map(|id| (id.clone(), 0)).collect(),
            scan_count: 0,
        };

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let scan = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("Scan abandoned by stop request");
                    break;
                }
                result = self.scan() => result,
            };
            self.record(&mut tally, scan);

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(settings.wait_interval) => {}
            }
        }

        self.inner.set_status(SessionStatus::Stopping);
        self.inner.set_status(SessionStatus::Finalizing);
        let report = self.finalize(tally, started_at).await;
        self.inner.set_status(SessionStatus::Completed);
        SessionOutcome::Finalized(report)
    }

    async fn scan(&self) -> DiscoveryResult<DetectedDevices> {
        discover_bounded(self.discovery.as_ref(), self.inner.settings.scan_duration).await
    }

    fn record(&self, tally: &mut Tally, scan: DiscoveryResult<DetectedDevices>) {
        tally.scan_count += 1;
        let scan_number = tally.scan_count;

        let (seen, discovery_error) = match scan {
            Ok(seen) => (seen, None),
            Err(err) => {
                warn!(scan_number, error = %err, "Discovery failed, scan counts with no detections");
                (DetectedDevices::new(), Some(err.to_string()))
            }
        };

        let mut detected = BTreeMap::new();
        for (device_id, count) in &mut tally.detections {
            let found = seen.contains(device_id);
            if found {
                *count += 1;
            }
            let name = self.snapshot.get(device_id).map_or("", |r| r.name.as_str());
            debug!(scan_number, device = %device_id, name, found, total = *count, "Participant scanned");
            detected.insert(device_id.clone(), found);
        }

        let found = detected.values().filter(|found| **found).count();
        info!(scan_number, found, tracked = detected.len(), "Scan complete");

        // No subscribers is fine.
        let _ = self.progress.send(ScanProgress {
            session_id: self.id,
            scan_number,
            detected,
            totals: tally.detections.clone(),
            discovery_error,
        });
    }

    async fn finalize(&self, tally: Tally, started_at: DateTime<Utc>) -> AttendanceReport {
        let settings = self.inner.settings;
        let ended_at = Utc::now();
        let date = ended_at.with_timezone(&settings.timezone).date_naive();
        let required = required_detections(tally.scan_count, settings.threshold);

        if tally.scan_count == 0 {
            warn!(
                policy = ?settings.zero_scan_policy,
                "Session stopped before any scan completed"
            );
        }

        let verdicts = build_verdicts(
            &self.snapshot,
            &tally,
            required,
            settings.zero_scan_policy,
            date,
        );
        let present = verdicts
            .iter()
            .filter(|v| v.status == AttendanceStatus::Present)
            .count();
        info!(
            total_scans = tally.scan_count,
            threshold_pct = settings.threshold * 100.0,
            required_detections = required,
            present,
            absent = verdicts.len() - present,
            "Attendance finalized"
        );

        let export = self.publish(&verdicts, date).await;

        AttendanceReport {
            session_id: self.id,
            date,
            started_at_utc: started_at,
            ended_at_utc: ended_at,
            threshold: settings.threshold,
            scan_count: tally.scan_count,
            required_detections: required,
            verdicts,
            export,
        }
    }

    async fn publish(&self, verdicts: &[AttendanceVerdict], date: NaiveDate) -> ExportStatus {
        let reporter = Arc::clone(&self.inner.reporter);
        let rows = verdicts.to_vec();
        match tokio::task::spawn_blocking(move || reporter.publish(&rows, date)).await {
            Ok(Ok(path)) => ExportStatus::Written { path },
            Ok(Err(err)) => {
                error!(error = %err, "Failed to export attendance");
                ExportStatus::Failed {
                    message: err.to_string(),
                }
            }
            Err(err) => {
                error!(error = %err, "Reporter task failed");
                ExportStatus::Failed {
                    message: format!("reporter task failed: {err}"),
                }
            }
        }
    }
}

fn build_verdicts(
    snapshot: &RegistrySnapshot,
    tally: &Tally,
    required: u32,
    policy: ZeroScanPolicy,
    date: NaiveDate,
) -> Vec<AttendanceVerdict> {
    let insufficient = tally.scan_count == 0 && policy == ZeroScanPolicy::Absent;

    let mut verdicts: Vec<_> = snapshot
        .iter()
        .map(|(device_id, record)| {
            let detections = tally.detections.get(device_id).copied().unwrap_or(0);
            let status = if !insufficient && detections >= required {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            };
            AttendanceVerdict {
                name: record.name.clone(),
                device_id: device_id.clone(),
                date,
                status,
                detections,
                scan_count: tally.scan_count,
                required_detections: required,
            }
        })
        .collect();

    verdicts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.device_id.cmp(&b.device_id)));
    verdicts
}
