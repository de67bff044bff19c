//! Application state shared across handlers.
//!
//! Handlers receive a [`SharedState`] and lock it briefly. The attendance
//! engine runs its session loop on its own task; progress and completion are
//! copied into [`SessionTracker`] by listener tasks, so handlers only ever
//! read the tracker and never reach into engine memory.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rollcall_core::{
    AttendanceEngine, Config, CsvReporter, DeviceId, Discovery, ParticipantRecord,
    RegistrationService, RegistryStore, ScanProgress, SessionHandle, SessionOutcome,
    SessionSettings,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// State handle passed to every handler.
pub type SharedState = Arc<RwLock<AppState>>;

/// Everything the API needs.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,

    /// Participant registry and its store.
    pub registration: RegistrationService,

    /// Discovery provider used for sessions and registration scans.
    pub discovery: Arc<Discovery>,

    /// Held by whoever is scanning: a session for its whole run, or one
    /// registration scan.
    pub radio: Arc<Mutex<()>>,

    /// The attendance engine.
    pub engine: AttendanceEngine,

    /// Caller-side view of the current and last session.
    pub session: SessionTracker,
}

impl AppState {
    /// Build state from configuration: load the registry, select the
    /// discovery provider, and create the engine with a CSV reporter.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured discovery provider cannot start.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let registration =
            RegistrationService::load(RegistryStore::new(&config.storage.registry_path));
        let discovery = Discovery::from_config(&config.discovery, &registration.snapshot()).await?;
        let reporter = CsvReporter::new(&config.storage.export_dir);
        let engine = AttendanceEngine::new(SessionSettings::from_config(&config), Arc::new(reporter));

        info!(
            participants = registration.registry().len(),
            provider = if discovery.is_simulated() { "simulated" } else { "bluetooth" },
            threshold_pct = config.session.threshold * 100.0,
            "Application state ready"
        );

        Ok(Self {
            config,
            registration,
            discovery: Arc::new(discovery),
            radio: Arc::new(Mutex::new(())),
            engine,
            session: SessionTracker::default(),
        })
    }

    /// Wrap into the handle handlers receive.
    #[must_use]
    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}

/// The session currently owning the engine, as seen by the API.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    /// Session identifier.
    pub id: Uuid,
    /// Caller-supplied context label.
    pub label: Option<String>,
    /// When the API started it.
    pub started_at_utc: DateTime<Utc>,
    /// Participants tracked by the session, ordered by name.
    pub participants: Vec<ParticipantRecord>,
    /// Latest scan report.
    pub progress: Option<ScanProgress>,
}

impl ActiveSession {
    /// Detections so far for one device.
    #[must_use]
    pub fn detections(&self, device_id: &DeviceId) -> u32 {
        self.progress
            .as_ref()
            .and_then(|p| p.totals.get(device_id).copied())
            .unwrap_or(0)
    }

    /// Whether the device was seen in the latest scan.
    #[must_use]
    pub fn seen_last_scan(&self, device_id: &DeviceId) -> bool {
        self.progress
            .as_ref()
            .and_then(|p| p.detected.get(device_id).copied())
            .unwrap_or(false)
    }
}

/// A finished session and its label.
#[derive(Debug, Clone)]
pub struct FinishedSession {
    /// Caller-supplied context label.
    pub label: Option<String>,
    /// Engine outcome.
    pub outcome: SessionOutcome,
}

/// Progress and outcomes copied out of the engine.
#[derive(Debug, Default)]
pub struct SessionTracker {
    /// Session in progress, if any.
    pub active: Option<ActiveSession>,
    /// Most recently finished session.
    pub last: Option<FinishedSession>,
}

impl SessionTracker {
    /// Record a newly started session.
    pub fn begin(&mut self, id: Uuid, label: Option<String>, participants: Vec<ParticipantRecord>) {
        self.active = Some(ActiveSession {
            id,
            label,
            started_at_utc: Utc::now(),
            participants,
            progress: None,
        });
    }

    /// Store a scan report if it belongs to the active session.
    pub fn record_progress(&mut self, progress: ScanProgress) {
        match self.active.as_mut() {
            Some(active) if active.id == progress.session_id => active.progress = Some(progress),
            _ => debug!(session_id = %progress.session_id, "Dropping progress for inactive session"),
        }
    }

    /// Move the session to `last` once its outcome is known.
    pub fn finish(&mut self, outcome: SessionOutcome) {
        let id = outcome.session_id();
        let label = match self.active.take() {
            Some(active) if active.id == id => active.label,
            other => {
                self.active = other;
                None
            }
        };
        self.last = Some(FinishedSession { label, outcome });
    }
}

/// Copy progress and the final outcome of `handle` into shared state.
///
/// `radio` is released once the session has finished.
pub fn track_session(state: &SharedState, handle: SessionHandle, radio: OwnedMutexGuard<()>) {
    let mut progress = handle.progress();
    let progress_state = Arc::clone(state);
    tokio::spawn(async move {
        loop {
            match progress.recv().await {
                Ok(event) => progress_state.write().await.session.record_progress(event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Progress tracker lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let outcome_state = Arc::clone(state);
    tokio::spawn(async move {
        let outcome = handle.completed().await;
        drop(radio);
        if let Some(outcome) = outcome {
            info!(session_id = %outcome.session_id(), aborted = outcome.is_aborted(), "Session finished");
            outcome_state.write().await.session.finish(outcome);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::AbortReason;
    use std::collections::BTreeMap;

    fn progress(session_id: Uuid, scan_number: u32) -> ScanProgress {
        ScanProgress {
            session_id,
            scan_number,
            detected: BTreeMap::new(),
            totals: BTreeMap::new(),
            discovery_error: None,
        }
    }

    #[test]
    fn test_progress_for_other_session_is_ignored() {
        let mut tracker = SessionTracker::default();
        let id = Uuid::now_v7();
        tracker.begin(id, None, Vec::new());

        tracker.record_progress(progress(Uuid::now_v7(), 1));
        assert!(tracker.active.as_ref().unwrap().progress.is_none());

        tracker.record_progress(progress(id, 2));
        assert_eq!(tracker.active.as_ref().unwrap().progress.as_ref().unwrap().scan_number, 2);
    }

    #[test]
    fn test_finish_moves_label_to_last() {
        let mut tracker = SessionTracker::default();
        let id = Uuid::now_v7();
        tracker.begin(id, Some("Sem 5 / Batch B / Period 2".into()), Vec::new());

        tracker.finish(SessionOutcome::Aborted {
            session_id: id,
            reason: AbortReason::EmptyRegistry,
        });

        assert!(tracker.active.is_none());
        let last = tracker.last.unwrap();
        assert_eq!(last.label.as_deref(), Some("Sem 5 / Batch B / Period 2"));
        assert!(last.outcome.is_aborted());
    }

    #[test]
    fn test_stale_finish_keeps_newer_session_active() {
        let mut tracker = SessionTracker::default();
        let old = Uuid::now_v7();
        let new = Uuid::now_v7();
        tracker.begin(new, None, Vec::new());

        tracker.finish(SessionOutcome::Aborted {
            session_id: old,
            reason: AbortReason::EmptyRegistry,
        });

        assert_eq!(tracker.active.as_ref().unwrap().id, new);
        assert!(tracker.last.is_some());
    }
}
