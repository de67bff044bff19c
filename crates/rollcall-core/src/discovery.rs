//! Device discovery providers.
//!
//! A provider answers one question: which device identifiers are detectable
//! right now? The attendance engine is agnostic to how that is answered.
//!
//! - [`SimulatedDiscovery`] draws pseudo-random detections over the registered
//!   devices so threshold logic can be exercised without hardware.
//! - `BluetoothDiscovery` (feature `bluetooth`) runs a real BlueZ scan.
//! - [`Discovery`] selects one of the two at runtime from configuration.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{DiscoveryConfig, DiscoveryMode};
use crate::registry::{DeviceId, RegistrySnapshot};

#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
pub use crate::bluetooth::BluetoothDiscovery;

/// Devices the simulation advertises when fewer than two are registered.
pub const PLACEHOLDER_DEVICES: [&str; 2] = ["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"];

/// Extra time a discovery call gets on top of the scan duration before it is
/// abandoned as timed out.
pub const DISCOVERY_GRACE: Duration = Duration::from_secs(2);

/// Result type for discovery operations.
pub type DiscoveryResult<T> = std::result::Result<T, DiscoveryError>;

/// Errors raised by a discovery scan. All of them are recoverable: the
/// session counts the scan with zero detections and carries on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// No adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter could not be powered on.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The scan did not finish within its time budget.
    #[error("Scan timed out after {duration_secs} seconds")]
    ScanTimeout {
        /// Time budget that elapsed.
        duration_secs: u64,
    },

    /// The scan failed for another reason.
    #[error("Scan failed: {message}")]
    ScanFailed {
        /// Provider-specific detail.
        message: String,
    },
}

/// The set of devices seen during one scan, with broadcast names when known.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedDevices {
    devices: BTreeMap<DeviceId, Option<String>>,
}

impl DetectedDevices {
    /// An empty detection set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device, keeping the first non-empty name seen.
    pub fn insert(&mut self, device_id: DeviceId, name: Option<String>) {
        let entry = self.devices.entry(device_id).or_insert(None);
        if entry.is_none() {
            *entry = name.filter(|n| !n.trim().is_empty());
        }
    }

    /// Whether the device was seen.
    #[must_use]
    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Number of devices seen.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether nothing was seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices and their names in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, Option<&str>)> {
        self.devices.iter().map(|(id, name)| (id, name.as_deref()))
    }
}

impl FromIterator<DeviceId> for DetectedDevices {
    fn from_iter<I: IntoIterator<Item = DeviceId>>(iter: I) -> Self {
        Self {
            devices: iter.into_iter().map(|id| (id, None)).collect(),
        }
    }
}

/// A pluggable source of device detections.
///
/// Implementations must return within roughly `duration` and never block
/// indefinitely; the engine additionally enforces a hard timeout.
pub trait DeviceDiscovery: Send + Sync {
    /// Short provider name for log context.
    fn name(&self) -> &'static str;

    /// Scan for `duration` and return the devices seen.
    fn discover(
        &self,
        duration: Duration,
    ) -> impl Future<Output = DiscoveryResult<DetectedDevices>> + Send;
}

/// Run one scan, giving up after `duration` plus [`DISCOVERY_GRACE`].
///
/// # Errors
///
/// Returns the provider's error, or [`DiscoveryError::ScanTimeout`] when the
/// provider overruns its budget.
pub async fn discover_bounded<D>(discovery: &D, duration: Duration) -> DiscoveryResult<DetectedDevices>
where
    D: DeviceDiscovery + ?Sized,
{
    let budget = duration.saturating_add(DISCOVERY_GRACE);
    tokio::time::timeout(budget, discovery.discover(duration))
        .await
        .unwrap_or(Err(DiscoveryError::ScanTimeout {
            duration_secs: budget.as_secs(),
        }))
}

/// Tuning for [`SimulatedDiscovery`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSettings {
    /// Chance that each known device is detected in a scan.
    pub detection_probability: f64,
    /// Chance that a whole scan fails.
    pub failure_probability: f64,
    /// RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            detection_probability: 0.75,
            failure_probability: 0.0,
            seed: None,
        }
    }
}

impl From<&DiscoveryConfig> for SimulationSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            detection_probability: config.detection_probability,
            failure_probability: config.failure_probability,
            seed: config.seed,
        }
    }
}

/// Simulated radio: each known device is independently "seen" with a fixed
/// probability per scan. A scan takes half of the requested duration.
#[derive(Debug)]
pub struct SimulatedDiscovery {
    settings: SimulationSettings,
    rng: Mutex<StdRng>,
    roster: RwLock<Vec<(DeviceId, Option<String>)>>,
}

impl SimulatedDiscovery {
    /// Create a simulation over the devices in `snapshot`.
    #[must_use]
    pub fn new(settings: SimulationSettings, snapshot: &RegistrySnapshot) -> Self {
        let rng = settings
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            settings,
            rng: Mutex::new(rng),
            roster: RwLock::new(roster_from(snapshot)),
        }
    }

    /// Replace the set of devices the simulation knows about.
    pub fn set_roster(&self, snapshot: &RegistrySnapshot) {
        *self.roster.write().unwrap_or_else(PoisonError::into_inner) = roster_from(snapshot);
    }

    /// Simulation tuning.
    #[must_use]
    pub const fn settings(&self) -> SimulationSettings {
        self.settings
    }

    fn sample(&self) -> DiscoveryResult<DetectedDevices> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);

        if rng.gen_bool(self.settings.failure_probability.clamp(0.0, 1.0)) {
            return Err(DiscoveryError::ScanFailed {
                message: "simulated radio failure".to_string(),
            });
        }

        let roster = self.roster.read().unwrap_or_else(PoisonError::into_inner);
        let probability = self.settings.detection_probability.clamp(0.0, 1.0);
        let mut detected = DetectedDevices::new();
        for (device_id, name) in roster.iter() {
            if rng.gen_bool(probability) {
                detected.insert(device_id.clone(), name.clone());
            }
        }
        debug!(known = roster.len(), detected = detected.len(), "Simulated scan sampled");
        Ok(detected)
    }
}

impl DeviceDiscovery for SimulatedDiscovery {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn discover(
        &self,
        duration: Duration,
    ) -> impl Future<Output = DiscoveryResult<DetectedDevices>> + Send {
        let outcome = self.sample();
        async move {
            tokio::time::sleep(duration / 2).await;
            outcome
        }
    }
}

fn roster_from(snapshot: &RegistrySnapshot) -> Vec<(DeviceId, Option<String>)> {
    let mut roster: Vec<_> = snapshot
        .iter()
        .map(|(id, record)| (id.clone(), Some(record.name.clone())))
        .collect();

    if roster.len() < 2 {
        for placeholder in PLACEHOLDER_DEVICES {
            if let Ok(id) = DeviceId::parse(placeholder) {
                if !roster.iter().any(|(known, _)| known == &id) {
                    roster.push((id, Some("Unknown Device".to_string())));
                }
            }
        }
    }
    roster
}

/// Runtime-selected discovery provider.
#[derive(Debug)]
pub enum Discovery {
    /// Pseudo-random detections.
    Simulated(SimulatedDiscovery),
    /// Real BlueZ scans.
    #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
    Bluetooth(BluetoothDiscovery),
}

impl Discovery {
    /// Build the provider named by `config`.
    ///
    /// Requesting Bluetooth in a build without the `bluetooth` feature (or
    /// with `mock-bluetooth`) falls back to the simulation with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the Bluetooth adapter cannot be initialized.
    #[allow(clippy::unused_async)]
    pub async fn from_config(
        config: &DiscoveryConfig,
        snapshot: &RegistrySnapshot,
    ) -> DiscoveryResult<Self> {
        match config.mode {
            DiscoveryMode::Simulated => Ok(Self::simulated(config, snapshot)),
            #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
            DiscoveryMode::Bluetooth => Ok(Self::Bluetooth(BluetoothDiscovery::new().await?)),
            #[cfg(not(all(feature = "bluetooth", not(feature = "mock-bluetooth"))))]
            DiscoveryMode::Bluetooth => {
                warn!("Bluetooth discovery is not compiled into this build, using simulation");
                Ok(Self::simulated(config, snapshot))
            }
        }
    }

    fn simulated(config: &DiscoveryConfig, snapshot: &RegistrySnapshot) -> Self {
        Self::Simulated(SimulatedDiscovery::new(config.into(), snapshot))
    }

    /// Whether scans are simulated.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }

    /// Tell the provider about the current registry. Only the simulation
    /// needs this; real radios see whatever is in range.
    pub fn set_roster(&self, snapshot: &RegistrySnapshot) {
        match self {
            Self::Simulated(sim) => sim.set_roster(snapshot),
            #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
            Self::Bluetooth(_) => {}
        }
    }
}

impl DeviceDiscovery for Discovery {
    fn name(&self) -> &'static str {
        match self {
            Self::Simulated(sim) => sim.name(),
            #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
            Self::Bluetooth(bt) => bt.name(),
        }
    }

    async fn discover(&self, duration: Duration) -> DiscoveryResult<DetectedDevices> {
        match self {
            Self::Simulated(sim) => sim.discover(duration).await,
            #[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
            Self::Bluetooth(bt) => bt.discover(duration).await,
        }
    }
}
