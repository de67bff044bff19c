//! Bluetooth device discovery via BlueZ.
//!
//! This module provides functionality to:
//! - Open a BlueZ session and power on the default adapter
//! - Run a time-boxed discovery and collect every device actually in range
//!
//! Only devices that report an RSSI during the scan are returned, so entries
//! BlueZ merely remembers from earlier scans do not count as detections.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::{pin_mut, StreamExt};
use tracing::{debug, info};

use crate::discovery::{DetectedDevices, DeviceDiscovery, DiscoveryError, DiscoveryResult};
use crate::registry::DeviceId;

/// BlueZ-backed discovery provider.
pub struct BluetoothDiscovery {
    adapter: Adapter,
    _session: Session,
}

impl std::fmt::Debug for BluetoothDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluetoothDiscovery")
            .field("adapter", &self.adapter.name())
            .finish_non_exhaustive()
    }
}

impl BluetoothDiscovery {
    /// Connect to BlueZ and power on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::AdapterNotFound`] when no adapter exists and
    /// [`DiscoveryError::AdapterPoweredOff`] when it cannot be powered on.
    pub async fn new() -> DiscoveryResult<Self> {
        let session = Session::new().await.map_err(|e| DiscoveryError::ScanFailed {
            message: format!("failed to open BlueZ session: {e}"),
        })?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| DiscoveryError::AdapterNotFound)?;
        adapter
            .set_powered(true)
            .await
            .map_err(|_| DiscoveryError::AdapterPoweredOff)?;

        info!(adapter = adapter.name(), "Bluetooth adapter ready");
        Ok(Self {
            adapter,
            _session: session,
        })
    }
}

impl DeviceDiscovery for BluetoothDiscovery {
    fn name(&self) -> &'static str {
        "bluetooth"
    }

    fn discover(
        &self,
        duration: Duration,
    ) -> impl Future<Output = DiscoveryResult<DetectedDevices>> + Send {
        let adapter = self.adapter.clone();
        async move {
            let events = adapter
                .discover_devices()
                .await
                .map_err(|e| DiscoveryError::ScanFailed {
                    message: e.to_string(),
                })?;
            pin_mut!(events);

            // sleep() clamps far-future deadlines instead of overflowing
            let window = tokio::time::sleep(duration);
            pin_mut!(window);
            let mut seen: BTreeSet<Address> = BTreeSet::new();
            loop {
                tokio::select! {
                    () = &mut window => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) => {
                            seen.insert(address);
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }

            let mut detected = DetectedDevices::new();
            for address in seen {
                let Ok(device) = adapter.device(address) else {
                    continue;
                };
                if device.rssi().await.ok().flatten().is_none() {
                    continue;
                }
                let name = device.name().await.ok().flatten();
                if let Ok(id) = DeviceId::parse(&address.to_string()) {
                    detected.insert(id, name);
                }
            }

            debug!(devices = detected.len(), "Bluetooth scan finished");
            Ok(detected)
        }
    }
}
