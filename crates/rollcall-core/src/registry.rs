//! Participant registration store.
//!
//! The registry maps device identifiers to participant records. It is loaded
//! once at startup, mutated only through registration, and rewritten in full
//! after every successful registration. Attendance sessions never see the live
//! registry; they receive an immutable [`RegistrySnapshot`].
//!
//! The on-disk format is a single JSON object keyed by device identifier:
//!
//! ```json
//! {
//!     "AA:BB:CC:DD:EE:01": { "name": "Asha Rao", "beacon_id": "AA:BB:CC:DD:EE:01" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::storage::write_atomic;

/// Maximum participant name length, in characters.
pub const MAX_NAME_LENGTH: usize = 100;

static MAC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}([:-][0-9A-Fa-f]{2}){5}$").expect("MAC address regex is valid")
});

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Errors raised by registration and persistence.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The device is already registered.
    #[error("Device '{device_id}' is already registered to {registered_to}")]
    DuplicateDevice {
        /// Submitted device identifier.
        device_id: String,
        /// Current owner of the device.
        registered_to: String,
    },

    /// The participant name was rejected.
    #[error("Invalid participant name: {reason}")]
    InvalidName {
        /// Why the name was rejected.
        reason: String,
    },

    /// The device identifier was rejected.
    #[error("Invalid device identifier: '{device_id}'")]
    InvalidDeviceId {
        /// Submitted identifier.
        device_id: String,
    },

    /// The registry file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The registry directory could not be created.
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDirError {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The registry could not be serialized.
    #[error("Failed to serialize registry: {0}")]
    SerializeError(#[from] serde_json::Error),
}

/// A normalized device identifier.
///
/// Surrounding whitespace is trimmed. MAC-formatted identifiers are
/// canonicalised to upper-case with `:` separators so that the same radio is
/// always the same key, whichever way it was typed or reported.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(example = "AA:BB:CC:DD:EE:01")]
pub struct DeviceId(String);

impl DeviceId {
    /// Parse and normalize a device identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidDeviceId`] if the input is empty or
    /// contains whitespace.
    pub fn parse(raw: &str) -> RegistryResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidDeviceId {
                device_id: raw.to_string(),
            });
        }

        if MAC_ADDRESS.is_match(trimmed) {
            Ok(Self(trimmed.replace('-', ":").to_ascii_uppercase()))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier looks like a Bluetooth MAC address.
    #[must_use]
    pub fn is_mac_address(&self) -> bool {
        MAC_ADDRESS.is_match(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = RegistryError;

    fn try_from(value: String) -> RegistryResult<Self> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "name": "Asha Rao",
    "beacon_id": "AA:BB:CC:DD:EE:01"
}))]
pub struct ParticipantRecord {
    /// Display name.
    #[schema(example = "Asha Rao")]
    pub name: String,

    /// Registered device identifier.
    #[serde(rename = "beacon_id", alias = "device_id")]
    #[schema(value_type = String, example = "AA:BB:CC:DD:EE:01")]
    pub device_id: DeviceId,
}

/// In-memory registry of participants keyed by device identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Registry {
    participants: BTreeMap<DeviceId, ParticipantRecord>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device under a participant name.
    ///
    /// Validation happens before any mutation.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidDeviceId`] for an unusable identifier
    /// - [`RegistryError::InvalidName`] for an empty or overlong name
    /// - [`RegistryError::DuplicateDevice`] if the device is already registered
    pub fn register(&mut self, device_id: &str, name: &str) -> RegistryResult<ParticipantRecord> {
        let device_id = DeviceId::parse(device_id)?;
        let name = validate_name(name)?;

        if let Some(existing) = self.participants.get(&device_id) {
            return Err(RegistryError::DuplicateDevice {
                device_id: device_id.to_string(),
                registered_to: existing.name.clone(),
            });
        }

        let record = ParticipantRecord {
            name,
            device_id: device_id.clone(),
        };
        self.participants.insert(device_id, record.clone());
        Ok(record)
    }

    /// Look up a participant.
    #[must_use]
    pub fn get(&self, device_id: &DeviceId) -> Option<&ParticipantRecord> {
        self.participants.get(device_id)
    }

    /// Whether a device is registered.
    #[must_use]
    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.participants.contains_key(device_id)
    }

    /// Number of registered participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether no participants are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participants ordered by name, then device identifier.
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantRecord> {
        let mut records: Vec<_> = self.participants.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.device_id.cmp(&b.device_id)));
        records
    }

    /// Take an immutable point-in-time copy for an attendance session.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            participants: Arc::new(self.participants.clone()),
        }
    }
}

/// One entry as found on disk, before validation.
#[derive(Debug, Deserialize)]
struct StoredRecord {
    name: String,
    #[serde(default, rename = "beacon_id", alias = "device_id")]
    device_id: Option<String>,
}

impl Registry {
    /// Build a registry from raw file entries, skipping the ones that cannot
    /// be used. Returns the registry and the number of skipped entries.
    fn from_stored(entries: BTreeMap<String, StoredRecord>) -> (Self, usize) {
        let mut registry = Self::new();
        let mut skipped = 0;

        for (key, stored) in entries {
            let device_id = match DeviceId::parse(&key) {
                Ok(device_id) => device_id,
                Err(e) => {
                    warn!(key = %key, name = %stored.name, error = %e, "Skipping registry entry");
                    skipped += 1;
                    continue;
                }
            };
            let name = match validate_name(&stored.name) {
                Ok(name) => name,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping registry entry");
                    skipped += 1;
                    continue;
                }
            };
            if let Some(existing) = registry.participants.get(&device_id) {
                warn!(
                    key = %key,
                    name = %name,
                    registered_to = %existing.name,
                    "Skipping registry entry for an already loaded device"
                );
                skipped += 1;
                continue;
            }
            if let Some(embedded) = stored.device_id.filter(|embedded| {
                DeviceId::parse(embedded).map_or(true, |parsed| parsed != device_id)
            }) {
                warn!(key = %device_id, embedded = %embedded, "Registry entry has mismatched device id, using key");
            }

            registry
                .participants
                .insert(device_id.clone(), ParticipantRecord { name, device_id });
        }

        (registry, skipped)
    }
}

impl FromIterator<ParticipantRecord> for Registry {
    fn from_iter<I: IntoIterator<Item = ParticipantRecord>>(iter: I) -> Self {
        Self {
            participants: iter
                .into_iter()
                .map(|record| (record.device_id.clone(), record))
                .collect(),
        }
    }
}

/// Immutable registry copy taken when a session starts.
///
/// Cloning is cheap; all clones share the same data. Registrations made after
/// the snapshot was taken are invisible to it.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    participants: Arc<BTreeMap<DeviceId, ParticipantRecord>>,
}

impl RegistrySnapshot {
    /// Number of tracked participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    /// Whether the snapshot tracks nobody.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Look up a participant.
    #[must_use]
    pub fn get(&self, device_id: &DeviceId) -> Option<&ParticipantRecord> {
        self.participants.get(device_id)
    }

    /// Tracked device identifiers in key order.
    pub fn device_ids(&self) -> impl Iterator<Item = &DeviceId> {
        self.participants.keys()
    }

    /// Tracked participants in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeviceId, &ParticipantRecord)> {
        self.participants.iter()
    }
}

impl From<Registry> for RegistrySnapshot {
    fn from(registry: Registry) -> Self {
        Self {
            participants: Arc::new(registry.participants),
        }
    }
}

/// JSON file backing the registry.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Create a store for the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the registry.
    ///
    /// Never fails: a missing file yields an empty registry, and an unreadable
    /// or corrupt file yields an empty registry plus a warning. Entries with an
    /// unusable key or name, or a key that collides with an earlier entry once
    /// normalized, are skipped one by one; the original file is then copied to
    /// [`RegistryStore::backup_path`] before any later save rewrites it.
    #[must_use]
    pub fn load(&self) -> Registry {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No registry file found, starting empty");
                return Registry::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read registry, starting empty");
                return Registry::new();
            }
        };

        let entries = match serde_json::from_str::<BTreeMap<String, StoredRecord>>(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Registry file is corrupt, starting empty");
                self.keep_backup();
                return Registry::new();
            }
        };

        let (registry, skipped) = Registry::from_stored(entries);
        if skipped > 0 {
            self.keep_backup();
        }
        info!(
            path = %self.path.display(),
            participants = registry.len(),
            skipped,
            "Loaded registered participants"
        );
        registry
    }

    /// Path of the copy kept when the file holds entries that cannot be loaded.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".bak");
        self.path.with_file_name(name)
    }

    /// The next save rewrites the file without the skipped entries; keep the
    /// original next to it.
    fn keep_backup(&self) {
        let backup = self.backup_path();
        match std::fs::copy(&self.path, &backup) {
            Ok(_) => warn!(backup = %backup.display(), "Original registry file kept"),
            Err(e) => warn!(backup = %backup.display(), error = %e, "Failed to back up registry file"),
        }
    }

    /// Rewrite the registry file in full.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the write fails.
    pub fn save(&self, registry: &Registry) -> RegistryResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| RegistryError::CreateDirError {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = serde_json::to_vec_pretty(registry)?;
        write_atomic(&self.path, &content).map_err(|source| RegistryError::WriteError {
            path: self.path.clone(),
            source,
        })?;

        info!(path = %self.path.display(), participants = registry.len(), "Registry saved");
        Ok(())
    }
}

/// Result of a registration that passed validation.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    /// The newly registered participant.
    pub record: ParticipantRecord,

    /// Whether the registry file was rewritten.
    pub persisted: bool,

    /// Persistence failure message when `persisted` is false.
    pub warning: Option<String>,
}

/// Registration flow: validate, insert, persist.
///
/// The in-memory registry is authoritative. A failed save does not undo the
/// registration; it is reported through [`RegisterOutcome::warning`].
#[derive(Debug)]
pub struct RegistrationService {
    registry: Registry,
    store: RegistryStore,
}

impl RegistrationService {
    /// Load the registry from `store`.
    #[must_use]
    pub fn load(store: RegistryStore) -> Self {
        let registry = store.load();
        Self { registry, store }
    }

    /// Register a participant and persist the registry.
    ///
    /// # Errors
    ///
    /// Returns validation errors only; persistence failures are reported in
    /// the outcome.
    pub fn register(&mut self, device_id: &str, name: &str) -> RegistryResult<RegisterOutcome> {
        let record = self.registry.register(device_id, name)?;
        info!(name = %record.name, device_id = %record.device_id, "Registered participant");

        match self.store.save(&self.registry) {
            Ok(()) => Ok(RegisterOutcome {
                record,
                persisted: true,
                warning: None,
            }),
            Err(e) => {
                warn!(error = %e, "Registration kept in memory but not persisted");
                Ok(RegisterOutcome {
                    record,
                    persisted: false,
                    warning: Some(e.to_string()),
                })
            }
        }
    }

    /// Current registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Snapshot for a new session.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        self.registry.snapshot()
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &RegistryStore {
        &self.store
    }
}

fn validate_name(name: &str) -> RegistryResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RegistryError::InvalidName {
            reason: "name cannot be empty".to_string(),
        });
    }
    let length = name.chars().count();
    if length > MAX_NAME_LENGTH {
        return Err(RegistryError::InvalidName {
            reason: format!("name exceeds {MAX_NAME_LENGTH} characters (got {length})"),
        });
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_device_id_normalizes_mac_addresses() {
        let id = DeviceId::parse("  aa-bb-cc-dd-ee-0f ").unwrap();
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:0F");
        assert!(id.is_mac_address());
    }

    #[test]
    fn test_device_id_keeps_other_identifiers() {
        let id = DeviceId::parse("beacon-17").unwrap();
        assert_eq!(id.as_str(), "beacon-17");
        assert!(!id.is_mac_address());
    }

    #[test]
    fn test_device_id_rejects_blank_and_spaced() {
        assert!(matches!(
            DeviceId::parse("   "),
            Err(RegistryError::InvalidDeviceId { .. })
        ));
        assert!(DeviceId::parse("AA BB").is_err());
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = Registry::new();
        registry.register("AA:BB:CC:DD:EE:01", "Asha").unwrap();

        let err = registry.register("aa:bb:cc:dd:ee:01", "Someone Else").unwrap_err();
        match err {
            RegistryError::DuplicateDevice { registered_to, .. } => assert_eq!(registered_to, "Asha"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid_names() {
        let mut registry = Registry::new();
        assert!(matches!(
            registry.register("AA:BB:CC:DD:EE:01", "  "),
            Err(RegistryError::InvalidName { .. })
        ));
        let long_name = "x".repeat(MAX_NAME_LENGTH + 1);
        assert!(registry.register("AA:BB:CC:DD:EE:01", &long_name).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_trims_name() {
        let mut registry = Registry::new();
        let record = registry.register("AA:BB:CC:DD:EE:01", "  Asha Rao ").unwrap();
        assert_eq!(record.name, "Asha Rao");
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_registrations() {
        let mut registry = Registry::new();
        registry.register("AA:BB:CC:DD:EE:01", "Asha").unwrap();
        let snapshot = registry.snapshot();

        registry.register("AA:BB:CC:DD:EE:02", "Ben").unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_participants_sorted_by_name() {
        let registry: Registry = [
            ParticipantRecord {
                name: "Zoe".into(),
                device_id: DeviceId::parse("AA:BB:CC:DD:EE:01").unwrap(),
            },
            ParticipantRecord {
                name: "Ben".into(),
                device_id: DeviceId::parse("AA:BB:CC:DD:EE:02").unwrap(),
            },
        ]
        .into_iter()
        .collect();

        let names: Vec<_> = registry.participants().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Ben", "Zoe"]);
    }

    #[test]
    fn test_store_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("data").join("registry.json"));

        let mut registry = Registry::new();
        registry.register("AA:BB:CC:DD:EE:01", "Asha").unwrap();
        store.save(&registry).unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("\"beacon_id\": \"AA:BB:CC:DD:EE:01\""));

        assert_eq!(store.load(), registry);
    }

    #[test]
    fn test_store_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("missing.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_store_load_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(RegistryStore::new(path).load().is_empty());
    }

    #[test]
    fn test_store_load_uses_key_over_embedded_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{ "AA:BB:CC:DD:EE:01": { "name": "Asha", "beacon_id": "11:22:33:44:55:66" } }"#,
        )
        .unwrap();

        let registry = RegistryStore::new(path).load();
        let id = DeviceId::parse("AA:BB:CC:DD:EE:01").unwrap();
        assert_eq!(registry.get(&id).unwrap().device_id, id);
    }

    #[test]
    fn test_store_load_skips_unusable_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{
                "AA:BB:CC:DD:EE:01": { "name": "Asha", "beacon_id": "AA:BB:CC:DD:EE:01" },
                "Pixel 8": { "name": "Ben", "beacon_id": "Pixel 8" },
                "AA:BB:CC:DD:EE:02": { "name": "   ", "beacon_id": "AA:BB:CC:DD:EE:02" }
            }"#,
        )
        .unwrap();

        let store = RegistryStore::new(&path);
        let registry = store.load();

        let names: Vec<_> = registry.participants().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Asha"]);
        let backup = std::fs::read_to_string(store.backup_path()).unwrap();
        assert!(backup.contains("Pixel 8"));
    }

    #[test]
    fn test_store_load_keeps_first_of_colliding_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(
            &path,
            r#"{
                "aa:bb:cc:dd:ee:01": { "name": "Ben" },
                "AA:BB:CC:DD:EE:01": { "name": "Asha" },
                "AA:BB:CC:DD:EE:02": { "name": "Chen" }
            }"#,
        )
        .unwrap();

        let store = RegistryStore::new(&path);
        let registry = store.load();

        assert_eq!(registry.len(), 2);
        let id = DeviceId::parse("AA:BB:CC:DD:EE:01").unwrap();
        assert_eq!(registry.get(&id).unwrap().name, "Asha");
        assert!(store.backup_path().exists());
    }

    #[test]
    fn test_store_load_clean_file_writes_no_backup() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));
        let mut registry = Registry::new();
        registry.register("AA:BB:CC:DD:EE:01", "Asha").unwrap();
        store.save(&registry).unwrap();

        assert_eq!(store.load(), registry);
        assert!(!store.backup_path().exists());
    }

    #[test]
    fn test_service_keeps_registration_when_save_fails() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("registry.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();

        let mut service = RegistrationService::load(RegistryStore::new(&path));
        let outcome = service.register("AA:BB:CC:DD:EE:01", "Asha").unwrap();

        assert!(!outcome.persisted);
        assert!(outcome.warning.is_some());
        assert_eq!(service.registry().len(), 1);
    }

    #[test]
    fn test_service_persists_registration() {
        let dir = TempDir::new().unwrap();
        let store = RegistryStore::new(dir.path().join("registry.json"));
        let mut service = RegistrationService::load(store.clone());

        let outcome = service.register("AA:BB:CC:DD:EE:01", "Asha").unwrap();
        assert!(outcome.persisted);
        assert_eq!(store.load().len(), 1);
    }
}
