//! Filesystem locations and write helpers shared by the registry and reporter.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Get the default data directory.
///
/// On Linux: `/var/lib/rollcall/`
/// Elsewhere: the platform data directory (e.g. `~/Library/Application Support/rollcall`).
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/rollcall")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "rollcall")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

/// Default location of the participant registry file.
#[must_use]
pub fn default_registry_path() -> PathBuf {
    default_data_dir().join("registered_participants.json")
}

/// Write `contents` to `path` by writing a sibling temp file and renaming it.
///
/// Readers never observe a half-written file. Parent directories must exist.
///
/// # Errors
///
/// Returns the underlying I/O error from the write, sync, or rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map_or_else(|| "data".into(), |name| name.to_string_lossy().into_owned());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths_are_non_empty() {
        assert!(!default_data_dir().as_os_str().is_empty());
        assert!(default_registry_path().ends_with("registered_participants.json"));
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join(".registry.json.tmp").exists());
    }

    #[test]
    fn test_write_atomic_fails_without_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("registry.json");
        assert!(write_atomic(&path, b"data").is_err());
    }
}
