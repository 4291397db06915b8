use crate::error::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the directory, inside a container, that receives pre-mutation snapshots.
pub const DEFAULT_RECOVERY_DIR: &str = "_BackupExplorer";

/// Where the platforms keep their backups, relative to the user's home.
const BACKUP_ROOTS: [&[&str]; 3] = [
    &["AppData", "Roaming", "Apple Computer", "MobileSync", "Backup"],
    &["Apple", "MobileSync", "Backup"],
    &["Library", "Application Support", "MobileSync", "Backup"],
];

/// BackupConfig holds the knobs that change how a container is read and edited.
///
/// It is usually left at its defaults; a JSON file can override any subset:
///
/// ```json
/// { "narrow_reference_resolution": true, "temp_dir": "/var/tmp" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Resolve object references by the first byte of their encoded value only.
    ///
    /// Older tools indexed the object table this way, which breaks once a record
    /// holds more than 256 objects. Off by default.
    pub narrow_reference_resolution: bool,
    pub recovery_dir_name: String,
    /// Directory for the decrypted working copy of the database. The system
    /// temporary directory when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            narrow_reference_resolution: false,
            recovery_dir_name: DEFAULT_RECOVERY_DIR.to_string(),
            temp_dir: None,
        }
    }
}

impl BackupConfig {
    /// Load a BackupConfig from a JSON reader
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load a BackupConfig from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).at_path(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }
}

/// The conventional backup roots under `home` that exist on this machine.
pub fn default_backup_roots(home: &Path) -> Vec<PathBuf> {
    BACKUP_ROOTS
        .iter()
        .map(|parts| parts.iter().fold(home.to_path_buf(), |path, part| path.join(part)))
        .filter(|path| path.is_dir())
        .collect()
}
