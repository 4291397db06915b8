//! Snapshot-before-mutate.
//!
//! Before an entry is replaced or deleted its record and content blob are copied
//! into the container's recovery directory. Names are never reused: the first
//! copy of `x` is `x.bak`, later ones `x.1.bak`, `x.2.bak` and so on.

use crate::database::ManifestDatabase;
use crate::entry::BackupEntry;
use crate::error::{Error, IoResultExt, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// First unused backup name for `base_name` inside `dir`.
pub fn next_backup_path(dir: &Path, base_name: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{}.bak", base_name));
    let mut i = 0u32;
    while candidate.exists() {
        i += 1;
        candidate = dir.join(format!("{}.{}.bak", base_name, i));
    }
    candidate
}

/// Copy `source` into `dir` under the next free backup name.
pub fn backup_file(dir: &Path, source: &Path, base_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).at_path(dir)?;
    let destination = next_backup_path(dir, base_name);
    std::fs::copy(source, &destination).at_path(&destination)?;
    debug!(
        source = %source.display(),
        destination = %destination.display(),
        "backed up file"
    );
    Ok(destination)
}

/// Where the pre-mutation state of one entry was saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub file_id: String,
    pub record_path: PathBuf,
    pub content_path: Option<PathBuf>,
}

/// A mutation of one entry, guarded by a snapshot.
///
/// [`Transaction::begin`] saves the entry before anything changes. The caller
/// then either [`commit`](Transaction::commit)s, or [`abort`](Transaction::abort)s
/// to put the database row back as it was. The snapshot stays on disk either way.
#[derive(Debug)]
pub struct Transaction {
    snapshot: Snapshot,
    record: Vec<u8>,
}

impl Transaction {
    /// Snapshot `entry` into `dir`.
    ///
    /// With `allow_missing_content` a file entry whose blob is gone is only
    /// logged; otherwise it is an error.
    pub fn begin(dir: &Path, entry: &BackupEntry, allow_missing_content: bool) -> Result<Transaction> {
        std::fs::create_dir_all(dir).at_path(dir)?;

        let record = entry.archive().to_binary()?;
        let record_path = next_backup_path(dir, &format!("{}.plist", entry.file_id));
        std::fs::write(&record_path, &record).at_path(&record_path)?;

        let content_path = match entry.content_path() {
            Some(source) if source.is_file() => Some(backup_file(dir, source, &entry.file_id)?),
            Some(source) if !allow_missing_content => {
                return Err(Error::MissingContent(format!(
                    "{} ({})",
                    entry.file_id,
                    source.display()
                )))
            }
            Some(source) => {
                warn!(file_id = %entry.file_id, path = %source.display(), "content file is missing, saving the record only");
                None
            }
            None => None,
        };

        info!(file_id = %entry.file_id, record = %record_path.display(), "saved snapshot");
        Ok(Transaction {
            snapshot: Snapshot {
                file_id: entry.file_id.clone(),
                record_path,
                content_path,
            },
            record,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// The serialized record as it was when the transaction began.
    pub fn original_record(&self) -> &[u8] {
        &self.record
    }

    pub fn commit(self) -> Snapshot {
        debug!(file_id = %self.snapshot.file_id, "committed");
        self.snapshot
    }

    /// Write the original record back into `database`.
    pub fn abort(self, database: &ManifestDatabase) -> Result<Snapshot> {
        warn!(file_id = %self.snapshot.file_id, "rolling back database row");
        database.update_file(&self.snapshot.file_id, &self.record)?;
        Ok(self.snapshot)
    }
}
