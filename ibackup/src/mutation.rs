//! Replacing and deleting entries.
//!
//! Both operations snapshot the entry first (see [`crate::recovery`]). A replace
//! stages the new blob next to the old one and only moves it into place after
//! the database row has been written, so a failure at any step leaves either the
//! old row and old blob, or a restored row and the old blob.
//!
//! On an encrypted container the edits land in the decrypted working database;
//! call [`Backup::re_encrypt_database`] once after a batch of mutations.

use crate::archive::KeyedArchive;
use crate::backup::Backup;
use crate::entry::{BackupEntry, FileType};
use crate::error::{Error, IoResultExt, Result};
use crate::recovery::{Snapshot, Transaction};
use filetime::FileTime;
use plist::Value;
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// New blob for an entry, not yet moved into place.
struct StagedContent {
    file: NamedTempFile,
    size: u64,
    digest: [u8; 20],
}

fn sha1_file(path: &Path) -> Result<[u8; 20]> {
    let mut hasher = Sha1::new();
    let mut file = File::open(path).at_path(path)?;
    std::io::copy(&mut file, &mut hasher).at_path(path)?;
    Ok(hasher.finalize().into())
}

impl Backup {
    /// Replace the content of the file `entry` with the file at `source`.
    ///
    /// Encrypted entries are re-encrypted under their existing per-file key.
    /// `Size` and, when present, `Digest` are updated, and `entry` reflects the
    /// new record on success.
    pub fn replace_entry(&mut self, entry: &mut BackupEntry, source: &Path) -> Result<Snapshot> {
        if entry.file_type() != FileType::File {
            return Err(Error::UnsupportedOperation(format!(
                "cannot replace the {} {}",
                entry.file_type(),
                entry
            )));
        }
        let metadata = std::fs::metadata(source).at_path(source)?;
        if !metadata.is_file() {
            return Err(Error::UnsupportedOperation(format!(
                "replacement {} is not a regular file",
                source.display()
            )));
        }
        let content_path = entry
            .content_path()
            .ok_or_else(|| Error::MissingContent(entry.file_id.clone()))?
            .to_path_buf();

        let transaction = Transaction::begin(&self.recovery_dir(), entry, false)?;

        let staged = match self.stage_content(entry, source, &content_path, &metadata) {
            Ok(staged) => staged,
            Err(e) => {
                warn!(file_id = %entry.file_id, "replacement failed before any change: {}", e);
                return Err(e);
            }
        };

        let archive = match updated_archive(entry.archive(), staged.size, &staged.digest)
            .and_then(|archive| self.update_file_info(&entry.file_id, &archive).map(|_| archive))
        {
            Ok(archive) => archive,
            Err(e) => {
                self.roll_back(transaction);
                return Err(e);
            }
        };

        if let Err(e) = staged.file.persist(&content_path) {
            self.roll_back(transaction);
            return Err(Error::io(&content_path, e.error));
        }

        entry.apply_update(archive, staged.size);
        info!(file_id = %entry.file_id, size = staged.size, "replaced content");
        Ok(transaction.commit())
    }

    fn roll_back(&mut self, transaction: Transaction) {
        let result = self.database().and_then(|database| transaction.abort(database));
        if let Err(e) = result {
            warn!("could not restore the database row, the snapshot is still available: {}", e);
        }
    }

    /// Write the new blob for `entry` into a temporary file beside `content_path`.
    fn stage_content(
        &self,
        entry: &BackupEntry,
        source: &Path,
        content_path: &Path,
        metadata: &std::fs::Metadata,
    ) -> Result<StagedContent> {
        let dir = content_path
            .parent()
            .ok_or_else(|| Error::MissingContent(entry.file_id.clone()))?;
        let mut file = NamedTempFile::new_in(dir).at_path(dir)?;
        let input = BufReader::new(File::open(source).at_path(source)?);

        if entry.is_encrypted() {
            let key_bag = self.key_bag().ok_or_else(|| {
                Error::InvalidFormat(format!("{} is encrypted in an unencrypted backup", entry))
            })?;
            let key = entry
                .encryption_key()
                .ok_or_else(|| Error::InvalidFormat(format!("{} has no encryption key", entry)))?;
            key_bag.encrypt_stream(
                &entry.protection_class_bytes(),
                key,
                input,
                BufWriter::new(file.as_file_mut()),
            )?;
        } else {
            let mut input = input;
            std::io::copy(&mut input, file.as_file_mut()).at_path(file.path())?;
            let accessed = FileTime::from_last_access_time(metadata);
            let modified = FileTime::from_last_modification_time(metadata);
            filetime::set_file_times(file.path(), accessed, modified).at_path(file.path())?;
        }

        let digest = sha1_file(file.path())?;
        Ok(StagedContent {
            file,
            size: metadata.len(),
            digest,
        })
    }

    /// Remove the row of `entry` after saving a snapshot.
    ///
    /// Directories are not deleted recursively; remove the descendants listed by
    /// [`Backup::entries_under`] first.
    pub fn delete_entry(&mut self, entry: &BackupEntry) -> Result<Snapshot> {
        let transaction = Transaction::begin(&self.recovery_dir(), entry, true)?;
        self.delete_file_info(&entry.file_id)?;
        info!(file_id = %entry.file_id, "deleted entry");
        Ok(transaction.commit())
    }
}

/// `archive` with `Size` set and the `Digest` object, if any, replaced.
fn updated_archive(archive: &KeyedArchive, size: u64, digest: &[u8; 20]) -> Result<KeyedArchive> {
    let mut archive = archive.clone();
    archive.set_property("Size", Value::Integer(size.into()))?;
    archive.set_referenced("Digest", Value::Data(digest.to_vec()))?;
    Ok(archive)
}
