//! A backup container on disk.
//!
//! ```text
//! <root>/
//!   Manifest.plist        top-level manifest, embeds the key bag when encrypted
//!   Manifest.db           metadata database, encrypted with the manifest key
//!   Info.plist            optional device information
//!   ab/ab12...            content blobs, sharded by the first two characters
//!   _BackupExplorer/      snapshots taken before any edit
//! ```
//!
//! An encrypted container is read through a decrypted working copy of
//! `Manifest.db` in a temporary file. Edits land in that copy and only reach the
//! container once [`Backup::re_encrypt_database`] runs.

use crate::config::BackupConfig;
use crate::database::ManifestDatabase;
use crate::entry::{BackupEntry, EntryRow, FileType};
use crate::error::{Error, IoResultExt, Result};
use crate::info::BackupInfo;
use crate::keybag::{protection_class_bytes, KeyBag};
use crate::manifest::{Manifest, ManifestKey};
use crate::padding;
use crate::paths;
use crate::recovery;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info, warn};

pub const MANIFEST_DB: &str = "Manifest.db";
pub const MANIFEST_PLIST: &str = "Manifest.plist";
pub const INFO_PLIST: &str = "Info.plist";

/// The plaintext database the queries run against.
#[derive(Debug)]
enum WorkingDatabase {
    /// The container's own `Manifest.db` (unencrypted containers).
    InPlace(PathBuf),
    /// A decrypted copy, deleted on clean up.
    Decrypted(TempPath),
}

impl WorkingDatabase {
    fn path(&self) -> &Path {
        match self {
            WorkingDatabase::InPlace(path) => path,
            WorkingDatabase::Decrypted(path) => path,
        }
    }
}

#[derive(Debug)]
pub struct Backup {
    pub directory: PathBuf,
    pub manifest: Manifest,
    pub info: Option<BackupInfo>,
    config: BackupConfig,
    working: Option<WorkingDatabase>,
    connection: Option<ManifestDatabase>,
}

fn require_file(path: PathBuf) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        ))
    }
}

impl Backup {
    pub fn open<P: AsRef<Path>>(directory: P, config: BackupConfig) -> Result<Backup> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(Error::io(
                directory,
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
            ));
        }
        let database = require_file(directory.join(MANIFEST_DB))?;
        let manifest = Manifest::from_file(&require_file(directory.join(MANIFEST_PLIST))?)?;

        let info_path = directory.join(INFO_PLIST);
        let info = if info_path.is_file() {
            match BackupInfo::from_file(&info_path) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(path = %info_path.display(), "ignoring unreadable device info: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let working = if manifest.encrypted {
            None
        } else {
            Some(WorkingDatabase::InPlace(database))
        };

        debug!(
            path = %directory.display(),
            device = %manifest.device_name,
            encrypted = manifest.encrypted,
            "opened backup"
        );
        Ok(Backup {
            directory,
            manifest,
            info,
            config,
            working,
            connection: None,
        })
    }

    /// Every readable container directly under `root`, newest first.
    pub fn discover<P: AsRef<Path>>(root: P, config: &BackupConfig) -> Result<Vec<Backup>> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut backups = Vec::new();
        for dir_entry in std::fs::read_dir(root).at_path(root)? {
            let path = dir_entry.at_path(root)?.path();
            if !path.is_dir() {
                continue;
            }
            match Backup::open(&path, config.clone()) {
                Ok(backup) => backups.push(backup),
                Err(Error::Io { .. }) => debug!(path = %path.display(), "not a backup"),
                Err(e) => warn!(path = %path.display(), "skipping unreadable backup: {}", e),
            }
        }
        backups.sort_by(|a, b| b.manifest.date.cmp(&a.manifest.date));
        Ok(backups)
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn database_path(&self) -> PathBuf {
        self.directory.join(MANIFEST_DB)
    }

    pub fn recovery_dir(&self) -> PathBuf {
        self.directory.join(&self.config.recovery_dir_name)
    }

    pub fn is_encrypted(&self) -> bool {
        self.manifest.encrypted
    }

    pub fn is_locked(&self) -> bool {
        self.manifest
            .key_bag()
            .map(KeyBag::is_locked)
            .unwrap_or(false)
    }

    pub fn key_bag(&self) -> Option<&KeyBag> {
        self.manifest.key_bag()
    }

    fn manifest_key(&self) -> Result<(&KeyBag, &ManifestKey)> {
        let key_bag = self
            .manifest
            .key_bag()
            .ok_or_else(|| Error::InvalidFormat("backup has no key bag".to_string()))?;
        let key = self
            .manifest
            .manifest_key
            .as_ref()
            .ok_or_else(|| Error::InvalidFormat("backup has no manifest key".to_string()))?;
        Ok((key_bag, key))
    }

    /// Unlock the key bag with `passcode` and decrypt the database.
    ///
    /// A no-op for unencrypted containers.
    pub fn unlock(&mut self, passcode: &str) -> Result<()> {
        if !self.is_encrypted() {
            return Ok(());
        }
        let unlocked = self
            .manifest
            .key_bag_mut()
            .ok_or_else(|| Error::InvalidFormat("backup has no key bag".to_string()))?
            .unlock(passcode);
        if unlocked.is_err() {
            // The bag forgot its keys; so does the working copy.
            self.clean_up();
        }
        unlocked?;
        info!(device = %self.manifest.device_name, "backup unlocked");
        self.decrypt_database()
    }

    /// Decrypt `Manifest.db` into a fresh working copy.
    pub fn decrypt_database(&mut self) -> Result<()> {
        if !self.is_encrypted() {
            return Ok(());
        }
        if self.is_locked() {
            return Err(Error::NotUnlocked);
        }
        self.close_connection();

        let builder = {
            let mut builder = tempfile::Builder::new();
            builder.prefix("decrypted-manifest").suffix(".sqlite3");
            builder
        };
        let temp = match &self.config.temp_dir {
            Some(dir) => builder.tempfile_in(dir).at_path(dir)?,
            None => builder.tempfile().at_path(std::env::temp_dir())?,
        };
        let temp = temp.into_temp_path();

        let source = self.database_path();
        let (key_bag, key) = self.manifest_key()?;
        key_bag.decrypt_file(
            &protection_class_bytes(key.protection_class),
            &key.wrapped_key,
            &source,
            &temp,
            None,
        )?;
        if padding::try_fix_padding(&temp)? {
            info!("removed legacy padding from the decrypted database");
        }

        debug!(path = %temp.display(), "decrypted manifest database");
        self.discard_working_copy();
        self.working = Some(WorkingDatabase::Decrypted(temp));
        Ok(())
    }

    /// Open the working database. Fails with [`Error::NoConnection`] while an
    /// encrypted container has not been unlocked.
    pub fn connect(&mut self) -> Result<()> {
        let path = match &self.working {
            Some(working) => working.path().to_path_buf(),
            None => return Err(Error::NoConnection),
        };
        self.close_connection();
        self.connection = Some(ManifestDatabase::open(&path)?);
        info!(
            device = %self.manifest.device_name,
            "connected to the backup database"
        );
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// The open connection, reconnecting once if there is none.
    pub fn database(&mut self) -> Result<&ManifestDatabase> {
        if self.connection.is_none() {
            self.connect()?;
        }
        self.connection.as_ref().ok_or(Error::NoConnection)
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close() {
                warn!("closing the database connection failed: {}", e);
            }
        }
    }

    fn discard_working_copy(&mut self) {
        if let Some(WorkingDatabase::Decrypted(path)) = self.working.take() {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                warn!(path = %shown, "could not delete temporary database: {}", e);
            }
        }
    }

    /// Close the connection and delete the decrypted working copy.
    ///
    /// Safe to call any number of times, also on a container that was never unlocked.
    pub fn clean_up(&mut self) {
        self.close_connection();
        if matches!(self.working, Some(WorkingDatabase::Decrypted(_))) {
            self.discard_working_copy();
            debug!(path = %self.directory.display(), "cleaned up");
        }
    }

    /// Encrypt the working database back over `Manifest.db`.
    ///
    /// The previous `Manifest.db` is kept in the recovery directory first.
    pub fn re_encrypt_database(&mut self) -> Result<()> {
        if !self.is_encrypted() {
            return Ok(());
        }
        let working = match &self.working {
            Some(WorkingDatabase::Decrypted(path)) if path.is_file() => path.to_path_buf(),
            _ => return Err(Error::NoConnection),
        };

        let database = self.database_path();
        let saved = recovery::backup_file(&self.recovery_dir(), &database, MANIFEST_DB)?;
        info!(backup = %saved.display(), "saved encrypted database");

        self.close_connection();

        let mut staged = tempfile::NamedTempFile::new_in(&self.directory).at_path(&self.directory)?;
        {
            let (key_bag, key) = self.manifest_key()?;
            let input = File::open(&working).at_path(&working)?;
            key_bag.encrypt_stream(
                &protection_class_bytes(key.protection_class),
                &key.wrapped_key,
                BufReader::new(input),
                BufWriter::new(staged.as_file_mut()),
            )?;
        }
        staged
            .persist(&database)
            .map_err(|e| Error::io(&database, e.error))?;

        debug!(path = %database.display(), "re-encrypted manifest database");
        self.connect()
    }

    fn entries(&self, rows: Vec<EntryRow>) -> Result<Vec<BackupEntry>> {
        rows.into_iter()
            .map(|row| BackupEntry::from_row(row, &self.directory, self.config.narrow_reference_resolution))
            .collect()
    }

    pub fn search_entries(&mut self, domain_like: &str, path_like: &str) -> Result<Vec<BackupEntry>> {
        let rows = self.database()?.search(domain_like, path_like)?;
        self.entries(rows)
    }

    pub fn domain_roots(&mut self) -> Result<Vec<BackupEntry>> {
        let rows = self.database()?.domain_roots()?;
        self.entries(rows)
    }

    pub fn domain_entries(&mut self, with_root: bool, domains: &[&str]) -> Result<Vec<BackupEntry>> {
        let rows = self.database()?.domain_entries(with_root, domains)?;
        self.entries(rows)
    }

    /// Every descendant of `path` in `domain`, not including `path` itself.
    pub fn entries_under(&mut self, domain: &str, path: &str) -> Result<Vec<BackupEntry>> {
        let rows = self.database()?.entries_under(domain, path)?;
        self.entries(rows)
    }

    pub fn find_entry(&mut self, file_id: &str) -> Result<BackupEntry> {
        let row = self
            .database()?
            .find(file_id)?
            .ok_or_else(|| Error::EntryNotFound(file_id.to_string()))?;
        BackupEntry::from_row(row, &self.directory, self.config.narrow_reference_resolution)
    }

    /// Store the object graph of `entry` back into its database row.
    pub fn update_file_info(&mut self, file_id: &str, archive: &crate::archive::KeyedArchive) -> Result<()> {
        let data = archive.to_binary()?;
        self.database()?.update_file(file_id, &data)?;
        debug!(file_id, "updated record");
        Ok(())
    }

    /// Remove the row of `file_id`. Nothing else is touched.
    pub fn delete_file_info(&mut self, file_id: &str) -> Result<()> {
        self.database()?.delete_file(file_id)?;
        debug!(file_id, "deleted record");
        Ok(())
    }

    /// Write the plaintext of `entry` to `destination`.
    pub fn extract_entry(&self, entry: &BackupEntry, destination: &Path) -> Result<()> {
        match entry.file_type() {
            FileType::Directory => {
                std::fs::create_dir_all(destination).at_path(destination)?;
            }
            FileType::File => {
                let source = entry
                    .content_path()
                    .ok_or_else(|| Error::MissingContent(entry.file_id.clone()))?;
                if entry.is_encrypted() {
                    let key_bag = self.key_bag().ok_or_else(|| {
                        Error::InvalidFormat(format!("{} is encrypted in an unencrypted backup", entry))
                    })?;
                    let key = entry
                        .encryption_key()
                        .ok_or_else(|| Error::InvalidFormat(format!("{} has no encryption key", entry)))?;
                    key_bag.decrypt_file(
                        &entry.protection_class_bytes(),
                        key,
                        source,
                        destination,
                        Some(entry.size()),
                    )?;
                } else {
                    std::fs::copy(source, destination).at_path(destination)?;
                }
            }
            FileType::SymbolicLink => {
                let target = entry
                    .target()
                    .ok_or_else(|| Error::MissingSymlinkTarget(entry.file_id.clone()))?;
                create_symlink(target, destination)?;
            }
        }
        debug!(entry = %entry, destination = %destination.display(), "extracted");
        Ok(())
    }

    /// Extract `entry` below `folder`, either at `domain/relativePath` or by file
    /// name alone. Returns the destination.
    ///
    /// An existing destination is an [`Error::AlreadyExists`] conflict unless the
    /// entry is a directory.
    pub fn extract_entry_to_folder(
        &self,
        entry: &BackupEntry,
        folder: &Path,
        with_relative_path: bool,
    ) -> Result<PathBuf> {
        let destination = extract_destination(entry, folder, with_relative_path)?;
        let exists = destination.symlink_metadata().is_ok();
        if exists && entry.file_type() != FileType::Directory {
            return Err(Error::AlreadyExists(destination));
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).at_path(parent)?;
        }
        self.extract_entry(entry, &destination)?;
        Ok(destination)
    }
}

impl Drop for Backup {
    fn drop(&mut self) {
        self.clean_up();
    }
}

/// Destination path of `entry` when extracted below `folder`.
///
/// Every name taken from the database must stay a plain component of the
/// destination; `..` and the like are an [`Error::InvalidFormat`].
pub fn extract_destination(entry: &BackupEntry, folder: &Path, with_relative_path: bool) -> Result<PathBuf> {
    let component = |name: &str| {
        paths::safe_component(name).ok_or_else(|| {
            Error::InvalidFormat(format!("unsafe path component {:?} in {}", name, entry))
        })
    };
    if with_relative_path {
        let mut destination = folder.join(component(&entry.domain)?);
        for name in entry.relative_path.split(paths::SEPARATOR).filter(|c| !c.is_empty()) {
            destination.push(component(name)?);
        }
        Ok(destination)
    } else if entry.relative_path.is_empty() {
        Ok(folder.to_path_buf())
    } else {
        Ok(folder.join(component(entry.file_name())?))
    }
}

#[cfg(unix)]
fn create_symlink(target: &str, destination: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, destination).at_path(destination)
}

#[cfg(not(unix))]
fn create_symlink(target: &str, _destination: &Path) -> Result<()> {
    Err(Error::UnsupportedOperation(format!(
        "cannot create a symbolic link to {} on this platform",
        target
    )))
}
