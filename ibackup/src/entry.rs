//! Typed view of one row of the `Files` table.

use crate::archive::KeyedArchive;
use crate::date::Date;
use crate::error::{Error, Result};
use crate::keybag::{protection_class_bytes, WRAPPED_KEY_LENGTH};
use crate::paths;
use std::path::{Path, PathBuf};

/// Bytes in front of the wrapped key inside the `EncryptionKey` data object.
const ENCRYPTION_KEY_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    File,
    Directory,
    SymbolicLink,
}

impl FileType {
    pub fn from_flags(flags: i64) -> Result<FileType> {
        match flags {
            1 => Ok(FileType::File),
            2 => Ok(FileType::Directory),
            4 => Ok(FileType::SymbolicLink),
            other => Err(Error::UnknownFileType(other)),
        }
    }

    pub fn flags(&self) -> i64 {
        match self {
            FileType::File => 1,
            FileType::Directory => 2,
            FileType::SymbolicLink => 4,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            FileType::File => "file",
            FileType::Directory => "directory",
            FileType::SymbolicLink => "symlink",
        };
        write!(f, "{}", name)
    }
}

/// A raw database row, before its object graph is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRow {
    pub file_id: String,
    pub domain: String,
    pub relative_path: String,
    pub flags: i64,
    pub file: Vec<u8>,
}

/// A file, directory or symbolic link stored in a container.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub file_id: String,
    pub domain: String,
    pub relative_path: String,
    pub flags: i64,
    file_type: FileType,
    archive: KeyedArchive,
    content_path: Option<PathBuf>,
    size: u64,
    protection_class: u32,
    encryption_key: Option<Vec<u8>>,
    target: Option<String>,
    last_modified: Option<Date>,
    birth: Option<Date>,
    mode: Option<i64>,
}

/// Where the content of `file_id` lives: `<root>/<first two chars>/<file_id>`.
pub fn content_path(root: &Path, file_id: &str) -> Result<PathBuf> {
    let shard = file_id
        .get(..2)
        .filter(|_| file_id.len() > 2)
        .ok_or_else(|| Error::InvalidFormat(format!("invalid file id {:?}", file_id)))?;
    Ok(root.join(shard).join(file_id))
}

fn required_integer(archive: &KeyedArchive, key: &str, file_id: &str) -> Result<i64> {
    archive
        .integer(key)?
        .ok_or_else(|| Error::InvalidFormat(format!("{} has no {}", file_id, key)))
}

impl BackupEntry {
    /// Decode `row`. File entries must have their content blob under `root`.
    pub fn from_row(row: EntryRow, root: &Path, narrow: bool) -> Result<BackupEntry> {
        let file_type = FileType::from_flags(row.flags)?;
        let archive = KeyedArchive::parse(&row.file, narrow)?;

        let mut content = None;
        let mut size = 0;
        let mut protection_class = 0;
        let mut encryption_key = None;
        let mut target = None;

        match file_type {
            FileType::File => {
                let path = content_path(root, &row.file_id)?;
                if !path.is_file() {
                    return Err(Error::MissingContent(row.file_id));
                }
                content = Some(path);

                size = u64::try_from(required_integer(&archive, "Size", &row.file_id)?)
                    .map_err(|_| Error::InvalidFormat(format!("{} has a negative size", row.file_id)))?;
                protection_class =
                    u32::try_from(required_integer(&archive, "ProtectionClass", &row.file_id)?)
                        .map_err(|_| {
                            Error::InvalidFormat(format!("{} has an invalid protection class", row.file_id))
                        })?;

                if protection_class != 0 {
                    let key = archive
                        .referenced_dictionary("EncryptionKey")?
                        .ok_or_else(|| {
                            Error::InvalidFormat(format!("{} is encrypted but has no key", row.file_id))
                        })?;
                    let data = key
                        .get("NS.data")
                        .and_then(|value| value.as_data())
                        .ok_or_else(|| {
                            Error::InvalidFormat(format!("{} has a malformed encryption key", row.file_id))
                        })?;
                    let end = ENCRYPTION_KEY_PREFIX + WRAPPED_KEY_LENGTH;
                    if data.len() < end {
                        return Err(Error::InvalidKeyLength {
                            expected: WRAPPED_KEY_LENGTH,
                            actual: data.len().saturating_sub(ENCRYPTION_KEY_PREFIX),
                        });
                    }
                    encryption_key = Some(data[ENCRYPTION_KEY_PREFIX..end].to_vec());
                }
            }
            FileType::SymbolicLink => {
                target = Some(
                    archive
                        .referenced_string("Target")?
                        .ok_or_else(|| Error::MissingSymlinkTarget(row.file_id.clone()))?
                        .to_string(),
                );
            }
            FileType::Directory => {}
        }

        let last_modified = archive.integer("LastModified")?.map(Date::from_seconds);
        let birth = archive.integer("Birth")?.map(Date::from_seconds);
        let mode = archive.integer("Mode")?;

        Ok(BackupEntry {
            file_id: row.file_id,
            domain: row.domain,
            relative_path: row.relative_path,
            flags: row.flags,
            file_type,
            archive,
            content_path: content,
            size,
            protection_class,
            encryption_key,
            target,
            last_modified,
            birth,
            mode,
        })
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn archive(&self) -> &KeyedArchive {
        &self.archive
    }

    pub fn content_path(&self) -> Option<&Path> {
        self.content_path.as_deref()
    }

    /// Plaintext size in bytes. Zero for directories and links.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn protection_class(&self) -> u32 {
        self.protection_class
    }

    /// The protection class in the byte form used to look up class keys.
    pub fn protection_class_bytes(&self) -> [u8; 4] {
        protection_class_bytes(self.protection_class)
    }

    pub fn is_encrypted(&self) -> bool {
        self.protection_class != 0
    }

    /// The wrapped per-file key.
    pub fn encryption_key(&self) -> Option<&[u8]> {
        self.encryption_key.as_deref()
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn last_modified(&self) -> Option<Date> {
        self.last_modified
    }

    pub fn birth(&self) -> Option<Date> {
        self.birth
    }

    pub fn mode(&self) -> Option<i64> {
        self.mode
    }

    pub fn file_name(&self) -> &str {
        paths::file_name(&self.relative_path)
    }

    pub fn file_extension(&self) -> &str {
        paths::file_extension(&self.relative_path)
    }

    pub fn parent_path(&self) -> &str {
        paths::parent_path(&self.relative_path)
    }

    pub fn path_level(&self) -> usize {
        paths::path_level(&self.relative_path)
    }

    pub fn is_domain_root(&self) -> bool {
        self.relative_path.is_empty()
    }

    pub(crate) fn apply_update(&mut self, archive: KeyedArchive, size: u64) {
        self.archive = archive;
        self.size = size;
    }
}

impl std::fmt::Display for BackupEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}-{}", self.domain, self.relative_path)
    }
}
