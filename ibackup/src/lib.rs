//! Read, decrypt and edit iOS device backups.
//!
//! A backup is a directory holding a manifest, a metadata database and one blob
//! per backed up file. Encrypted backups protect every blob with its own key,
//! wrapped by a per-protection-class key from the key bag, which in turn is
//! unlocked by the backup passcode.
//!
//! ## Features
//!
//! - [`KeyBag`] parsing, passcode unlock and per-file key unwrap
//! - Streaming AES-256-CBC for content blobs and the metadata database ([`cipher`])
//! - Repair of database copies left padded by older tools ([`padding`])
//! - Keyed-archive record decoding ([`archive`], [`BackupEntry`])
//! - Queries by domain, path and subtree ([`Backup`])
//! - Extraction of single entries and batches ([`export`])
//! - Content replacement and entry deletion with snapshots ([`mutation`], [`recovery`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ibackup::{Backup, BackupConfig};
//! use std::error::Error;
//!
//! fn main() -> Result<(), Box<dyn Error>> {
//!     let mut backup = Backup::open("/path/to/backup", BackupConfig::default())?;
//!     if backup.is_encrypted() {
//!         backup.unlock("passcode")?;
//!     }
//!     for entry in backup.entries_under("HomeDomain", "Library/Preferences")? {
//!         println!("{} ({} bytes)", entry.relative_path, entry.size());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Edits on an encrypted backup go to a decrypted working copy of the database;
//! call [`Backup::re_encrypt_database`] afterwards to write them back.

pub mod archive;
pub mod backup;
pub mod cipher;
pub mod config;
pub mod database;
pub mod date;
pub mod entry;
pub mod error;
pub mod export;
pub mod info;
pub mod keybag;
pub mod manifest;
pub mod mutation;
pub mod padding;
pub mod paths;
pub mod recovery;

pub use crate::backup::Backup;
pub use crate::config::BackupConfig;
pub use crate::entry::{BackupEntry, FileType};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::export::{export_entries, ExportDecision, ExportObserver, ExportReport};
pub use crate::keybag::KeyBag;
