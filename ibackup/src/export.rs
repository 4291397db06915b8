//! Batch extraction.
//!
//! [`export_entries`] extracts a list of entries below a folder and hands every
//! decision it cannot make itself to an [`ExportObserver`]: what to do about an
//! existing destination, whether to go on after a failed item, and whether the
//! user has cancelled. One failing entry never aborts the rest of the batch.

use crate::backup::Backup;
use crate::entry::{BackupEntry, FileType};
use crate::error::{Error, IoResultExt, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDecision {
    /// Overwrite the existing destination, or go on after an error.
    Proceed,
    Skip,
    /// Skip this and every later conflict without asking again.
    SkipAll,
    Cancel,
}

pub trait ExportObserver {
    fn on_progress(&mut self, _done: usize, _total: usize) {}

    /// Checked before every entry.
    fn is_cancelled(&self) -> bool {
        false
    }

    fn on_conflict(&mut self, _entry: &BackupEntry, _destination: &Path) -> ExportDecision {
        ExportDecision::Skip
    }

    fn on_error(&mut self, _entry: &BackupEntry, _error: &Error) -> ExportDecision {
        ExportDecision::Proceed
    }
}

/// An observer that accepts every default.
#[derive(Debug, Default)]
pub struct SilentObserver;

impl ExportObserver for SilentObserver {}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub exported: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<(String, Error)>,
    pub cancelled: bool,
}

fn overwrite(backup: &Backup, entry: &BackupEntry, destination: &Path) -> Result<()> {
    if destination.is_dir() && !destination.is_symlink() {
        if entry.file_type() != FileType::Directory {
            std::fs::remove_dir_all(destination).at_path(destination)?;
        }
    } else {
        std::fs::remove_file(destination).at_path(destination)?;
    }
    backup.extract_entry(entry, destination)
}

/// Extract `entries` below `folder`. See [`Backup::extract_entry_to_folder`].
pub fn export_entries(
    backup: &Backup,
    entries: &[BackupEntry],
    folder: &Path,
    with_relative_path: bool,
    observer: &mut dyn ExportObserver,
) -> ExportReport {
    let mut report = ExportReport::default();
    let mut skip_conflicts = false;
    let total = entries.len();

    for (i, entry) in entries.iter().enumerate() {
        if observer.is_cancelled() {
            report.cancelled = true;
            break;
        }

        let result = match backup.extract_entry_to_folder(entry, folder, with_relative_path) {
            Err(Error::AlreadyExists(destination)) => {
                let decision = if skip_conflicts {
                    ExportDecision::Skip
                } else {
                    observer.on_conflict(entry, &destination)
                };
                match decision {
                    ExportDecision::Proceed => {
                        overwrite(backup, entry, &destination).map(|_| Some(destination))
                    }
                    ExportDecision::Skip | ExportDecision::SkipAll => {
                        skip_conflicts |= decision == ExportDecision::SkipAll;
                        debug!(destination = %destination.display(), "skipping existing file");
                        report.skipped.push(destination);
                        Ok(None)
                    }
                    ExportDecision::Cancel => {
                        report.cancelled = true;
                        break;
                    }
                }
            }
            other => other.map(Some),
        };

        match result {
            Ok(Some(destination)) => report.exported.push(destination),
            Ok(None) => {}
            Err(e) => {
                warn!(entry = %entry, "export failed: {}", e);
                let decision = observer.on_error(entry, &e);
                report.failures.push((entry.file_id.clone(), e));
                if decision == ExportDecision::Cancel {
                    report.cancelled = true;
                    break;
                }
            }
        }

        observer.on_progress(i + 1, total);
    }

    report
}
