use std::path::Path;

use crate::error::{Error, Result};
use crate::utils;

use ibackup::{export_entries, Backup, BackupEntry, ExportDecision, ExportObserver, FileType};
use tracing::debug;

fn print_entry(entry: &BackupEntry) {
    let size = match entry.file_type() {
        FileType::File => utils::format_size(entry.size()),
        _ => "-".to_string(),
    };
    let modified = entry
        .last_modified()
        .map_or("N/A".to_string(), |d| d.to_string());
    let suffix = match entry.target() {
        Some(target) => format!(" -> {}", target),
        None => String::new(),
    };
    println!(
        "{:<9} {:>10}  {}  {}{}  [{}]",
        entry.file_type().to_string(),
        size,
        modified,
        entry.relative_path,
        suffix,
        entry.file_id
    );
}

fn print_entries(entries: &[BackupEntry]) {
    if entries.is_empty() {
        println!("No entries found.");
        return;
    }
    for entry in entries {
        print_entry(entry);
    }
    println!("\n{} entries", entries.len());
}

pub fn list(backup: &mut Backup, domain: &str, relative_path: Option<&str>) -> Result<()> {
    let path = relative_path.unwrap_or("");
    println!("Entries for {}/{}\n----------------", domain, path);
    let entries = backup.entries_under(domain, path)?;
    print_entries(&entries);
    Ok(())
}

pub fn search(backup: &mut Backup, domain_like: &str, path_like: &str) -> Result<()> {
    println!("Search results\n--------------");
    let entries = backup.search_entries(domain_like, path_like)?;
    print_entries(&entries);
    Ok(())
}

/// Answers export questions from the command line flags.
struct CliObserver {
    on_existing: ExportDecision,
    conflict: Option<String>,
}

impl ExportObserver for CliObserver {
    fn on_progress(&mut self, done: usize, total: usize) {
        debug!(done, total, "export progress");
    }

    fn on_conflict(&mut self, _entry: &BackupEntry, destination: &Path) -> ExportDecision {
        if self.on_existing == ExportDecision::Cancel {
            self.conflict = Some(destination.display().to_string());
        }
        self.on_existing
    }

    fn on_error(&mut self, entry: &BackupEntry, error: &ibackup::Error) -> ExportDecision {
        eprintln!("Could not extract {}: {}", entry, error);
        ExportDecision::Proceed
    }
}

/// The entries selected by the `extract` flags.
fn select_entries(backup: &mut Backup, cmd: &clap::ArgMatches) -> Result<Vec<BackupEntry>> {
    if let Some(file_id) = cmd.value_of("file-id") {
        return Ok(vec![backup.find_entry(file_id)?]);
    }
    let domains: Vec<&str> = cmd.values_of("domain").map(|v| v.collect()).unwrap_or_default();
    match cmd.value_of("relative-path") {
        Some(path) => match domains.as_slice() {
            [domain] => {
                let path = path.trim_end_matches(ibackup::paths::SEPARATOR);
                let mut entries = backup.search_entries(domain, &ibackup::paths::escape_like(path))?;
                entries.retain(|e| e.domain == *domain && e.relative_path == path);
                entries.extend(backup.entries_under(domain, path)?);
                Ok(entries)
            }
            _ => Err(Error::CliInputError(
                "--relative-path needs exactly one --domain.".to_string(),
            )),
        },
        None if domains.is_empty() => Err(Error::CliInputError(
            "Choose what to extract with --domain or --file-id.".to_string(),
        )),
        None => Ok(backup.domain_entries(true, &domains)?),
    }
}

pub fn extract(backup: &mut Backup, cmd: &clap::ArgMatches) -> Result<()> {
    let destination = Path::new(cmd.value_of("destination").unwrap_or("."));
    let entries = select_entries(backup, cmd)?;
    if entries.is_empty() {
        return Err(Error::NotFound("no entries match the selection".to_string()));
    }

    let on_existing = if cmd.is_present("skip-existing") {
        ExportDecision::SkipAll
    } else if cmd.is_present("overwrite") {
        ExportDecision::Proceed
    } else {
        ExportDecision::Cancel
    };
    let mut observer = CliObserver {
        on_existing,
        conflict: None,
    };

    let report = export_entries(backup, &entries, destination, !cmd.is_present("flat"), &mut observer);
    println!(
        "Extracted {} entries to {} ({} skipped, {} failed)",
        report.exported.len(),
        destination.display(),
        report.skipped.len(),
        report.failures.len()
    );

    match observer.conflict {
        Some(path) if report.cancelled => Err(Error::Conflict(path)),
        _ => Ok(()),
    }
}
