mod common;

use common::{file_id, sample, FixtureBuilder, DEVICE_NAME, PASSCODE};
use ibackup::export::SilentObserver;
use ibackup::{
    export_entries, Backup, BackupConfig, BackupEntry, Error, ErrorKind, ExportDecision, ExportObserver, FileType,
};
use std::path::Path;

const NOTES: &str = "AppDomain-com.example.notes";

fn open(fixture: &common::Fixture) -> Backup {
    let mut backup = Backup::open(fixture.path(), BackupConfig::default()).unwrap();
    if fixture.encrypted {
        backup.unlock(PASSCODE).unwrap();
    }
    backup
}

fn paths(entries: &[BackupEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.relative_path.as_str()).collect()
}

#[test]
fn test_open_reads_manifest_and_info() {
    let fixture = sample(true);
    let backup = Backup::open(fixture.path(), BackupConfig::default()).unwrap();
    assert!(backup.is_encrypted());
    assert!(backup.is_locked());
    assert!(!backup.is_connected());
    assert_eq!(backup.manifest.device_name, DEVICE_NAME);
    assert_eq!(backup.manifest.product_version, "17.4.1");
    assert_eq!(backup.manifest.manifest_key.as_ref().unwrap().protection_class, 4);
    assert_eq!(backup.info.as_ref().unwrap().product_name, "iPhone 14 Pro");
}

#[test]
fn test_open_rejects_non_backup() {
    let dir = tempfile::tempdir().unwrap();
    let err = Backup::open(dir.path(), BackupConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_locked_backup_has_no_connection() {
    let fixture = sample(true);
    let mut backup = Backup::open(fixture.path(), BackupConfig::default()).unwrap();
    assert!(matches!(backup.domain_roots().unwrap_err(), Error::NoConnection));
    assert!(matches!(backup.decrypt_database().unwrap_err(), Error::NotUnlocked));
}

#[test]
fn test_wrong_passcode_is_rejected() {
    let fixture = sample(true);
    let mut backup = Backup::open(fixture.path(), BackupConfig::default()).unwrap();
    let err = backup.unlock("guess").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCredential);
    assert!(backup.is_locked());
    backup.unlock(PASSCODE).unwrap();
    assert!(!backup.is_locked());

    // A failed re-unlock takes the decrypted database away again.
    backup.connect().unwrap();
    backup.unlock("guess").unwrap_err();
    assert!(backup.is_locked());
    assert!(!backup.is_connected());
    assert!(matches!(backup.connect().unwrap_err(), Error::NoConnection));
}

#[test]
fn test_unencrypted_backup_needs_no_unlock() {
    let fixture = sample(false);
    let mut backup = Backup::open(fixture.path(), BackupConfig::default()).unwrap();
    assert!(!backup.is_locked());
    backup.unlock("ignored").unwrap();
    assert_eq!(backup.domain_roots().unwrap().len(), 2);
}

#[test]
fn test_domain_roots() {
    for encrypted in [false, true] {
        let fixture = sample(encrypted);
        let mut backup = open(&fixture);
        let roots = backup.domain_roots().unwrap();
        let domains: Vec<_> = roots.iter().map(|e| e.domain.as_str()).collect();
        assert_eq!(domains, vec![NOTES, "HomeDomain"]);
        assert!(roots.iter().all(|e| e.is_domain_root()));
        assert!(roots.iter().all(|e| e.file_type() == FileType::Directory));
    }
}

#[test]
fn test_entries_under_excludes_look_alike_siblings() {
    let fixture = sample(true);
    let mut backup = open(&fixture);
    let entries = backup.entries_under(NOTES, "Documents").unwrap();
    assert_eq!(
        paths(&entries),
        vec!["Documents/a.txt", "Documents/sub/b.txt", "Documents/sub", "Documents/link"]
    );

    let trailing = backup.entries_under(NOTES, "Documents/").unwrap();
    assert_eq!(paths(&trailing), paths(&entries));

    let nested = backup.entries_under(NOTES, "Documents/sub").unwrap();
    assert_eq!(paths(&nested), vec!["Documents/sub/b.txt"]);

    assert!(backup.entries_under(NOTES, "documents").unwrap().is_empty());
}

#[test]
fn test_entries_under_domain_root() {
    let fixture = sample(false);
    let mut backup = open(&fixture);
    let entries = backup.entries_under(NOTES, "").unwrap();
    assert_eq!(entries.len(), 6);
    assert!(entries.iter().all(|e| !e.is_domain_root()));
}

#[test]
fn test_domain_entries() {
    let fixture = sample(false);
    let mut backup = open(&fixture);
    assert_eq!(backup.domain_entries(true, &["HomeDomain"]).unwrap().len(), 2);
    assert_eq!(backup.domain_entries(false, &["HomeDomain"]).unwrap().len(), 1);
    assert_eq!(backup.domain_entries(true, &["HomeDomain", NOTES]).unwrap().len(), 9);
    assert!(backup.domain_entries(true, &[]).unwrap().is_empty());
}

#[test]
fn test_search_entries() {
    let fixture = sample(true);
    let mut backup = open(&fixture);
    let found = backup.search_entries("%", "%.txt").unwrap();
    assert_eq!(paths(&found), vec!["Documents/a.txt", "Documents/sub/b.txt"]);

    let home = backup.search_entries("Home%", "%").unwrap();
    assert!(home.iter().all(|e| e.domain == "HomeDomain"));
    assert_eq!(home.len(), 2);
}

#[test]
fn test_find_entry_metadata() {
    let fixture = sample(true);
    let mut backup = open(&fixture);

    let file = backup.find_entry(&file_id(NOTES, "Documents/sub/b.txt")).unwrap();
    assert_eq!(file.file_type(), FileType::File);
    assert_eq!(file.size(), 5000);
    assert_eq!(file.protection_class(), common::FILE_CLASS);
    assert!(file.is_encrypted());
    assert_eq!(file.encryption_key().unwrap().len(), 40);
    assert_eq!(file.file_name(), "b.txt");
    assert_eq!(file.file_extension(), "txt");
    assert_eq!(file.parent_path(), "Documents/sub");
    assert_eq!(file.mode(), Some(0o100644));
    assert_eq!(file.last_modified().unwrap().to_string(), "2022-04-15 05:20:00");

    let link = backup.find_entry(&file_id(NOTES, "Documents/link")).unwrap();
    assert_eq!(link.file_type(), FileType::SymbolicLink);
    assert_eq!(link.target(), Some("a.txt"));

    let err = backup.find_entry("0000").unwrap_err();
    assert!(matches!(err, Error::EntryNotFound(_)));
}

#[test]
fn test_missing_blob_fails_the_query() {
    let fixture = FixtureBuilder::new(false)
        .directory("HomeDomain", "")
        .file_without_blob("HomeDomain", "gone.txt")
        .build();
    let mut backup = open(&fixture);
    let err = backup.domain_entries(true, &["HomeDomain"]).unwrap_err();
    assert!(matches!(err, Error::MissingContent(_)));
    assert_eq!(backup.domain_roots().unwrap().len(), 1);
}

#[test]
fn test_extract_entries() {
    for encrypted in [false, true] {
        let fixture = sample(encrypted);
        let mut backup = open(&fixture);
        let out = tempfile::tempdir().unwrap();

        let a = backup.find_entry(&file_id(NOTES, "Documents/a.txt")).unwrap();
        let destination = backup.extract_entry_to_folder(&a, out.path(), true).unwrap();
        assert_eq!(destination, out.path().join(NOTES).join("Documents").join("a.txt"));
        assert_eq!(std::fs::read(&destination).unwrap(), b"alpha");

        let b = backup.find_entry(&file_id(NOTES, "Documents/sub/b.txt")).unwrap();
        let destination = backup.extract_entry_to_folder(&b, out.path(), false).unwrap();
        assert_eq!(destination, out.path().join("b.txt"));
        assert_eq!(std::fs::read(&destination).unwrap(), vec![7u8; 5000]);

        let err = backup.extract_entry_to_folder(&b, out.path(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }
}

#[cfg(unix)]
#[test]
fn test_extract_symlink() {
    let fixture = sample(false);
    let mut backup = open(&fixture);
    let out = tempfile::tempdir().unwrap();
    let link = backup.find_entry(&file_id(NOTES, "Documents/link")).unwrap();
    let destination = backup.extract_entry_to_folder(&link, out.path(), false).unwrap();
    assert_eq!(std::fs::read_link(destination).unwrap(), Path::new("a.txt"));
}

struct Recorder {
    decision: ExportDecision,
    conflicts: usize,
    progress: Vec<(usize, usize)>,
    on_error: ExportDecision,
    errors: Vec<String>,
}

impl ExportObserver for Recorder {
    fn on_progress(&mut self, done: usize, total: usize) {
        self.progress.push((done, total));
    }

    fn on_conflict(&mut self, _entry: &BackupEntry, _destination: &Path) -> ExportDecision {
        self.conflicts += 1;
        self.decision
    }

    fn on_error(&mut self, entry: &BackupEntry, _error: &Error) -> ExportDecision {
        self.errors.push(entry.file_id.clone());
        self.on_error
    }
}

fn recorder(decision: ExportDecision) -> Recorder {
    Recorder {
        decision,
        conflicts: 0,
        progress: Vec::new(),
        on_error: ExportDecision::Proceed,
        errors: Vec::new(),
    }
}

#[cfg(unix)]
#[test]
fn test_export_entries_and_conflicts() {
    let fixture = sample(true);
    let mut backup = open(&fixture);
    let entries = backup.entries_under(NOTES, "Documents").unwrap();
    let out = tempfile::tempdir().unwrap();

    let report = export_entries(&backup, &entries, out.path(), true, &mut SilentObserver);
    assert_eq!(report.exported.len(), 4);
    assert!(report.failures.is_empty());
    assert!(!report.cancelled);

    // Two files and a link conflict; the directory does not.
    let mut skip_all = recorder(ExportDecision::SkipAll);
    let report = export_entries(&backup, &entries, out.path(), true, &mut skip_all);
    assert_eq!(skip_all.conflicts, 1);
    assert_eq!(report.skipped.len(), 3);
    assert_eq!(report.exported.len(), 1);
    assert_eq!(skip_all.progress.last(), Some(&(4, 4)));

    let a = out.path().join(NOTES).join("Documents").join("a.txt");
    std::fs::write(&a, b"changed").unwrap();
    let mut overwrite = recorder(ExportDecision::Proceed);
    let report = export_entries(&backup, &entries, out.path(), true, &mut overwrite);
    assert_eq!(overwrite.conflicts, 3);
    assert_eq!(report.exported.len(), 4);
    assert_eq!(std::fs::read(&a).unwrap(), b"alpha");

    let mut cancel = recorder(ExportDecision::Cancel);
    let report = export_entries(&backup, &entries, out.path(), true, &mut cancel);
    assert!(report.cancelled);
    assert!(report.exported.is_empty());
}

#[test]
fn test_export_continues_after_failed_entry() {
    let fixture = FixtureBuilder::new(true)
        .file("HomeDomain", "a.txt", b"first")
        .file_with_bad_key("HomeDomain", "bad.txt", b"unreadable")
        .file("HomeDomain", "c.txt", b"last")
        .build();
    let mut backup = open(&fixture);
    let entries: Vec<BackupEntry> = ["a.txt", "bad.txt", "c.txt"]
        .iter()
        .map(|p| backup.find_entry(&file_id("HomeDomain", p)).unwrap())
        .collect();
    let bad_id = file_id("HomeDomain", "bad.txt");

    let out = tempfile::tempdir().unwrap();
    let mut keep_going = recorder(ExportDecision::Skip);
    let report = export_entries(&backup, &entries, out.path(), false, &mut keep_going);
    assert!(!report.cancelled);
    assert_eq!(keep_going.errors, vec![bad_id.clone()]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, bad_id);
    assert!(matches!(report.failures[0].1, Error::KeyUnwrapFailed(_)));
    assert_eq!(report.exported, vec![out.path().join("a.txt"), out.path().join("c.txt")]);
    assert_eq!(std::fs::read(out.path().join("c.txt")).unwrap(), b"last");
    assert_eq!(keep_going.progress.last(), Some(&(3, 3)));

    let out = tempfile::tempdir().unwrap();
    let mut stop = recorder(ExportDecision::Skip);
    stop.on_error = ExportDecision::Cancel;
    let report = export_entries(&backup, &entries, out.path(), false, &mut stop);
    assert!(report.cancelled);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.exported, vec![out.path().join("a.txt")]);
    assert!(!out.path().join("c.txt").exists());
}

#[test]
fn test_extraction_stays_inside_folder() {
    let fixture = FixtureBuilder::new(false)
        .file("HomeDomain", "../../escaped.txt", b"outside")
        .file("..", "x.txt", b"outside")
        .file("HomeDomain", "..", b"outside")
        .build();
    let mut backup = open(&fixture);
    let scratch = tempfile::tempdir().unwrap();
    let folder = scratch.path().join("a").join("b");
    std::fs::create_dir_all(&folder).unwrap();

    for (domain, path) in [("HomeDomain", "../../escaped.txt"), ("..", "x.txt")] {
        let entry = backup.find_entry(&file_id(domain, path)).unwrap();
        let err = backup.extract_entry_to_folder(&entry, &folder, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
    let dot_dot = backup.find_entry(&file_id("HomeDomain", "..")).unwrap();
    let err = backup.extract_entry_to_folder(&dot_dot, &folder, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);

    // The flat name of a nested file is still fine.
    let nested = backup.find_entry(&file_id("HomeDomain", "../../escaped.txt")).unwrap();
    let destination = backup.extract_entry_to_folder(&nested, &folder, false).unwrap();
    assert_eq!(destination, folder.join("escaped.txt"));

    assert!(!scratch.path().join("a").join("escaped.txt").exists());
    assert!(!scratch.path().join("escaped.txt").exists());
    assert!(!scratch.path().join("a").join("x.txt").exists());
}

#[test]
fn test_clean_up_is_idempotent() {
    let fixture = sample(true);
    let mut backup = open(&fixture);
    backup.connect().unwrap();
    assert!(backup.is_connected());

    backup.clean_up();
    assert!(!backup.is_connected());
    backup.clean_up();
    assert!(matches!(backup.connect().unwrap_err(), Error::NoConnection));

    let mut never_unlocked = Backup::open(fixture.path(), BackupConfig::default()).unwrap();
    never_unlocked.clean_up();
    never_unlocked.clean_up();
}

#[test]
fn test_decrypted_copy_lives_in_temp_dir() {
    let fixture = sample(true);
    let temp = tempfile::tempdir().unwrap();
    let config = BackupConfig {
        temp_dir: Some(temp.path().to_path_buf()),
        ..BackupConfig::default()
    };
    let mut backup = Backup::open(fixture.path(), config).unwrap();
    backup.unlock(PASSCODE).unwrap();
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    backup.clean_up();
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn test_legacy_padded_database_opens() {
    let fixture = FixtureBuilder::new(true)
        .legacy_padding()
        .directory("HomeDomain", "")
        .file("HomeDomain", "Library/notes.txt", b"old tool")
        .build();
    let mut backup = open(&fixture);
    let entries = backup.entries_under("HomeDomain", "Library").unwrap();
    assert_eq!(paths(&entries), vec!["Library/notes.txt"]);
}

#[test]
fn test_discover_sorts_newest_first() {
    let root = tempfile::tempdir().unwrap();
    for (name, date) in [("older", 1_600_000_000), ("newer", 1_700_000_000)] {
        let dir = root.path().join(name);
        std::fs::create_dir(&dir).unwrap();
        FixtureBuilder::new(false)
            .date(date)
            .directory("HomeDomain", "")
            .build_at(&dir);
    }
    std::fs::create_dir(root.path().join("not-a-backup")).unwrap();
    std::fs::write(root.path().join("stray.txt"), b"x").unwrap();

    let backups = Backup::discover(root.path(), &BackupConfig::default()).unwrap();
    let names: Vec<_> = backups
        .iter()
        .map(|b| b.directory.file_name().unwrap().to_str().unwrap())
        .collect();
    assert_eq!(names, vec!["newer", "older"]);

    let missing = Backup::discover(root.path().join("missing"), &BackupConfig::default()).unwrap();
    assert!(missing.is_empty());
}
