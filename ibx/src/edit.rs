use std::path::Path;

use crate::error::Result;

use ibackup::{Backup, FileType};
use tracing::info;

pub fn replace(backup: &mut Backup, file_id: &str, source: &Path) -> Result<()> {
    let mut entry = backup.find_entry(file_id)?;
    let snapshot = backup.replace_entry(&mut entry, source)?;
    backup.re_encrypt_database()?;

    println!("Replaced {} ({} bytes)", entry, entry.size());
    println!("Previous version saved to {}", snapshot.record_path.display());
    if let Some(content) = snapshot.content_path {
        println!("Previous content saved to {}", content.display());
    }
    Ok(())
}

/// Delete `file_id`, and with `recursive` everything below it first.
///
/// The database is re-encrypted once at the end, also after a partial failure.
pub fn delete(backup: &mut Backup, file_id: &str, recursive: bool) -> Result<()> {
    let entry = backup.find_entry(file_id)?;
    let mut targets = Vec::new();
    if recursive && entry.file_type() == FileType::Directory {
        targets = backup.entries_under(&entry.domain, &entry.relative_path)?;
        // Deepest first, so no directory row goes before its children.
        targets.sort_by(|a, b| b.path_level().cmp(&a.path_level()));
    }
    targets.push(entry);

    let mut deleted = 0;
    let mut result = Ok(());
    for target in &targets {
        match backup.delete_entry(target) {
            Ok(snapshot) => {
                info!(file_id = %target.file_id, record = %snapshot.record_path.display(), "deleted");
                deleted += 1;
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    if deleted > 0 {
        backup.re_encrypt_database()?;
    }
    result?;

    println!("Deleted {} entries", deleted);
    Ok(())
}
