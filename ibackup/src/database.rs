//! Queries over the plaintext `Manifest.db`.
//!
//! The database has a single table of interest:
//!
//! ```sql
//! CREATE TABLE Files (fileID TEXT PRIMARY KEY, domain TEXT, relativePath TEXT, flags INTEGER, file BLOB);
//! ```
//!
//! All listings are ordered by `flags`, `domain`, `relativePath` so that files
//! come before directories and links, grouped by domain.

use crate::entry::EntryRow;
use crate::error::{Error, Result};
use crate::paths::{escape_like, SEPARATOR};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Params};
use std::path::{Path, PathBuf};
use tracing::debug;

const SELECT_FILES: &str = "SELECT fileID, domain, relativePath, flags, file FROM Files";
const ORDER: &str = "ORDER BY flags, domain, relativePath";

pub struct ManifestDatabase {
    connection: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for ManifestDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestDatabase").field("path", &self.path).finish()
    }
}

impl ManifestDatabase {
    /// Open an existing database for reading and writing. The file is never created.
    pub fn open(path: &Path) -> Result<ManifestDatabase> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        debug!(path = %path.display(), "opened manifest database");
        Ok(ManifestDatabase {
            connection,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(self) -> Result<()> {
        self.connection.close().map_err(|(_, e)| Error::Database(e))
    }

    fn query_rows<P: Params>(&self, sql: &str, params: P) -> Result<Vec<EntryRow>> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement.query_map(params, |row| {
            Ok(EntryRow {
                file_id: row.get(0)?,
                domain: row.get(1)?,
                relative_path: row.get(2)?,
                flags: row.get(3)?,
                file: row.get(4)?,
            })
        })?;
        let rows = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = rows.len(), "query returned rows");
        Ok(rows)
    }

    /// Rows whose domain and path match the given `LIKE` patterns (`\` escapes).
    pub fn search(&self, domain_like: &str, path_like: &str) -> Result<Vec<EntryRow>> {
        self.query_rows(
            &format!(r"{SELECT_FILES} WHERE domain LIKE ?1 AND relativePath LIKE ?2 ESCAPE '\' {ORDER}"),
            params![domain_like, path_like],
        )
    }

    /// The root row (empty relative path) of every domain.
    pub fn domain_roots(&self) -> Result<Vec<EntryRow>> {
        self.query_rows(
            &format!("{SELECT_FILES} WHERE relativePath = '' ORDER BY domain"),
            [],
        )
    }

    /// Every row of the given domains, optionally without the domain roots.
    pub fn domain_entries(&self, with_root: bool, domains: &[&str]) -> Result<Vec<EntryRow>> {
        if domains.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; domains.len()].join(", ");
        let root_filter = if with_root { "" } else { "AND relativePath <> ''" };
        self.query_rows(
            &format!("{SELECT_FILES} WHERE domain IN ({placeholders}) {root_filter} {ORDER}"),
            params_from_iter(domains.iter()),
        )
    }

    /// Every descendant of `path` inside `domain`.
    ///
    /// `LIKE` is case-insensitive in SQLite, so the escaped pattern is paired with
    /// an exact prefix comparison.
    pub fn entries_under(&self, domain: &str, path: &str) -> Result<Vec<EntryRow>> {
        let path = path.trim_end_matches(SEPARATOR);
        if path.is_empty() {
            return self.domain_entries(false, &[domain]);
        }
        let prefix = format!("{}{}", path, SEPARATOR);
        let pattern = format!("{}%", escape_like(&prefix));
        self.query_rows(
            &format!(
                r"{SELECT_FILES} WHERE domain = ?1 AND relativePath LIKE ?2 ESCAPE '\' AND substr(relativePath, 1, length(?3)) = ?3 {ORDER}"
            ),
            params![domain, pattern, prefix],
        )
    }

    pub fn find(&self, file_id: &str) -> Result<Option<EntryRow>> {
        let mut rows = self.query_rows(&format!("{SELECT_FILES} WHERE fileID = ?1"), params![file_id])?;
        Ok(rows.pop())
    }

    /// Replace the stored object graph of `file_id`.
    pub fn update_file(&self, file_id: &str, file: &[u8]) -> Result<()> {
        let changed = self.connection.execute(
            "UPDATE Files SET file = ?1 WHERE fileID = ?2",
            params![file, file_id],
        )?;
        if changed == 0 {
            return Err(Error::EntryNotFound(file_id.to_string()));
        }
        Ok(())
    }

    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        let changed = self
            .connection
            .execute("DELETE FROM Files WHERE fileID = ?1", params![file_id])?;
        if changed == 0 {
            return Err(Error::EntryNotFound(file_id.to_string()));
        }
        Ok(())
    }
}
