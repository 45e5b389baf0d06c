use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use npkg_domain::records::{PackageSummary, PackageVersionRecord};
use npkg_domain::version::is_newer;

use crate::error::{Result, ServiceError};

const INDEX_DIR: &str = ".index";
const INDEX_FILENAME: &str = "index.sqlite";
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SUMMARY_COLUMNS: &str =
    "name, description, author, package_type, version, created_at, modified_at";
const VERSION_COLUMNS: &str = "name, version, description, author, package_type, published_at";

/// Two-level metadata index: one summary row per package, one row per
/// installed (name, version) pair. Backed by an embedded SQLite database
/// under the storage root. Every operation opens its own connection, so the
/// index can be shared freely across request threads; the composite primary
/// key on `package_versions` is the at-most-once backstop for concurrent
/// installs.
pub struct MetadataIndex {
    path: PathBuf,
}

impl MetadataIndex {
    /// Open (creating the schema if needed) the index under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(INDEX_DIR);
        fs::create_dir_all(&dir).map_err(|err| ServiceError::io(&dir, err))?;
        let index = Self {
            path: dir.join(INDEX_FILENAME),
        };
        let conn = index.connection()?;
        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS packages (
                name TEXT PRIMARY KEY,
                description TEXT,
                author TEXT,
                package_type TEXT,
                version TEXT NOT NULL,
                created_at TEXT,
                modified_at TEXT
            );
            CREATE TABLE IF NOT EXISTS package_versions (
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                description TEXT,
                author TEXT,
                package_type TEXT,
                published_at TEXT,
                PRIMARY KEY (name, version)
            );
            ",
        )?;
        Ok(index)
    }

    fn connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn find_package(&self, name: &str) -> Result<Option<PackageSummary>> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                &format!("SELECT {SUMMARY_COLUMNS} FROM packages WHERE name = ?1"),
                params![name],
                summary_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Insert the summary if absent and return the stored row; a lost race
    /// adopts the concurrent winner's row.
    pub fn insert_package(&self, summary: &PackageSummary) -> Result<PackageSummary> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO packages \
             (name, description, author, package_type, version, created_at, modified_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                summary.name,
                summary.description,
                summary.author,
                summary.package_type,
                summary.version,
                summary.created_at,
                summary.modified_at,
            ],
        )?;
        self.find_package(&summary.name)?.ok_or_else(|| {
            ServiceError::IndexInconsistent(format!("package summary vanished for {}", summary.name))
        })
    }

    pub fn find_version(&self, name: &str, version: &str) -> Result<Option<PackageVersionRecord>> {
        let conn = self.connection()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM package_versions \
                     WHERE name = ?1 AND version = ?2"
                ),
                params![name, version],
                version_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// At-most-once creation for a (name, version) pair. Returns `true` when
    /// this call created the row, `false` when another writer got there
    /// first.
    pub fn insert_version(&self, record: &PackageVersionRecord) -> Result<bool> {
        let conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO package_versions \
             (name, version, description, author, package_type, published_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.name,
                record.version,
                record.description,
                record.author,
                record.package_type,
                record.published_at,
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Advance the summary's latest pointer to `version` when it is strictly
    /// newer, re-reading the current pointer under an immediate transaction
    /// so racing installs of different versions cannot regress it. Returns
    /// the summary as stored after the call.
    pub fn advance_latest(
        &self,
        name: &str,
        version: &str,
        modified_at: Option<&str>,
    ) -> Result<PackageSummary> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tx
            .query_row(
                &format!("SELECT {SUMMARY_COLUMNS} FROM packages WHERE name = ?1"),
                params![name],
                summary_from_row,
            )
            .optional()?
            .ok_or_else(|| {
                ServiceError::IndexInconsistent(format!("package summary missing for {name}"))
            })?;

        let updated = if is_newer(version, &current.version) {
            tx.execute(
                "UPDATE packages SET version = ?2, modified_at = ?3 WHERE name = ?1",
                params![name, version, modified_at],
            )?;
            debug!(name, version, "advanced latest pointer");
            PackageSummary {
                version: version.to_string(),
                modified_at: modified_at.map(str::to_string),
                ..current
            }
        } else {
            current
        };
        tx.commit()?;
        Ok(updated)
    }

    /// All version records for `name`, in stored order.
    pub fn versions_for(&self, name: &str) -> Result<Vec<PackageVersionRecord>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM package_versions WHERE name = ?1 ORDER BY rowid"
        ))?;
        let rows = stmt.query_map(params![name], version_from_row)?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?);
        }
        Ok(versions)
    }

    pub fn remove_version(&self, name: &str, version: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "DELETE FROM package_versions WHERE name = ?1 AND version = ?2",
            params![name, version],
        )?;
        Ok(())
    }

    /// Delete the summary, matched by name.
    pub fn remove_package(&self, name: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("DELETE FROM packages WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// One page of summaries in stored order plus the unfiltered total.
    pub fn list_packages(&self, skip: u64, limit: u64) -> Result<(Vec<PackageSummary>, u64)> {
        let conn = self.connection()?;
        let skip = i64::try_from(skip).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM packages ORDER BY rowid LIMIT ?1 OFFSET ?2"
        ))?;
        let rows = stmt.query_map(params![limit, skip], summary_from_row)?;
        let mut list = Vec::new();
        for row in rows {
            list.push(row?);
        }
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?;
        Ok((list, u64::try_from(total).unwrap_or(0)))
    }
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<PackageSummary> {
    Ok(PackageSummary {
        name: row.get(0)?,
        description: row.get(1)?,
        author: row.get(2)?,
        package_type: row.get(3)?,
        version: row.get(4)?,
        created_at: row.get(5)?,
        modified_at: row.get(6)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<PackageVersionRecord> {
    Ok(PackageVersionRecord {
        name: row.get(0)?,
        version: row.get(1)?,
        description: row.get(2)?,
        author: row.get(3)?,
        package_type: row.get(4)?,
        published_at: row.get(5)?,
    })
}
