//! SQLite-backed package catalog.

use super::models::{CrawlTarget, PackageDocument, PackageEntry, PackageRecord};
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::CatalogStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const PACKAGE_COLUMNS: &str =
    "import_path, project_root, etag, name, synopsis, imports, next_crawl, suppressed";

pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

fn to_unix(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

impl SqliteCatalogStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), CATALOG_VERSIONED_SCHEMAS, "catalog")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Catalog connection mutex poisoned"))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PackageRecord> {
        let imports_json: String = row.get("imports")?;
        let imports: Vec<String> = serde_json::from_str(&imports_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
        let next_crawl: i64 = row.get("next_crawl")?;
        let suppressed: i64 = row.get("suppressed")?;

        Ok(PackageRecord {
            import_path: row.get("import_path")?,
            project_root: row.get("project_root")?,
            etag: row.get("etag")?,
            name: row.get("name")?,
            synopsis: row.get("synopsis")?,
            imports,
            next_crawl: from_unix(next_crawl),
            suppressed: suppressed != 0,
        })
    }

    fn subdirs_of(conn: &Connection, import_path: &str) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT import_path FROM packages
             WHERE substr(import_path, 1, length(?1) + 1) = ?1 || '/'
             ORDER BY import_path",
        )?;
        let subdirs = stmt
            .query_map(params![import_path], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(subdirs)
    }

    fn entry_for(conn: &Connection, record: PackageRecord) -> Result<PackageEntry> {
        let subdirs = Self::subdirs_of(conn, &record.import_path)?;
        let next_crawl = record.next_crawl;
        Ok(PackageEntry {
            record,
            subdirs,
            next_crawl,
        })
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn add_new_crawl(&self, import_path: &str, has_subdirs: bool) -> Result<bool> {
        let conn = self.conn()?;

        let is_bad: bool = conn
            .query_row(
                "SELECT 1 FROM bad_crawls WHERE import_path = ?1",
                params![import_path],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if is_bad {
            return Ok(false);
        }

        let is_known: bool = conn
            .query_row(
                "SELECT 1 FROM packages WHERE import_path = ?1",
                params![import_path],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !is_known {
            conn.execute(
                "INSERT OR IGNORE INTO new_crawl_queue (import_path, has_subdirs, queued_at)
                 VALUES (?1, ?2, ?3)",
                params![import_path, has_subdirs, to_unix(Utc::now())],
            )
            .context("Failed to queue new crawl")?;
        }
        Ok(true)
    }

    fn pop_new_crawl(&self) -> Result<Option<CrawlTarget>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let target = tx
            .query_row(
                "SELECT import_path, has_subdirs FROM new_crawl_queue
                 ORDER BY queued_at ASC, import_path ASC LIMIT 1",
                [],
                |row| {
                    Ok(CrawlTarget {
                        import_path: row.get(0)?,
                        has_subdirs: row.get(1)?,
                    })
                },
            )
            .optional()?;

        if let Some(target) = &target {
            tx.execute(
                "DELETE FROM new_crawl_queue WHERE import_path = ?1",
                params![target.import_path],
            )?;
        }
        tx.commit()?;
        Ok(target)
    }

    fn mark_bad_crawl(&self, import_path: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO bad_crawls (import_path, marked_at) VALUES (?1, ?2)",
            params![import_path, to_unix(Utc::now())],
        )?;
        tx.execute(
            "DELETE FROM new_crawl_queue WHERE import_path = ?1",
            params![import_path],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn is_bad_crawl(&self, import_path: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM bad_crawls WHERE import_path = ?1",
                params![import_path],
                |_| Ok(true),
            )
            .optional()?;
        Ok(found.unwrap_or(false))
    }

    fn get_package(&self, import_path: &str) -> Result<Option<PackageEntry>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE import_path = ?1"),
                params![import_path],
                Self::row_to_record,
            )
            .optional()
            .with_context(|| format!("Failed to read package {}", import_path))?;

        record.map(|r| Self::entry_for(&conn, r)).transpose()
    }

    fn get_most_overdue(&self) -> Result<Option<PackageEntry>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {PACKAGE_COLUMNS} FROM packages
                     ORDER BY next_crawl ASC, import_path ASC LIMIT 1"
                ),
                [],
                Self::row_to_record,
            )
            .optional()
            .context("Failed to read most overdue package")?;

        record.map(|r| Self::entry_for(&conn, r)).transpose()
    }

    fn set_next_crawl_etag(
        &self,
        project_root: &str,
        etag: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE packages SET next_crawl = ?3 WHERE project_root = ?1 AND etag = ?2",
            params![project_root, etag, to_unix(at)],
        )
        .with_context(|| format!("Failed to set next crawl for {}", project_root))?;
        Ok(())
    }

    fn bump_crawl(&self, project_root: &str) -> Result<usize> {
        let conn = self.conn()?;
        let bumped = conn
            .execute(
                "UPDATE packages SET next_crawl = 0 WHERE project_root = ?1",
                params![project_root],
            )
            .with_context(|| format!("Failed to bump crawl for {}", project_root))?;
        Ok(bumped)
    }

    fn all_packages(&self) -> Result<Vec<PackageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages ORDER BY import_path"
        ))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list packages")?;
        Ok(records)
    }

    fn put_package(
        &self,
        document: &PackageDocument,
        next_crawl: Option<DateTime<Utc>>,
        suppressed: bool,
    ) -> Result<()> {
        let imports = serde_json::to_string(&document.imports)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO packages
                (import_path, project_root, etag, name, synopsis, imports, next_crawl, suppressed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(import_path) DO UPDATE SET
                project_root = excluded.project_root,
                etag = excluded.etag,
                name = excluded.name,
                synopsis = excluded.synopsis,
                imports = excluded.imports,
                next_crawl = CASE WHEN ?9 THEN excluded.next_crawl ELSE packages.next_crawl END,
                suppressed = excluded.suppressed",
            params![
                document.import_path,
                document.project_root,
                document.etag,
                document.name,
                document.synopsis,
                imports,
                next_crawl.map(to_unix).unwrap_or(0),
                suppressed,
                next_crawl.is_some(),
            ],
        )
        .with_context(|| format!("Failed to store package {}", document.import_path))?;
        tx.execute(
            "DELETE FROM new_crawl_queue WHERE import_path = ?1",
            params![document.import_path],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn delete_package(&self, import_path: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM packages WHERE import_path = ?1",
            params![import_path],
        )
        .with_context(|| format!("Failed to delete package {}", import_path))?;
        Ok(())
    }

    fn importer_count(&self, import_path: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT packages.import_path)
             FROM packages, json_each(packages.imports)
             WHERE json_each.value = ?1",
            params![import_path],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn read_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM blobs WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read blob {}", key))?;
        Ok(value)
    }

    fn write_blob(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO blobs (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![key, value],
        )
        .with_context(|| format!("Failed to write blob {}", key))?;
        Ok(())
    }
}
