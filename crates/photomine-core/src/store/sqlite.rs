//! SQLite-backed photo index.

use crate::config::MinerConfig;
use crate::error::{MinerError, Result};
use crate::reconcile::{IndexStore, PhotoAttributes};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Bumped when the `resources` table layout changes. Older tables are rebuilt.
const SCHEMA_VERSION: i32 = 2;

/// A stored photo resource, unique per datasource and identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecord {
    pub identifier: String,
    /// Opaque URN assigned on first insert and kept across updates.
    pub urn: String,
    pub datasource: String,
    pub attributes: PhotoAttributes,
    pub updated_at: String,
}

/// Photo index stored in a SQLite database.
pub struct SqliteIndexStore {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIndexStore {
    /// Create or open an index at the given path.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MinerError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::configure_connection(&conn)?;
        Self::prepare(conn, Some(db_path))
    }

    /// An index that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(conn, None)
    }

    fn prepare(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        Self::ensure_schema(&conn)?;
        Self::check_miner_version(&conn)?;
        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        let user_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if user_version < SCHEMA_VERSION {
            // Version 1 keyed resources by identifier alone.
            conn.execute("DROP TABLE IF EXISTS resources", [])?;
            conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))?;
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS resources (
                datasource TEXT NOT NULL,
                identifier TEXT NOT NULL,
                urn TEXT NOT NULL UNIQUE,
                class TEXT NOT NULL,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                creator TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (datasource, identifier)
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS miner_meta (
                miner TEXT PRIMARY KEY,
                version INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Drop everything indexed by an older miner version.
    fn check_miner_version(conn: &Connection) -> Result<()> {
        let stored: Option<u32> = conn
            .query_row(
                "SELECT version FROM miner_meta WHERE miner = ?1",
                params![MinerConfig::MINER_IDENTIFIER],
                |row| row.get(0),
            )
            .optional()?;

        if stored == Some(MinerConfig::VERSION) {
            return Ok(());
        }

        if let Some(old) = stored {
            let cleared = conn.execute("DELETE FROM resources", [])?;
            info!(
                old_version = old,
                new_version = MinerConfig::VERSION,
                "Miner version changed, cleared {} resource(s)",
                cleared
            );
        }

        conn.execute(
            "INSERT INTO miner_meta (miner, version) VALUES (?1, ?2)
             ON CONFLICT(miner) DO UPDATE SET version=excluded.version",
            params![MinerConfig::MINER_IDENTIFIER, MinerConfig::VERSION],
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| MinerError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        })
    }

    /// Database file, or `None` for an in-memory index.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn get(&self, datasource: &str, identifier: &str) -> Result<Option<ResourceRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT identifier, urn, datasource, class, title, url, mime_type,
                        creator, updated_at
                 FROM resources WHERE datasource = ?1 AND identifier = ?2",
                params![datasource, identifier],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Number of resources indexed for `datasource`.
    pub fn count(&self, datasource: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: usize = conn.query_row(
            "SELECT COUNT(*) FROM resources WHERE datasource = ?1",
            params![datasource],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<ResourceRecord> {
        Ok(ResourceRecord {
            identifier: row.get(0)?,
            urn: row.get(1)?,
            datasource: row.get(2)?,
            attributes: PhotoAttributes {
                class: row.get(3)?,
                title: row.get(4)?,
                url: row.get(5)?,
                mime_type: row.get(6)?,
                creator: row.get(7)?,
            },
            updated_at: row.get(8)?,
        })
    }
}

impl IndexStore for SqliteIndexStore {
    fn previous_resources(&self, datasource: &str) -> Result<HashSet<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT identifier FROM resources WHERE datasource = ?1")?;
        let rows = stmt.query_map(params![datasource], |row| row.get(0))?;

        let mut identifiers = HashSet::new();
        for row in rows {
            identifiers.insert(row?);
        }
        Ok(identifiers)
    }

    fn upsert_photo(
        &self,
        datasource: &str,
        identifier: &str,
        attributes: &PhotoAttributes,
    ) -> Result<()> {
        let conn = self.conn()?;
        let urn = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        let updated_at = chrono::Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO resources (identifier, urn, datasource, class, title, url,
                                    mime_type, creator, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(datasource, identifier) DO UPDATE SET
                 class=excluded.class,
                 title=excluded.title,
                 url=excluded.url,
                 mime_type=excluded.mime_type,
                 creator=excluded.creator,
                 updated_at=excluded.updated_at",
            params![
                identifier,
                urn,
                datasource,
                attributes.class,
                attributes.title,
                attributes.url,
                attributes.mime_type,
                attributes.creator,
                updated_at,
            ],
        )?;

        debug!(datasource = %datasource, "Upserted resource: {}", identifier);
        Ok(())
    }

    fn delete_resources(&self, datasource: &str, identifiers: &[String]) -> Result<usize> {
        if identifiers.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM resources WHERE datasource = ?1 AND identifier = ?2")?;
            for identifier in identifiers {
                deleted += stmt.execute(params![datasource, identifier])?;
            }
        }
        tx.commit()?;

        debug!(datasource = %datasource, "Deleted {} resource(s)", deleted);
        Ok(deleted)
    }
}
