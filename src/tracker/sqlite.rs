// src/tracker/sqlite.rs

//! Relational applied-log tracker backed by SQLite

use crate::change::Change;
use crate::error::{Error, Result};
use crate::request::{Outcome, Request};
use crate::tracker::scan::ScanBags;
use crate::tracker::Tracker;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Explicit configuration for the SQLite tracker
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file; `:memory:` is accepted for throwaway logs
    pub file: PathBuf,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("delta.db"),
        }
    }
}

/// Applied-log tracker over a single `migrations` table
pub struct SqliteTracker {
    config: SqliteConfig,
    conn: Mutex<Option<Connection>>,
}

impl SqliteTracker {
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    /// Run `f` against the lazily-opened connection. The first call creates
    /// the log table; later calls reuse the connection, so `configure` is
    /// idempotent.
    fn with_conn<T>(
        &self,
        req: &Request,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let file = req
                .params
                .get("file")
                .map(PathBuf::from)
                .unwrap_or_else(|| self.config.file.clone());
            *guard = Some(Self::open(&file)?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(Error::Config("migration log unavailable".to_string()));
        };
        f(conn)
    }

    fn open(file: &PathBuf) -> Result<Connection> {
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Config(format!("Failed to create log directory: {}", e)))?;
            }
        }

        let conn = Connection::open(file)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS migrations (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                file TEXT NOT NULL,
                path TEXT,
                extension TEXT,
                created TEXT,
                applied TEXT,
                UNIQUE(file, name)
            );

            CREATE INDEX IF NOT EXISTS idx_migrations_created ON migrations(created);
            ",
        )?;

        info!(file = %file.display(), "migration log ready");
        Ok(conn)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Change> {
        let file: String = row.get(2)?;
        let name: String = row.get(1)?;
        let mut change = Change::new(PathBuf::from(file), name, parse_ts(row, 5)?);
        change.id = Some(row.get(0)?);
        change.path = PathBuf::from(row.get::<_, String>(3)?);
        change.extension = row.get(4)?;
        change.applied = parse_ts(row, 6)?;
        Ok(change)
    }
}

fn parse_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    })
    .transpose()
}

fn format_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|dt| dt.to_rfc3339())
}

const SELECT_COLUMNS: &str = "id, name, file, path, extension, created, applied";

impl Tracker for SqliteTracker {
    fn configure(&self, req: &Request) -> Result<()> {
        self.with_conn(req, |_| Ok(()))
    }

    fn add(&self, mut changes: Vec<Change>, req: &Request) -> Result<Outcome> {
        if changes.is_empty() {
            return Ok(Outcome::ok_with("No changes to record", json!([])));
        }

        self.with_conn(req, |conn| {
            let tx = conn.transaction()?;
            let mut ids = Vec::with_capacity(changes.len());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO migrations (id, name, file, path, extension, created, applied)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for change in &mut changes {
                    change.applied.get_or_insert_with(Utc::now);
                    let id = change
                        .id
                        .clone()
                        .unwrap_or_else(|| change.file.display().to_string());
                    stmt.execute(params![
                        id,
                        change.name,
                        change.file.display().to_string(),
                        change.path.display().to_string(),
                        change.extension,
                        format_ts(change.created),
                        format_ts(change.applied),
                    ])?;
                    ids.push(id);
                }
            }
            tx.commit()?;

            debug!(flow = %req.flow, count = ids.len(), "changes recorded");
            Ok(Outcome::ok_with(
                format!("Recorded {} change(s)", ids.len()),
                json!(ids),
            ))
        })
    }

    fn remove(&self, changes: &[Change], req: &Request) -> Result<Outcome> {
        if changes.is_empty() {
            return Ok(Outcome::ok_with("No changes to remove", json!(0)));
        }

        self.with_conn(req, |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0usize;
            {
                let mut stmt = tx.prepare("DELETE FROM migrations WHERE file = ?1 AND name = ?2")?;
                for change in changes {
                    removed += stmt.execute(params![
                        change.file.display().to_string(),
                        change.name
                    ])?;
                }
            }
            tx.commit()?;

            debug!(flow = %req.flow, removed, "changes removed from log");
            Ok(Outcome::ok_with(
                format!("Removed {} change(s)", removed),
                json!(removed),
            ))
        })
    }

    fn list(&self, req: &Request) -> Result<Vec<Change>> {
        self.with_conn(req, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM migrations ORDER BY created ASC, file ASC",
                SELECT_COLUMNS
            ))?;
            let changes = stmt
                .query_map([], Self::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(changes)
        })
    }

    fn last(&self, req: &Request) -> Result<Option<Change>> {
        self.with_conn(req, |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM migrations ORDER BY created DESC, file DESC LIMIT 1",
                SELECT_COLUMNS
            ))?;
            let change = stmt.query_row([], Self::from_row).optional()?;
            Ok(change)
        })
    }

    fn missing_in(&self, scanned: &ScanBags, req: &Request) -> Result<Vec<Change>> {
        let applied = self.list(req)?;
        let bound = applied.last().and_then(|c| c.created);

        Ok(applied
            .into_iter()
            .filter(|entry| {
                let within_bound = match (entry.created, bound) {
                    (Some(created), Some(bound)) => created <= bound,
                    _ => true,
                };
                within_bound && !scanned.contains(entry)
            })
            .collect())
    }
}
