//! SQLite persistence: WAL mode, two tables.
//!
//! `calls` holds the latest decode per call sign; `attempts` holds the
//! stations we have called and whether the contact was logged.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use autoft_core::repo::Repository;
use autoft_core::types::{AttemptRecord, AutoftError, CallRecord, ExchangeKind, Result};
use autoft_core::wsjtx::{time_from_ms, time_to_ms};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS calls (
    call TEXT PRIMARY KEY,
    to_call TEXT NOT NULL,
    kind TEXT NOT NULL,
    extra TEXT,
    grid TEXT,
    distance REAL,
    direction REAL,
    snr INTEGER NOT NULL,
    time_ms INTEGER NOT NULL,
    delta_time REAL NOT NULL,
    delta_frequency INTEGER NOT NULL,
    mode TEXT NOT NULL,
    message TEXT NOT NULL,
    low_confidence INTEGER NOT NULL DEFAULT 0,
    timestamp INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS attempts (
    call TEXT PRIMARY KEY,
    time INTEGER NOT NULL,
    logged INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_calls_timestamp ON calls(timestamp);
CREATE INDEX IF NOT EXISTS idx_calls_to ON calls(to_call);
CREATE INDEX IF NOT EXISTS idx_attempts_time ON attempts(time);
"#;

const CALL_COLUMNS: &str = "call, to_call, kind, extra, grid, distance, direction, snr, time_ms,
     delta_time, delta_frequency, mode, message, low_confidence, timestamp";

fn db_err(e: rusqlite::Error) -> AutoftError {
    AutoftError::Repository(e.to_string())
}

fn row_to_call(r: &Row<'_>) -> rusqlite::Result<CallRecord> {
    let kind: String = r.get(2)?;
    let time_ms: u32 = r.get(8)?;
    Ok(CallRecord {
        call: r.get(0)?,
        to: r.get(1)?,
        kind: ExchangeKind::parse(&kind).unwrap_or(ExchangeKind::Cq),
        extra: r.get(3)?,
        grid: r.get(4)?,
        distance: r.get(5)?,
        direction: r.get(6)?,
        snr: r.get(7)?,
        time: time_from_ms(time_ms).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, Type::Integer, Box::new(e))
        })?,
        delta_time: r.get(9)?,
        delta_frequency: r.get(10)?,
        mode: r.get(11)?,
        message: r.get(12)?,
        low_confidence: r.get::<_, i32>(13)? != 0,
        timestamp: r.get(14)?,
    })
}

fn row_to_attempt(r: &Row<'_>) -> rusqlite::Result<AttemptRecord> {
    Ok(AttemptRecord {
        call: r.get(0)?,
        time: r.get(1)?,
        logged: r.get::<_, i32>(2)? != 0,
    })
}

/// SQLite-backed repository shared by the daemon's tasks.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory().map_err(db_err)?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open(path).map_err(db_err)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        Ok(SqliteRepository {
            conn: Mutex::new(conn),
        })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AutoftError::Repository("connection lock poisoned".into()))
    }

    fn count(&self, sql: &str) -> Result<i64> {
        self.conn()?
            .query_row(sql, [], |r| r.get(0))
            .map_err(db_err)
    }

    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            calls: self.count("SELECT COUNT(*) FROM calls")?,
            cq_calls: self.count("SELECT COUNT(*) FROM calls WHERE to_call = 'CQ'")?,
            attempts: self.count("SELECT COUNT(*) FROM attempts")?,
            logged: self.count("SELECT COUNT(*) FROM attempts WHERE logged = 1")?,
            last_heard: self
                .conn()?
                .query_row("SELECT MAX(timestamp) FROM calls", [], |r| r.get(0))
                .map_err(db_err)?,
        })
    }

    pub fn vacuum(&self) -> Result<()> {
        self.conn()?.execute_batch("VACUUM;").map_err(db_err)
    }
}

impl Repository for SqliteRepository {
    fn upsert_call(&self, c: &CallRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO calls (call, to_call, kind, extra, grid, distance, direction, snr,
                     time_ms, delta_time, delta_frequency, mode, message, low_confidence, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                 ON CONFLICT(call) DO UPDATE SET
                     to_call = excluded.to_call,
                     kind = excluded.kind,
                     extra = excluded.extra,
                     grid = COALESCE(excluded.grid, grid),
                     distance = COALESCE(excluded.distance, distance),
                     direction = COALESCE(excluded.direction, direction),
                     snr = excluded.snr,
                     time_ms = excluded.time_ms,
                     delta_time = excluded.delta_time,
                     delta_frequency = excluded.delta_frequency,
                     mode = excluded.mode,
                     message = excluded.message,
                     low_confidence = excluded.low_confidence,
                     timestamp = excluded.timestamp",
                params![
                    c.call,
                    c.to,
                    c.kind.as_str(),
                    c.extra,
                    c.grid,
                    c.distance,
                    c.direction,
                    c.snr,
                    time_to_ms(c.time),
                    c.delta_time,
                    c.delta_frequency,
                    c.mode,
                    c.message,
                    c.low_confidence as i32,
                    c.timestamp,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn find_call(&self, call: &str) -> Result<Option<CallRecord>> {
        self.conn()?
            .query_row(
                &format!("SELECT {CALL_COLUMNS} FROM calls WHERE call = ?1"),
                params![call],
                row_to_call,
            )
            .optional()
            .map_err(db_err)
    }

    fn recent_calls(&self, since: i64) -> Result<Vec<CallRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CALL_COLUMNS} FROM calls WHERE timestamp > ?1
                 ORDER BY timestamp DESC, call ASC"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![since], row_to_call)
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn prune_calls(&self, before: i64) -> Result<usize> {
        self.conn()?
            .execute("DELETE FROM calls WHERE timestamp < ?1", params![before])
            .map_err(db_err)
    }

    fn get_attempt(&self, call: &str) -> Result<Option<AttemptRecord>> {
        self.conn()?
            .query_row(
                "SELECT call, time, logged FROM attempts WHERE call = ?1",
                params![call],
                row_to_attempt,
            )
            .optional()
            .map_err(db_err)
    }

    fn upsert_attempt(&self, a: &AttemptRecord) -> Result<()> {
        self.conn()?
            .execute(
                "INSERT INTO attempts (call, time, logged) VALUES (?1, ?2, ?3)
                 ON CONFLICT(call) DO UPDATE SET
                     time = excluded.time,
                     logged = excluded.logged",
                params![a.call, a.time, a.logged as i32],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn attempts(&self) -> Result<Vec<AttemptRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT call, time, logged FROM attempts ORDER BY time DESC, call ASC")
            .map_err(db_err)?;
        let rows = stmt.query_map([], row_to_attempt).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }

    fn purge_attempts(&self, before: i64) -> Result<usize> {
        self.conn()?
            .execute(
                "DELETE FROM attempts WHERE logged = 0 AND time < ?1",
                params![before],
            )
            .map_err(db_err)
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DbStats {
    pub calls: i64,
    pub cq_calls: i64,
    pub attempts: i64,
    pub logged: i64,
    pub last_heard: Option<i64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
