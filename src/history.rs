use chrono::Local;
use rusqlite::{params, Connection, Result};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::record::SessionResult;

/// Which half of a trial a stored session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionKind {
    Calibration,
    Validation,
}

/// Summary row for one stored session.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: i64,
    pub timestamp: String,
    pub kind: String,
    pub points: u32,
    pub passed: u32,
    pub accuracy: f64,
    pub mean_dist: Option<f64>,
}

/// Database manager for completed calibration/validation sessions
#[derive(Debug)]
pub struct HistoryDb {
    conn: Connection,
}

impl HistoryDb {
    /// Initialize the database connection and create tables if needed
    pub fn new() -> Result<Self> {
        let db_path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("saccade_sessions.db"));
        Self::open_at(db_path)
    }

    pub fn open_at<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                    Some(format!("Failed to create directory: {}", e)),
                )
            })?;
        }

        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                points INTEGER NOT NULL,
                passed INTEGER NOT NULL,
                accuracy REAL NOT NULL,
                mean_dist REAL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            [],
        )?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS session_points (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                valid BOOLEAN NOT NULL,
                hit_ratio REAL NOT NULL,
                hit_count INTEGER NOT NULL,
                total_count INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        // Indexes for the history queries
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_timestamp ON sessions(timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_session_points_session ON session_points(session_id)",
            [],
        )?;

        Ok(HistoryDb { conn })
    }

    /// Store one completed session and its per-point verdicts in a single
    /// transaction.
    pub fn record_session(&mut self, kind: SessionKind, result: &SessionResult) -> Result<i64> {
        let mean_dist = result.distance_summary().map(|s| s.mean);
        let tx = self.conn.transaction()?;

        tx.execute(
            r#"
            INSERT INTO sessions (timestamp, kind, points, passed, accuracy, mean_dist)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                Local::now().to_rfc3339(),
                kind.to_string(),
                result.points.len() as u32,
                result.passed_count() as u32,
                result.accuracy,
                mean_dist,
            ],
        )?;
        let session_id = tx.last_insert_rowid();

        for point in &result.points {
            tx.execute(
                r#"
                INSERT INTO session_points
                (session_id, x, y, valid, hit_ratio, hit_count, total_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    session_id,
                    point.x,
                    point.y,
                    point.valid,
                    point.hit_ratio,
                    point.hit_count,
                    point.total_count,
                ],
            )?;
        }

        tx.commit()?;
        Ok(session_id)
    }

    /// Most recent sessions, newest first.
    pub fn recent_sessions(&self, limit: u32) -> Result<Vec<SessionRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, timestamp, kind, points, passed, accuracy, mean_dist
            FROM sessions
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map(params![limit], |row| {
            Ok(SessionRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                kind: row.get(2)?,
                points: row.get(3)?,
                passed: row.get(4)?,
                accuracy: row.get(5)?,
                mean_dist: row.get(6)?,
            })
        })?;

        rows.collect()
    }

    /// Best validation accuracy on record, if any validation ran before.
    pub fn best_validation_accuracy(&self) -> Result<Option<f64>> {
        self.conn.query_row(
            "SELECT MAX(accuracy) FROM sessions WHERE kind = 'validation'",
            [],
            |row| row.get(0),
        )
    }

    pub fn clear_all(&self) -> Result<()> {
        self.conn.execute("DELETE FROM session_points", [])?;
        self.conn.execute("DELETE FROM sessions", [])?;
        Ok(())
    }
}

/// Append one completed session to the plain-text results log.
pub fn append_session_log(kind: SessionKind, result: &SessionResult) -> io::Result<()> {
    if let Some(log_path) = AppDirs::log_path() {
        if let Some(config_dir) = log_path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        // If the log file doesn't exist, we need to emit a header
        let needs_header = !log_path.exists();

        let mut log_file = OpenOptions::new()
            .write(true)
            .append(true)
            .create(true)
            .open(log_path)?;

        if needs_header {
            writeln!(
                log_file,
                "date,kind,points,passed,accuracy,mean_dist,std_dist"
            )?;
        }

        let summary = result.distance_summary();

        writeln!(
            log_file,
            "{},{},{},{},{:.3},{},{}",
            Local::now().format("%c"),
            kind,
            result.points.len(),
            result.passed_count(),
            result.accuracy,
            summary.map_or(String::new(), |s| format!("{:.1}", s.mean)),
            summary.map_or(String::new(), |s| format!("{:.1}", s.std_dev)),
        )?;
    }

    Ok(())
}
