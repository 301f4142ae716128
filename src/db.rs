// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database operations for typing statistics.

use crate::{aggregate::DailyMetric, error::SchemaError, keys::KeyMetric};
use anyhow::{Context, Result};
use camino::Utf8Path;
use rusqlite::{Connection, params};
use std::collections::HashSet;

/// Open (creating if necessary) the database and initialize the schema.
pub fn init_db(path: &Utf8Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        std::fs::create_dir_all(parent.as_std_path())
            .with_context(|| format!("failed to create database directory {}", parent))?;
    }

    let conn = Connection::open(path.as_std_path())
        .with_context(|| format!("failed to open database at {}", path))?;

    // journal_mode and synchronous persist in the file; temp_store is
    // per-connection.
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        "#,
    )
    .context("failed to set database pragmas")?;

    init_schema(&conn)?;
    Ok(conn)
}

/// Create all tables and indexes if they don't exist yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per lesson, append-only. timeStamp is ISO-8601 and orders lessons.
        CREATE TABLE IF NOT EXISTS lessons_raw (
            timeStamp TEXT NOT NULL,
            layout TEXT,
            textType TEXT,
            length INTEGER,                 -- characters typed
            time_ms INTEGER,
            errors INTEGER,
            speed REAL                      -- characters per minute
        );

        -- One row per histogram entry of a lesson, append-only.
        CREATE TABLE IF NOT EXISTS keystats_raw (
            timeStamp TEXT NOT NULL,        -- parent lesson's timestamp
            codePoint INTEGER,
            key TEXT,                       -- NULL if codePoint isn't a valid char
            hitCount INTEGER,
            missCount INTEGER,
            timeToType_ms REAL
        );

        -- Derived, fully replaced on every build
        CREATE TABLE IF NOT EXISTS daily_metrics (
            date TEXT PRIMARY KEY,          -- YYYY-MM-DD
            total_keystrokes INTEGER,
            avg_wpm REAL,
            avg_accuracy REAL,
            error_rate REAL,
            avg_latency REAL,
            ttfe REAL,
            ttke REAL,
            rolling_7d_wpm REAL,
            rolling_30d_wpm REAL
        );

        CREATE TABLE IF NOT EXISTS key_metrics (
            key TEXT PRIMARY KEY,
            attempts INTEGER,
            errors INTEGER,
            miss_rate REAL,
            avg_latency REAL,
            last_timestamp TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_lessons_ts ON lessons_raw(timeStamp);
        CREATE INDEX IF NOT EXISTS idx_keystats_ts ON keystats_raw(timeStamp);
        CREATE INDEX IF NOT EXISTS idx_keystats_key ON keystats_raw(key);
        "#,
    )
    .context("failed to initialize database schema")?;
    Ok(())
}

/// A row of `lessons_raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonRecord {
    pub timestamp: String,
    pub layout: Option<String>,
    pub text_type: Option<String>,
    pub length: Option<i64>,
    pub time_ms: Option<i64>,
    pub errors: Option<i64>,
    pub speed: Option<f64>,
}

/// A row of `keystats_raw`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    pub timestamp: String,
    pub code_point: Option<i64>,
    pub key: Option<String>,
    pub hit_count: Option<i64>,
    pub miss_count: Option<i64>,
    pub time_to_type_ms: Option<f64>,
}

/// Insert a lesson row.
pub fn insert_lesson(conn: &Connection, lesson: &LessonRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO lessons_raw (timeStamp, layout, textType, length, time_ms, errors, speed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            lesson.timestamp,
            lesson.layout,
            lesson.text_type,
            lesson.length,
            lesson.time_ms,
            lesson.errors,
            lesson.speed
        ],
    )
    .with_context(|| format!("failed to insert lesson {}", lesson.timestamp))?;
    Ok(())
}

/// Insert a per-key histogram row.
pub fn insert_key_event(conn: &Connection, event: &KeyEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO keystats_raw (timeStamp, codePoint, key, hitCount, missCount, timeToType_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.timestamp,
            event.code_point,
            event.key,
            event.hit_count,
            event.miss_count,
            event.time_to_type_ms
        ],
    )
    .with_context(|| format!("failed to insert key event for lesson {}", event.timestamp))?;
    Ok(())
}

/// Get the timestamp of the most recent lesson in the store.
pub fn latest_lesson_timestamp(conn: &Connection) -> Result<Option<String>> {
    let result: Option<String> = conn
        .query_row("SELECT MAX(timeStamp) FROM lessons_raw", [], |row| row.get(0))
        .context("failed to query latest lesson timestamp")?;
    Ok(result)
}

/// Delete every raw row. Used when re-importing an export from scratch.
pub fn clear_raw_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch("DELETE FROM keystats_raw; DELETE FROM lessons_raw;")
        .context("failed to clear raw tables")?;
    Ok(())
}

/// Row counts of the two raw tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCounts {
    pub lessons: u64,
    pub key_events: u64,
}

pub fn raw_counts(conn: &Connection) -> Result<RawCounts> {
    let lessons: i64 = conn.query_row("SELECT COUNT(*) FROM lessons_raw", [], |row| row.get(0))?;
    let key_events: i64 =
        conn.query_row("SELECT COUNT(*) FROM keystats_raw", [], |row| row.get(0))?;
    Ok(RawCounts {
        lessons: lessons as u64,
        key_events: key_events as u64,
    })
}

/// Exactly the columns of `daily_metrics`.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyMetricsRow {
    pub date: String,
    pub total_keystrokes: i64,
    pub avg_wpm: Option<f64>,
    pub avg_accuracy: Option<f64>,
    pub error_rate: Option<f64>,
    pub avg_latency: Option<f64>,
    pub ttfe: Option<f64>,
    /// Always NULL in the store; daily TTKE is only exported to CSV.
    pub ttke: Option<f64>,
    pub rolling_7d_wpm: Option<f64>,
    pub rolling_30d_wpm: Option<f64>,
}

impl From<&DailyMetric> for DailyMetricsRow {
    fn from(m: &DailyMetric) -> Self {
        Self {
            date: m.date.clone(),
            total_keystrokes: m.total_keystrokes,
            avg_wpm: m.avg_wpm,
            avg_accuracy: m.avg_accuracy,
            error_rate: m.error_rate,
            avg_latency: m.avg_latency,
            ttfe: m.ttfe,
            ttke: None,
            rolling_7d_wpm: m.rolling_7d_wpm,
            rolling_30d_wpm: m.rolling_30d_wpm,
        }
    }
}

/// Exactly the columns of `key_metrics`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMetricsRow {
    pub key: String,
    pub attempts: i64,
    pub errors: i64,
    pub miss_rate: f64,
    pub avg_latency: Option<f64>,
    pub last_timestamp: Option<String>,
}

impl From<&KeyMetric> for KeyMetricsRow {
    fn from(m: &KeyMetric) -> Self {
        Self {
            key: m.key.clone(),
            attempts: m.attempts,
            errors: m.errors,
            miss_rate: m.miss_rate,
            avg_latency: m.avg_latency,
            last_timestamp: m.last_timestamp.clone(),
        }
    }
}

fn validate_primary_keys<'a>(
    table: &'static str,
    keys: impl Iterator<Item = &'a str>,
) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for (row, key) in keys.enumerate() {
        if key.is_empty() {
            return Err(SchemaError::EmptyKey { table, row });
        }
        if !seen.insert(key) {
            return Err(SchemaError::DuplicateKey {
                table,
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

pub fn validate_daily_rows(rows: &[DailyMetricsRow]) -> Result<(), SchemaError> {
    validate_primary_keys("daily_metrics", rows.iter().map(|r| r.date.as_str()))
}

pub fn validate_key_rows(rows: &[KeyMetricsRow]) -> Result<(), SchemaError> {
    validate_primary_keys("key_metrics", rows.iter().map(|r| r.key.as_str()))
}

/// Replace the contents of `daily_metrics`.
pub fn replace_daily_metrics(conn: &Connection, rows: &[DailyMetricsRow]) -> Result<()> {
    validate_daily_rows(rows)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM daily_metrics", [])
        .context("failed to clear daily_metrics")?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO daily_metrics (date, total_keystrokes, avg_wpm, avg_accuracy, error_rate,
                 avg_latency, ttfe, ttke, rolling_7d_wpm, rolling_30d_wpm)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.date,
                row.total_keystrokes,
                row.avg_wpm,
                row.avg_accuracy,
                row.error_rate,
                row.avg_latency,
                row.ttfe,
                row.ttke,
                row.rolling_7d_wpm,
                row.rolling_30d_wpm
            ])
            .with_context(|| format!("failed to insert daily metrics for {}", row.date))?;
        }
    }
    tx.commit().context("failed to commit daily_metrics")?;
    Ok(())
}

/// Replace the contents of `key_metrics`.
pub fn replace_key_metrics(conn: &Connection, rows: &[KeyMetricsRow]) -> Result<()> {
    validate_key_rows(rows)?;

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM key_metrics", [])
        .context("failed to clear key_metrics")?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO key_metrics (key, attempts, errors, miss_rate, avg_latency, last_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.key,
                row.attempts,
                row.errors,
                row.miss_rate,
                row.avg_latency,
                row.last_timestamp
            ])
            .with_context(|| format!("failed to insert key metrics for '{}'", row.key))?;
        }
    }
    tx.commit().context("failed to commit key_metrics")?;
    Ok(())
}

/// Read `daily_metrics` back, ordered by date.
pub fn load_daily_metrics(conn: &Connection) -> Result<Vec<DailyMetricsRow>> {
    let mut stmt = conn.prepare(
        "SELECT date, total_keystrokes, avg_wpm, avg_accuracy, error_rate, avg_latency,
                ttfe, ttke, rolling_7d_wpm, rolling_30d_wpm
         FROM daily_metrics
         ORDER BY date",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(DailyMetricsRow {
                date: row.get(0)?,
                total_keystrokes: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                avg_wpm: row.get(2)?,
                avg_accuracy: row.get(3)?,
                error_rate: row.get(4)?,
                avg_latency: row.get(5)?,
                ttfe: row.get(6)?,
                ttke: row.get(7)?,
                rolling_7d_wpm: row.get(8)?,
                rolling_30d_wpm: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to load daily_metrics")?;
    Ok(rows)
}

/// Read `key_metrics` back, ordered by key.
pub fn load_key_metrics(conn: &Connection) -> Result<Vec<KeyMetricsRow>> {
    let mut stmt = conn.prepare(
        "SELECT key, attempts, errors, miss_rate, avg_latency, last_timestamp
         FROM key_metrics
         ORDER BY key",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(KeyMetricsRow {
                key: row.get(0)?,
                attempts: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                errors: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                miss_rate: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                avg_latency: row.get(4)?,
                last_timestamp: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to load key_metrics")?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn
}
