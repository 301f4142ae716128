// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Incremental import of keybr lesson exports.
//!
//! The export is a JSON array of lessons, each optionally carrying a per-key
//! histogram. Only lessons newer than the latest one already stored are
//! appended, so repeated imports of a growing export are cheap and never
//! duplicate rows.

use crate::{
    db::{self, KeyEvent, LessonRecord},
    error::ImportError,
};
use anyhow::{Context, Result};
use camino::Utf8Path;
use rusqlite::Connection;
use serde::Deserialize;

/// A lesson as it appears in the JSON export.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub time_stamp: String,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub text_type: Option<String>,
    #[serde(default)]
    pub length: Option<i64>,
    /// Lesson duration in milliseconds.
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub errors: Option<i64>,
    /// Characters per minute.
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub histogram: Option<Vec<HistogramEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramEntry {
    #[serde(default)]
    pub code_point: Option<i64>,
    #[serde(default)]
    pub hit_count: Option<i64>,
    #[serde(default)]
    pub miss_count: Option<i64>,
    /// Milliseconds.
    #[serde(default)]
    pub time_to_type: Option<f64>,
}

/// Result of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Every lesson in the export is already stored; nothing was written.
    NothingNew { total_in_export: usize },
    Imported {
        total_in_export: usize,
        lessons: usize,
        key_events: usize,
    },
}

/// Load and decode the JSON export.
pub fn load_lessons(path: &Utf8Path) -> Result<Vec<Lesson>, ImportError> {
    let content = match std::fs::read_to_string(path.as_std_path()) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImportError::NotFound(path.to_owned()));
        }
        Err(source) => {
            return Err(ImportError::Io {
                path: path.to_owned(),
                source,
            });
        }
    };

    parse_lessons(&content).map_err(|message| ImportError::InvalidFormat {
        path: path.to_owned(),
        message,
    })
}

fn parse_lessons(content: &str) -> Result<Vec<Lesson>, String> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| format!("malformed JSON: {}", e))?;

    let serde_json::Value::Array(items) = value else {
        return Err("expected a top-level JSON array of lessons".to_string());
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item).map_err(|e| format!("lesson at index {}: {}", i, e))
        })
        .collect()
}

/// Select lessons strictly newer than `last_timestamp`.
///
/// ISO-8601 timestamps sort lexicographically, so plain string comparison is
/// enough. With no previous timestamp everything is new.
pub fn filter_new_lessons<'a>(lessons: &'a [Lesson], last_timestamp: Option<&str>) -> Vec<&'a Lesson> {
    match last_timestamp {
        None => lessons.iter().collect(),
        Some(last) => lessons
            .iter()
            .filter(|l| l.time_stamp.as_str() > last)
            .collect(),
    }
}

/// Decode a code point into the character it names.
///
/// Negative, out-of-range and surrogate values decode to `None`.
pub fn decode_code_point(code_point: Option<i64>) -> Option<String> {
    let cp = u32::try_from(code_point?).ok()?;
    char::from_u32(cp).map(String::from)
}

impl Lesson {
    pub fn to_record(&self) -> LessonRecord {
        LessonRecord {
            timestamp: self.time_stamp.clone(),
            layout: self.layout.clone(),
            text_type: self.text_type.clone(),
            length: self.length,
            time_ms: self.time,
            errors: self.errors,
            speed: self.speed,
        }
    }

    /// One row per histogram entry; an absent histogram yields none.
    pub fn key_events(&self) -> Vec<KeyEvent> {
        self.histogram
            .iter()
            .flatten()
            .map(|h| KeyEvent {
                timestamp: self.time_stamp.clone(),
                code_point: h.code_point,
                key: decode_code_point(h.code_point),
                hit_count: h.hit_count,
                miss_count: h.miss_count,
                time_to_type_ms: h.time_to_type,
            })
            .collect()
    }
}

/// Append the lessons newer than the store's latest one.
///
/// With `reset`, the raw tables are emptied first and every lesson in the
/// export is loaded. The whole batch is one transaction.
pub fn import_lessons(conn: &Connection, lessons: &[Lesson], reset: bool) -> Result<ImportOutcome> {
    let tx = conn
        .unchecked_transaction()
        .context("failed to start import transaction")?;

    let last_timestamp = if reset {
        db::clear_raw_tables(&tx)?;
        None
    } else {
        db::latest_lesson_timestamp(&tx)?
    };
    tracing::info!(last_timestamp = ?last_timestamp, reset, "latest stored lesson");

    let new_lessons = filter_new_lessons(lessons, last_timestamp.as_deref());
    if new_lessons.is_empty() {
        if reset {
            // The clear still has to persist.
            tx.commit().context("failed to commit raw table reset")?;
            tracing::info!("raw tables cleared, export holds no lessons");
        }
        return Ok(ImportOutcome::NothingNew {
            total_in_export: lessons.len(),
        });
    }

    let mut key_events = 0;
    let mut undecodable = 0;
    for lesson in &new_lessons {
        db::insert_lesson(&tx, &lesson.to_record())?;
        for event in lesson.key_events() {
            if event.key.is_none() {
                undecodable += 1;
            }
            db::insert_key_event(&tx, &event)?;
            key_events += 1;
        }
    }

    if undecodable > 0 {
        tracing::warn!(undecodable, "some histogram code points are not valid characters");
    }

    tx.commit().context("failed to commit import")?;

    Ok(ImportOutcome::Imported {
        total_in_export: lessons.len(),
        lessons: new_lessons.len(),
        key_events,
    })
}

/// Load the export at `path` and import it into the store.
pub fn import_file(conn: &Connection, path: &Utf8Path, reset: bool) -> Result<ImportOutcome> {
    let lessons = load_lessons(path)?;
    tracing::debug!(%path, count = lessons.len(), "loaded lesson export");
    import_lessons(conn, &lessons, reset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    const EXPORT: &str = r#"[
        {
            "timeStamp": "2025-01-01T09:00:00.000Z",
            "layout": "en-us",
            "textType": "generated",
            "length": 100,
            "time": 30000,
            "errors": 4,
            "speed": 200.0,
            "histogram": [
                {"codePoint": 97, "hitCount": 10, "missCount": 1, "timeToType": 180},
                {"codePoint": 98, "hitCount": 5, "missCount": 0, "timeToType": 220}
            ]
        },
        {
            "timeStamp": "2025-01-02T09:00:00.000Z",
            "layout": "en-us",
            "textType": "generated",
            "length": 50,
            "time": 20000,
            "errors": 1,
            "speed": 150
        }
    ]"#;

    #[test]
    fn test_decode_code_point() {
        assert_eq!(decode_code_point(Some(97)).as_deref(), Some("a"));
        assert_eq!(decode_code_point(Some(0x20AC)).as_deref(), Some("€"));
        assert_eq!(decode_code_point(Some(-1)), None);
        assert_eq!(decode_code_point(Some(0xD800)), None);
        assert_eq!(decode_code_point(Some(0x110000)), None);
        assert_eq!(decode_code_point(None), None);
    }

    #[test]
    fn test_parse_rejects_non_array_root() {
        let err = parse_lessons(r#"{"timeStamp": "2025-01-01"}"#).unwrap_err();
        assert!(err.contains("top-level JSON array"), "{}", err);
    }

    #[test]
    fn test_parse_rejects_lesson_without_timestamp() {
        let err = parse_lessons(r#"[{"length": 10}]"#).unwrap_err();
        assert!(err.contains("index 0"), "{}", err);
    }

    #[test]
    fn test_filter_new_lessons() {
        let lessons = parse_lessons(EXPORT).unwrap();

        assert_eq!(filter_new_lessons(&lessons, None).len(), 2);

        let newer = filter_new_lessons(&lessons, Some("2025-01-01T09:00:00.000Z"));
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].time_stamp, "2025-01-02T09:00:00.000Z");

        assert!(filter_new_lessons(&lessons, Some("2025-01-02T09:00:00.000Z")).is_empty());
    }

    #[test]
    fn test_histogram_fan_out() {
        let lessons = parse_lessons(EXPORT).unwrap();

        let events = lessons[0].key_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.timestamp == "2025-01-01T09:00:00.000Z"));
        assert_eq!(events[0].key.as_deref(), Some("a"));
        assert_eq!(events[0].time_to_type_ms, Some(180.0));

        assert!(lessons[1].key_events().is_empty());
    }

    #[test]
    fn test_import_is_idempotent() {
        let conn = test_conn();
        let lessons = parse_lessons(EXPORT).unwrap();

        let first = import_lessons(&conn, &lessons, false).unwrap();
        assert_eq!(
            first,
            ImportOutcome::Imported {
                total_in_export: 2,
                lessons: 2,
                key_events: 2
            }
        );

        let second = import_lessons(&conn, &lessons, false).unwrap();
        assert_eq!(second, ImportOutcome::NothingNew { total_in_export: 2 });

        let counts = db::raw_counts(&conn).unwrap();
        assert_eq!(counts.lessons, 2);
        assert_eq!(counts.key_events, 2);
    }

    #[test]
    fn test_import_reset_reloads_everything() {
        let conn = test_conn();
        let lessons = parse_lessons(EXPORT).unwrap();
        import_lessons(&conn, &lessons, false).unwrap();

        let outcome = import_lessons(&conn, &lessons, true).unwrap();
        assert!(matches!(outcome, ImportOutcome::Imported { lessons: 2, .. }));
        assert_eq!(db::raw_counts(&conn).unwrap().lessons, 2);
    }

    #[test]
    fn test_reset_with_empty_export_clears_raw_tables() {
        let conn = test_conn();
        import_lessons(&conn, &parse_lessons(EXPORT).unwrap(), false).unwrap();

        let outcome = import_lessons(&conn, &parse_lessons("[]").unwrap(), true).unwrap();
        assert_eq!(outcome, ImportOutcome::NothingNew { total_in_export: 0 });

        let counts = db::raw_counts(&conn).unwrap();
        assert_eq!(counts.lessons, 0);
        assert_eq!(counts.key_events, 0);
        assert_eq!(db::latest_lesson_timestamp(&conn).unwrap(), None);
    }

    #[test]
    fn test_failed_insert_rolls_back_whole_batch() {
        let conn = test_conn();
        import_lessons(&conn, &parse_lessons(EXPORT).unwrap(), false).unwrap();

        conn.execute_batch(
            "CREATE TRIGGER reject_negative_hits BEFORE INSERT ON keystats_raw
             WHEN NEW.hitCount < 0
             BEGIN SELECT RAISE(ABORT, 'negative hit count'); END;",
        )
        .unwrap();

        // The first new lesson inserts cleanly; the second one is rejected.
        let lessons = parse_lessons(
            r#"[
                {"timeStamp": "2025-01-03T09:00:00.000Z",
                 "histogram": [{"codePoint": 99, "hitCount": 4, "missCount": 0, "timeToType": 120}]},
                {"timeStamp": "2025-01-04T09:00:00.000Z",
                 "histogram": [{"codePoint": 100, "hitCount": -1, "missCount": 0, "timeToType": 120}]}
            ]"#,
        )
        .unwrap();
        let err = import_lessons(&conn, &lessons, false).unwrap_err();
        assert!(format!("{:#}", err).contains("negative hit count"), "{:#}", err);

        let counts = db::raw_counts(&conn).unwrap();
        assert_eq!(counts.lessons, 2);
        assert_eq!(counts.key_events, 2);
        assert_eq!(
            db::latest_lesson_timestamp(&conn).unwrap().as_deref(),
            Some("2025-01-02T09:00:00.000Z")
        );
    }

    #[test]
    fn test_missing_hit_count_is_stored_as_null() {
        let conn = test_conn();
        let lessons = parse_lessons(
            r#"[{"timeStamp": "2025-01-01T09:00:00.000Z",
                 "histogram": [{"codePoint": 97, "missCount": 5, "timeToType": 100}]}]"#,
        )
        .unwrap();
        import_lessons(&conn, &lessons, false).unwrap();

        let (hits, misses): (Option<i64>, Option<i64>) = conn
            .query_row("SELECT hitCount, missCount FROM keystats_raw", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(hits, None);
        assert_eq!(misses, Some(5));

        let keys = crate::keys::compute_key_metrics(&conn).unwrap();
        assert_eq!(keys[0].attempts, 5);
        assert_eq!(keys[0].miss_rate, 1.0);
    }

    #[test]
    fn test_invalid_code_point_is_stored_as_null_key() {
        let conn = test_conn();
        let lessons = parse_lessons(
            r#"[{"timeStamp": "2025-01-01T09:00:00.000Z",
                 "histogram": [{"codePoint": -5, "hitCount": 1, "missCount": 0, "timeToType": 100}]}]"#,
        )
        .unwrap();

        import_lessons(&conn, &lessons, false).unwrap();

        let key: Option<String> = conn
            .query_row("SELECT key FROM keystats_raw", [], |row| row.get(0))
            .unwrap();
        assert_eq!(key, None);
    }
}
