// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Daily aggregation of typing statistics.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::BTreeMap;

/// Trailing window sizes, in rows with data (not calendar days).
pub const SHORT_WINDOW: usize = 7;
pub const LONG_WINDOW: usize = 30;

/// Characters per word when converting characters-per-minute to WPM.
const CHARS_PER_WORD: f64 = 5.0;

/// Metrics for one calendar day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyMetric {
    /// `YYYY-MM-DD`, the first ten characters of the lesson timestamps.
    pub date: String,
    pub num_lessons: i64,
    pub total_chars: i64,
    pub total_errors: i64,
    pub total_keystrokes: i64,
    pub avg_wpm: Option<f64>,
    pub avg_accuracy: Option<f64>,
    /// Undefined on days without typed characters.
    pub error_rate: Option<f64>,
    pub avg_latency: Option<f64>,
    /// Mean over the day's lessons of each lesson's fastest missed key.
    pub ttfe: Option<f64>,
    /// Fastest missed key of the day.
    pub ttke: Option<f64>,
    pub rolling_7d_wpm: Option<f64>,
    pub rolling_30d_wpm: Option<f64>,
    pub rolling_7d_error_rate: Option<f64>,
    pub rolling_30d_error_rate: Option<f64>,
    pub rolling_7d_latency: Option<f64>,
}

/// Compute one row per day present in either raw table, ordered by date.
///
/// Empty raw tables produce an empty result.
pub fn compute_daily_metrics(conn: &Connection) -> Result<Vec<DailyMetric>> {
    let mut days: BTreeMap<String, DailyMetric> = BTreeMap::new();

    fn day<'a>(days: &'a mut BTreeMap<String, DailyMetric>, date: String) -> &'a mut DailyMetric {
        days.entry(date.clone()).or_insert_with(|| DailyMetric {
            date,
            ..Default::default()
        })
    }

    // WPM is averaged per lesson so long lessons don't dominate.
    let mut stmt = conn.prepare(
        "SELECT substr(timeStamp, 1, 10) AS date,
                COUNT(*),
                SUM(length),
                SUM(errors),
                AVG(speed / ?1)
         FROM lessons_raw
         GROUP BY date",
    )?;
    let rows = stmt.query_map([CHARS_PER_WORD], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<i64>>(2)?,
            row.get::<_, Option<i64>>(3)?,
            row.get::<_, Option<f64>>(4)?,
        ))
    })?;
    for row in rows {
        let (date, num_lessons, total_chars, total_errors, avg_wpm) =
            row.context("failed to read daily lesson totals")?;
        let d = day(&mut days, date);
        d.num_lessons = num_lessons;
        d.total_chars = total_chars.unwrap_or(0);
        d.total_errors = total_errors.unwrap_or(0);
        d.avg_wpm = avg_wpm;
    }

    let mut stmt = conn.prepare(
        "SELECT substr(timeStamp, 1, 10) AS date,
                SUM(COALESCE(hitCount, 0) + COALESCE(missCount, 0)),
                AVG(timeToType_ms),
                MIN(CASE WHEN missCount > 0 THEN timeToType_ms END)
         FROM keystats_raw
         GROUP BY date",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
        ))
    })?;
    for row in rows {
        let (date, keystrokes, avg_latency, ttke) =
            row.context("failed to read daily keystroke totals")?;
        let d = day(&mut days, date);
        d.total_keystrokes = keystrokes.unwrap_or(0);
        d.avg_latency = avg_latency;
        d.ttke = ttke;
    }

    // Per lesson: fastest key with at least one miss. Per day: mean of those.
    let mut stmt = conn.prepare(
        "SELECT date, AVG(lesson_ttfe)
         FROM (
             SELECT substr(timeStamp, 1, 10) AS date,
                    MIN(timeToType_ms) AS lesson_ttfe
             FROM keystats_raw
             WHERE missCount > 0
             GROUP BY timeStamp
         )
         GROUP BY date",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
    })?;
    for row in rows {
        let (date, ttfe) = row.context("failed to read daily TTFE")?;
        // A date here always has key events, so it is already present.
        if let Some(d) = days.get_mut(&date) {
            d.ttfe = ttfe;
        }
    }

    let mut daily: Vec<DailyMetric> = days
        .into_values()
        .map(|mut d| {
            d.error_rate = error_rate(d.total_errors, d.total_chars);
            d.avg_accuracy = d.error_rate.map(|rate| 1.0 - rate);
            d
        })
        .collect();

    add_rolling_metrics(&mut daily);
    tracing::debug!(days = daily.len(), "computed daily metrics");
    Ok(daily)
}

/// Errors per typed character, or `None` when nothing was typed.
pub fn error_rate(errors: i64, chars: i64) -> Option<f64> {
    (chars > 0).then(|| errors as f64 / chars as f64)
}

/// Fill the rolling columns of rows already sorted by date.
pub fn add_rolling_metrics(daily: &mut [DailyMetric]) {
    let wpm: Vec<_> = daily.iter().map(|d| d.avg_wpm).collect();
    let errors: Vec<_> = daily.iter().map(|d| d.error_rate).collect();
    let latency: Vec<_> = daily.iter().map(|d| d.avg_latency).collect();

    let wpm_7 = rolling_mean(&wpm, SHORT_WINDOW);
    let wpm_30 = rolling_mean(&wpm, LONG_WINDOW);
    let err_7 = rolling_mean(&errors, SHORT_WINDOW);
    let err_30 = rolling_mean(&errors, LONG_WINDOW);
    let lat_7 = rolling_mean(&latency, SHORT_WINDOW);

    for (i, d) in daily.iter_mut().enumerate() {
        d.rolling_7d_wpm = wpm_7[i];
        d.rolling_30d_wpm = wpm_30[i];
        d.rolling_7d_error_rate = err_7[i];
        d.rolling_30d_error_rate = err_30[i];
        d.rolling_7d_latency = lat_7[i];
    }
}

/// Trailing mean over the last `window` rows.
///
/// Missing values are skipped. The window shrinks at the start of the series,
/// so a position is only `None` when its whole window is empty.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let (sum, count) = values[start..=i]
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, KeyEvent, LessonRecord, test_conn};

    const EPSILON: f64 = 1e-9;

    fn assert_close(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("value should be defined");
        assert!(
            (actual - expected).abs() < EPSILON,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn lesson(conn: &Connection, ts: &str, length: i64, errors: i64, speed: f64) {
        db::insert_lesson(
            conn,
            &LessonRecord {
                timestamp: ts.to_string(),
                layout: Some("en-us".to_string()),
                text_type: Some("generated".to_string()),
                length: Some(length),
                time_ms: Some(60_000),
                errors: Some(errors),
                speed: Some(speed),
            },
        )
        .unwrap();
    }

    fn key(conn: &Connection, ts: &str, key: &str, hits: i64, misses: i64, latency: f64) {
        db::insert_key_event(
            conn,
            &KeyEvent {
                timestamp: ts.to_string(),
                code_point: key.chars().next().map(|c| c as i64),
                key: Some(key.to_string()),
                hit_count: Some(hits),
                miss_count: Some(misses),
                time_to_type_ms: Some(latency),
            },
        )
        .unwrap();
    }

    #[test]
    fn test_empty_store_yields_no_rows() {
        let conn = test_conn();
        assert!(compute_daily_metrics(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_error_rate_and_accuracy_for_two_lessons() {
        let conn = test_conn();
        lesson(&conn, "2025-03-01T08:00:00.000Z", 100, 4, 250.0);
        lesson(&conn, "2025-03-01T20:00:00.000Z", 50, 1, 150.0);

        let daily = compute_daily_metrics(&conn).unwrap();
        assert_eq!(daily.len(), 1);
        let d = &daily[0];
        assert_eq!(d.date, "2025-03-01");
        assert_eq!(d.num_lessons, 2);
        assert_eq!(d.total_chars, 150);
        assert_close(d.error_rate, 5.0 / 150.0);
        assert_close(d.avg_accuracy, 1.0 - 5.0 / 150.0);
        // Mean of 50 and 30 WPM.
        assert_close(d.avg_wpm, 40.0);
    }

    #[test]
    fn test_date_only_in_key_events_is_kept() {
        let conn = test_conn();
        lesson(&conn, "2025-03-01T08:00:00.000Z", 100, 0, 200.0);
        key(&conn, "2025-03-02T08:00:00.000Z", "a", 8, 2, 150.0);

        let daily = compute_daily_metrics(&conn).unwrap();
        assert_eq!(daily.len(), 2);

        assert_eq!(daily[0].date, "2025-03-01");
        assert_eq!(daily[0].total_keystrokes, 0);
        assert_eq!(daily[0].avg_latency, None);
        assert_close(daily[0].error_rate, 0.0);

        let d = &daily[1];
        assert_eq!(d.date, "2025-03-02");
        assert_eq!(d.num_lessons, 0);
        assert_eq!(d.total_keystrokes, 10);
        assert_eq!(d.error_rate, None);
        assert_eq!(d.avg_accuracy, None);
        assert_eq!(d.avg_wpm, None);
        // Rolling WPM falls back to the previous day's value.
        assert_close(d.rolling_7d_wpm, 40.0);
    }

    #[test]
    fn test_ttfe_averages_per_lesson_minimums() {
        let conn = test_conn();
        let first = "2025-03-01T08:00:00.000Z";
        let second = "2025-03-01T09:00:00.000Z";
        lesson(&conn, first, 100, 2, 200.0);
        lesson(&conn, second, 100, 1, 200.0);

        key(&conn, first, "a", 10, 1, 300.0);
        key(&conn, first, "b", 10, 1, 200.0);
        key(&conn, first, "c", 10, 0, 50.0);
        key(&conn, second, "a", 10, 1, 400.0);

        let daily = compute_daily_metrics(&conn).unwrap();
        // Lesson minimums 200 and 400; key "c" never missed.
        assert_close(daily[0].ttfe, 300.0);
        assert_close(daily[0].ttke, 200.0);
        assert_eq!(daily[0].total_keystrokes, 43);
    }

    #[test]
    fn test_missing_counts_count_as_zero_keystrokes() {
        let conn = test_conn();
        let ts = "2025-03-01T08:00:00.000Z";
        key(&conn, ts, "a", 10, 2, 150.0);
        db::insert_key_event(
            &conn,
            &KeyEvent {
                timestamp: ts.to_string(),
                code_point: Some(98),
                key: Some("b".to_string()),
                hit_count: None,
                miss_count: Some(5),
                time_to_type_ms: None,
            },
        )
        .unwrap();

        let daily = compute_daily_metrics(&conn).unwrap();
        assert_eq!(daily[0].total_keystrokes, 17);
    }

    #[test]
    fn test_day_without_misses_has_no_ttfe() {
        let conn = test_conn();
        key(&conn, "2025-03-01T08:00:00.000Z", "a", 10, 0, 120.0);

        let daily = compute_daily_metrics(&conn).unwrap();
        assert_eq!(daily[0].ttfe, None);
        assert_eq!(daily[0].ttke, None);
    }

    #[test]
    fn test_rolling_window_shrinks_at_start() {
        let values = [Some(30.0), Some(40.0), Some(50.0)];
        let rolled = rolling_mean(&values, 7);
        assert_close(rolled[0], 30.0);
        assert_close(rolled[1], 35.0);
        assert_close(rolled[2], 40.0);
    }

    #[test]
    fn test_rolling_window_is_row_based() {
        let values: Vec<_> = (1..=10).map(|v| Some(v as f64)).collect();
        let rolled = rolling_mean(&values, 7);
        // Rows 4..=10.
        assert_close(rolled[9], 7.0);
    }

    #[test]
    fn test_rolling_window_skips_missing_values() {
        let rolled = rolling_mean(&[None, Some(10.0), None, Some(20.0)], 2);
        assert_eq!(rolled[0], None);
        assert_close(rolled[1], 10.0);
        assert_close(rolled[2], 10.0);
        assert_close(rolled[3], 20.0);
    }

    #[test]
    fn test_three_day_series_rolling_wpm() {
        let conn = test_conn();
        lesson(&conn, "2025-03-01T08:00:00.000Z", 100, 1, 150.0);
        lesson(&conn, "2025-03-02T08:00:00.000Z", 100, 1, 200.0);
        lesson(&conn, "2025-03-03T08:00:00.000Z", 100, 1, 250.0);

        let daily = compute_daily_metrics(&conn).unwrap();
        assert_close(daily[2].rolling_7d_wpm, 40.0);
        assert_close(daily[2].rolling_30d_wpm, 40.0);
        assert_close(daily[0].rolling_7d_wpm, 30.0);
    }

    #[test]
    fn test_recompute_is_deterministic() {
        let conn = test_conn();
        lesson(&conn, "2025-03-01T08:00:00.000Z", 120, 3, 210.0);
        key(&conn, "2025-03-01T08:00:00.000Z", "a", 10, 1, 130.0);
        lesson(&conn, "2025-03-04T08:00:00.000Z", 80, 0, 190.0);

        assert_eq!(
            compute_daily_metrics(&conn).unwrap(),
            compute_daily_metrics(&conn).unwrap()
        );
    }
}
