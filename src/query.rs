// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Console reports over the stored metrics.

use crate::{db, keys};
use anyhow::Result;
use rusqlite::Connection;

pub enum QueryKind {
    Daily { limit: usize },
    Keys { limit: usize },
    Weak { limit: usize, min_attempts: i64 },
    Latest,
}

pub fn run_query(conn: &Connection, query: QueryKind) -> Result<()> {
    match query {
        QueryKind::Daily { limit } => query_daily(conn, limit)?,
        QueryKind::Keys { limit } => query_keys(conn, limit)?,
        QueryKind::Weak {
            limit,
            min_attempts,
        } => query_weak(conn, limit, min_attempts)?,
        QueryKind::Latest => query_latest(conn)?,
    }
    Ok(())
}

fn query_daily(conn: &Connection, limit: usize) -> Result<()> {
    let rows = db::load_daily_metrics(conn)?;
    if rows.is_empty() {
        println!("\nNo daily metrics yet. Run `build` first.");
        return Ok(());
    }

    println!(
        "\n{:<12} {:>12} {:>8} {:>9} {:>10} {:>8} {:>8}",
        "Date", "Keystrokes", "WPM", "Accuracy", "Latency", "7d WPM", "30d WPM"
    );
    println!("{}", "=".repeat(73));

    let skip = rows.len().saturating_sub(limit);
    for row in rows.iter().skip(skip) {
        println!(
            "{:<12} {:>12} {:>8} {:>9} {:>10} {:>8} {:>8}",
            row.date,
            format_number(row.total_keystrokes.max(0) as u64),
            format_opt(row.avg_wpm, 1),
            format_percent(row.avg_accuracy),
            format_opt(row.avg_latency, 0),
            format_opt(row.rolling_7d_wpm, 1),
            format_opt(row.rolling_30d_wpm, 1),
        );
    }

    Ok(())
}

fn query_keys(conn: &Connection, limit: usize) -> Result<()> {
    let mut rows = db::load_key_metrics(conn)?;
    if rows.is_empty() {
        println!("\nNo key metrics yet. Run `build` first.");
        return Ok(());
    }
    rows.sort_by(|a, b| b.attempts.cmp(&a.attempts).then_with(|| a.key.cmp(&b.key)));

    println!(
        "\n{:<6} {:>10} {:>8} {:>10} {:>10}",
        "Key", "Attempts", "Errors", "Miss rate", "Latency"
    );
    println!("{}", "=".repeat(48));

    for row in rows.iter().take(limit) {
        println!(
            "{:<6} {:>10} {:>8} {:>10} {:>10}",
            display_key(&row.key),
            format_number(row.attempts.max(0) as u64),
            format_number(row.errors.max(0) as u64),
            format_percent(Some(row.miss_rate)),
            format_opt(row.avg_latency, 0),
        );
    }

    Ok(())
}

fn query_weak(conn: &Connection, limit: usize, min_attempts: i64) -> Result<()> {
    let metrics = keys::compute_key_metrics(conn)?;
    let weak = keys::select_weak_keys(&metrics, min_attempts, limit);
    if weak.is_empty() {
        println!("\nNo key has at least {} attempts.", min_attempts);
        return Ok(());
    }

    println!(
        "\n{:<6} {:>8} {:>10} {:>10} {:>8}",
        "Key", "Score", "Miss rate", "Latency", "TTKE"
    );
    println!("{}", "=".repeat(46));

    for key in &weak {
        println!(
            "{:<6} {:>8.3} {:>10} {:>10} {:>8}",
            display_key(&key.key),
            key.weak_score,
            format_percent(Some(key.miss_rate)),
            format_opt(key.avg_latency, 0),
            format_opt(key.ttke, 0),
        );
    }

    Ok(())
}

fn query_latest(conn: &Connection) -> Result<()> {
    println!("\nLatest statistics\n");

    let counts = db::raw_counts(conn)?;
    println!("Lessons:     {}", format_number(counts.lessons));
    println!("Key records: {}", format_number(counts.key_events));

    let (first, last): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(timeStamp), MAX(timeStamp) FROM lessons_raw",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    match (first, last) {
        (Some(first), Some(last)) => println!("\nData coverage: {} to {}", first, last),
        _ => println!("\nNo lessons imported yet."),
    }

    if let Some(day) = db::load_daily_metrics(conn)?.last() {
        println!("\nLatest day: {}", day.date);
        println!("  WPM:        {}", format_opt(day.avg_wpm, 1));
        println!("  Accuracy:   {}", format_percent(day.avg_accuracy));
        println!("  7d WPM:     {}", format_opt(day.rolling_7d_wpm, 1));
        println!("  30d WPM:    {}", format_opt(day.rolling_30d_wpm, 1));
    }

    Ok(())
}

/// Make whitespace keys visible in tables.
fn display_key(key: &str) -> String {
    match key {
        " " => "SPACE".to_string(),
        "\t" => "TAB".to_string(),
        "\n" => "ENTER".to_string(),
        other => other.to_string(),
    }
}

fn format_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}%", v * 100.0),
        None => "-".to_string(),
    }
}

/// Format a number with thousands separators.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_conn;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_opt(Some(41.256), 1), "41.3");
        assert_eq!(format_opt(None, 1), "-");
        assert_eq!(format_percent(Some(0.9667)), "96.67%");
        assert_eq!(display_key(" "), "SPACE");
        assert_eq!(display_key("a"), "a");
    }

    #[test]
    fn test_queries_on_empty_store() {
        let conn = test_conn();
        run_query(&conn, QueryKind::Daily { limit: 7 }).unwrap();
        run_query(&conn, QueryKind::Keys { limit: 7 }).unwrap();
        run_query(
            &conn,
            QueryKind::Weak {
                limit: 7,
                min_attempts: 200,
            },
        )
        .unwrap();
        run_query(&conn, QueryKind::Latest).unwrap();
    }
}
