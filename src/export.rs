// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CSV artifacts for computed metrics.

use crate::{aggregate::DailyMetric, keys::KeyMetric};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::File,
    io::{BufWriter, Write},
};

pub const DAILY_METRICS_FILE: &str = "daily_metrics.csv";
pub const KEY_METRICS_FILE: &str = "key_metrics.csv";
pub const WEAK_KEYS_FILE: &str = "weak_keys.csv";

const DAILY_COLUMNS: &[&str] = &[
    "date",
    "num_lessons",
    "total_chars",
    "total_errors",
    "total_keystrokes",
    "avg_wpm",
    "avg_accuracy",
    "error_rate",
    "avg_latency",
    "ttfe",
    "ttke",
    "rolling_7d_wpm",
    "rolling_30d_wpm",
    "rolling_7d_error_rate",
    "rolling_30d_error_rate",
    "rolling_7d_latency",
];

const KEY_COLUMNS: &[&str] = &[
    "key",
    "attempts",
    "errors",
    "miss_rate",
    "avg_latency",
    "last_timestamp",
    "ttke",
    "weak_score",
];

/// Quote a field if it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Floats always carry a decimal point, so `40` is written as `40.0`.
fn format_f64(value: f64) -> String {
    let s = value.to_string();
    if value.is_finite() && !s.contains(['.', 'e']) {
        format!("{}.0", s)
    } else {
        s
    }
}

fn opt_f64(value: Option<f64>) -> String {
    value.map(format_f64).unwrap_or_default()
}

fn daily_record(d: &DailyMetric) -> Vec<String> {
    vec![
        escape(&d.date),
        d.num_lessons.to_string(),
        d.total_chars.to_string(),
        d.total_errors.to_string(),
        d.total_keystrokes.to_string(),
        opt_f64(d.avg_wpm),
        opt_f64(d.avg_accuracy),
        opt_f64(d.error_rate),
        opt_f64(d.avg_latency),
        opt_f64(d.ttfe),
        opt_f64(d.ttke),
        opt_f64(d.rolling_7d_wpm),
        opt_f64(d.rolling_30d_wpm),
        opt_f64(d.rolling_7d_error_rate),
        opt_f64(d.rolling_30d_error_rate),
        opt_f64(d.rolling_7d_latency),
    ]
}

fn key_record(k: &KeyMetric) -> Vec<String> {
    vec![
        escape(&k.key),
        k.attempts.to_string(),
        k.errors.to_string(),
        format_f64(k.miss_rate),
        opt_f64(k.avg_latency),
        k.last_timestamp.as_deref().map(escape).unwrap_or_default(),
        opt_f64(k.ttke),
        format_f64(k.weak_score),
    ]
}

fn write_csv(
    output: &Utf8Path,
    columns: &[&str],
    records: impl Iterator<Item = Vec<String>>,
) -> Result<()> {
    let file = File::create(output.as_std_path())
        .with_context(|| format!("failed to create file at {}", output))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "{}", columns.join(","))?;
    for values in records {
        writeln!(writer, "{}", values.join(","))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", output))?;
    Ok(())
}

pub fn write_daily_csv(output: &Utf8Path, daily: &[DailyMetric]) -> Result<()> {
    write_csv(output, DAILY_COLUMNS, daily.iter().map(daily_record))
}

pub fn write_keys_csv(output: &Utf8Path, keys: &[KeyMetric]) -> Result<()> {
    write_csv(output, KEY_COLUMNS, keys.iter().map(key_record))
}

/// Write all CSV artifacts into `output_dir` and return the paths written.
///
/// `weak_keys.csv` is always written, header-only when no key qualifies, so a
/// ranking from an earlier build never outlives its source data.
pub fn export_all(
    output_dir: &Utf8Path,
    daily: &[DailyMetric],
    keys: &[KeyMetric],
    weak_keys: &[KeyMetric],
) -> Result<Vec<Utf8PathBuf>> {
    std::fs::create_dir_all(output_dir.as_std_path())
        .with_context(|| format!("failed to create output directory at {}", output_dir))?;

    let mut written = Vec::new();

    let daily_path = output_dir.join(DAILY_METRICS_FILE);
    write_daily_csv(&daily_path, daily)?;
    written.push(daily_path);

    let keys_path = output_dir.join(KEY_METRICS_FILE);
    write_keys_csv(&keys_path, keys)?;
    written.push(keys_path);

    if weak_keys.is_empty() {
        tracing::info!("no key meets the weak-key threshold, {} has no rows", WEAK_KEYS_FILE);
    }
    let weak_path = output_dir.join(WEAK_KEYS_FILE);
    write_keys_csv(&weak_path, weak_keys)?;
    written.push(weak_path);

    Ok(written)
}
