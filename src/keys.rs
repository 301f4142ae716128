// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-key metrics and weak-key ranking.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;

const MISS_RATE_WEIGHT: f64 = 0.6;
const LATENCY_WEIGHT: f64 = 0.3;
const RARITY_WEIGHT: f64 = 0.1;

/// Keys with fewer attempts than this get the rarity penalty.
pub const RARITY_THRESHOLD: i64 = 200;

/// Percentile of average latency that maps to a normalized latency of 1.0.
const LATENCY_PERCENTILE: f64 = 95.0;

/// Metrics for one key across all lessons.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMetric {
    pub key: String,
    /// Hits plus misses.
    pub attempts: i64,
    pub errors: i64,
    /// `errors / attempts`, exactly 0.0 for a key with no attempts.
    pub miss_rate: f64,
    pub avg_latency: Option<f64>,
    pub last_timestamp: Option<String>,
    /// Fastest latency among events where the key was missed.
    pub ttke: Option<f64>,
    pub weak_score: f64,
}

/// Compute one row per distinct, non-empty key, ordered by key.
pub fn compute_key_metrics(conn: &Connection) -> Result<Vec<KeyMetric>> {
    let mut stmt = conn.prepare(
        "SELECT key,
                SUM(COALESCE(hitCount, 0) + COALESCE(missCount, 0)),
                SUM(COALESCE(missCount, 0)),
                AVG(timeToType_ms),
                MAX(timeStamp)
         FROM keystats_raw
         WHERE key IS NOT NULL AND key <> ''
         GROUP BY key
         ORDER BY key",
    )?;
    let mut metrics = stmt
        .query_map([], |row| {
            let attempts = row.get::<_, Option<i64>>(1)?.unwrap_or(0);
            let errors = row.get::<_, Option<i64>>(2)?.unwrap_or(0);
            Ok(KeyMetric {
                key: row.get(0)?,
                attempts,
                errors,
                miss_rate: miss_rate(errors, attempts),
                avg_latency: row.get(3)?,
                last_timestamp: row.get(4)?,
                ttke: None,
                weak_score: 0.0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()
        .context("failed to read key totals")?;

    let mut stmt = conn.prepare(
        "SELECT key, MIN(timeToType_ms)
         FROM keystats_raw
         WHERE key IS NOT NULL AND key <> '' AND missCount > 0
         GROUP BY key",
    )?;
    let ttke: HashMap<String, Option<f64>> = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<f64>>(1)?))
        })?
        .collect::<Result<_, _>>()
        .context("failed to read key TTKE")?;

    for metric in &mut metrics {
        metric.ttke = ttke.get(&metric.key).copied().flatten();
    }

    let scores = weak_scores(&metrics);
    for (metric, score) in metrics.iter_mut().zip(scores) {
        metric.weak_score = score;
    }

    tracing::debug!(keys = metrics.len(), "computed key metrics");
    Ok(metrics)
}

pub fn miss_rate(errors: i64, attempts: i64) -> f64 {
    if attempts > 0 {
        errors as f64 / attempts as f64
    } else {
        0.0
    }
}

/// Composite difficulty score for each key.
///
/// `0.6 * miss_rate + 0.3 * normalized latency + 0.1 * rarity penalty`.
/// Latency is normalized by the 95th percentile across keys, after filling
/// missing values with the median. A key with no latency at all across the
/// whole set contributes nothing for latency.
pub fn weak_scores(metrics: &[KeyMetric]) -> Vec<f64> {
    let known: Vec<f64> = metrics.iter().filter_map(|m| m.avg_latency).collect();
    let fill = median(&known);

    let latencies: Vec<Option<f64>> = metrics.iter().map(|m| m.avg_latency.or(fill)).collect();
    let filled: Vec<f64> = latencies.iter().flatten().copied().collect();
    let scale = match percentile(&filled, LATENCY_PERCENTILE) {
        Some(p) if p > 0.0 => p,
        _ => 1.0,
    };

    metrics
        .iter()
        .zip(latencies)
        .map(|(m, latency)| {
            let miss = m.miss_rate.clamp(0.0, 1.0);
            let norm_latency = latency.map_or(0.0, |l| (l / scale).clamp(0.0, 1.0));
            let rarity = if m.attempts < RARITY_THRESHOLD { 1.0 } else { 0.0 };
            MISS_RATE_WEIGHT * miss + LATENCY_WEIGHT * norm_latency + RARITY_WEIGHT * rarity
        })
        .collect()
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    v
}

fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Percentile with linear interpolation between the closest ranks.
fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    let rank = (q / 100.0) * (v.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(v[lo] + (v[hi] - v[lo]) * (rank - lo as f64))
}

/// The `top_n` keys with the highest weak score among those with at least
/// `min_attempts` attempts. Ties keep key order.
pub fn select_weak_keys(metrics: &[KeyMetric], min_attempts: i64, top_n: usize) -> Vec<KeyMetric> {
    let mut candidates: Vec<KeyMetric> = metrics
        .iter()
        .filter(|m| m.attempts >= min_attempts)
        .cloned()
        .collect();
    candidates.sort_by(|a, b| b.weak_score.total_cmp(&a.weak_score));
    candidates.truncate(top_n);
    candidates
}
