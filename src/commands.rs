// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Command implementations.

use crate::{
    aggregate,
    config::{Config, WeakKeysConfig},
    db, export,
    import::{self, ImportOutcome},
    keys,
    publish::{self, PublishOutcome, Publisher},
};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use rusqlite::Connection;

/// Run the init command.
pub fn run_init(config: &Config) -> Result<()> {
    let database = &config.paths.database;
    println!("Initializing database at {}", database);
    db::init_db(database).context("failed to initialize database")?;
    println!("Database ready.");
    Ok(())
}

/// Run the import command.
pub fn run_import(config: &Config, reset: bool) -> Result<ImportOutcome> {
    let conn = db::init_db(&config.paths.database).context("failed to open database")?;
    import_into(&conn, &config.paths.input, reset)
}

fn import_into(conn: &Connection, input: &Utf8Path, reset: bool) -> Result<ImportOutcome> {
    println!("Importing lessons from {}", input);
    if reset {
        println!("  Resetting raw tables first");
    }

    let outcome = import::import_file(conn, input, reset)
        .with_context(|| format!("failed to import {}", input))?;

    match outcome {
        ImportOutcome::NothingNew { total_in_export } if reset => {
            println!(
                "  {} lessons in export. Raw tables cleared, nothing imported.",
                total_in_export
            );
        }
        ImportOutcome::NothingNew { total_in_export } => {
            println!(
                "  {} lessons in export, none newer than the store. Nothing to do.",
                total_in_export
            );
        }
        ImportOutcome::Imported {
            total_in_export,
            lessons,
            key_events,
        } => {
            println!("  {} lessons in export", total_in_export);
            println!(
                "  Imported {} lessons with {} key records",
                lessons, key_events
            );
        }
    }
    Ok(outcome)
}

/// Summary of a metrics build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub daily_rows: usize,
    pub key_rows: usize,
    pub weak_keys: usize,
    pub artifacts: Vec<Utf8PathBuf>,
}

/// Recompute derived tables from the raw store and export them.
pub fn build_metrics(
    conn: &Connection,
    output_dir: &Utf8Path,
    weak: WeakKeysConfig,
) -> Result<BuildReport> {
    let daily = aggregate::compute_daily_metrics(conn).context("failed to compute daily metrics")?;
    let key_metrics = keys::compute_key_metrics(conn).context("failed to compute key metrics")?;
    println!("  Daily rows: {}", daily.len());
    println!("  Key rows:   {}", key_metrics.len());

    let daily_rows: Vec<db::DailyMetricsRow> = daily.iter().map(Into::into).collect();
    db::replace_daily_metrics(conn, &daily_rows).context("failed to write daily_metrics")?;
    let key_rows: Vec<db::KeyMetricsRow> = key_metrics.iter().map(Into::into).collect();
    db::replace_key_metrics(conn, &key_rows).context("failed to write key_metrics")?;

    let weak_keys = keys::select_weak_keys(&key_metrics, weak.min_attempts, weak.top_n);
    let artifacts = export::export_all(output_dir, &daily, &key_metrics, &weak_keys)?;
    for path in &artifacts {
        println!("  Exported {}", path);
    }

    Ok(BuildReport {
        daily_rows: daily.len(),
        key_rows: key_metrics.len(),
        weak_keys: weak_keys.len(),
        artifacts,
    })
}

/// Run the build command.
pub fn run_build(config: &Config) -> Result<BuildReport> {
    let conn = db::init_db(&config.paths.database).context("failed to open database")?;
    println!("Building metrics from {}", config.paths.database);
    build_metrics(&conn, &config.paths.output_dir, config.weak_keys)
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub import: Option<ImportOutcome>,
    pub build: BuildReport,
    pub publish: Option<PublishOutcome>,
}

/// Run the full pipeline: import, build, then publish if a publisher is given.
///
/// A publishing failure is returned as an error, but the exported artifacts
/// and the store are already complete at that point.
pub fn run_pipeline(
    config: &Config,
    skip_import: bool,
    publisher: Option<&dyn Publisher>,
) -> Result<PipelineReport> {
    let conn = db::init_db(&config.paths.database).context("failed to open database")?;

    let import = if skip_import {
        None
    } else {
        println!("\n[1/3] Updating store from {}", config.paths.input);
        Some(import_into(&conn, &config.paths.input, false)?)
    };

    println!("\n[2/3] Rebuilding metrics");
    let build = build_metrics(&conn, &config.paths.output_dir, config.weak_keys)?;

    let publish = match publisher {
        None => {
            println!("\n[3/3] Publishing disabled");
            None
        }
        Some(publisher) => {
            println!("\n[3/3] Publishing artifacts");
            let message = publish::commit_message(Utc::now().date_naive());
            let outcome = publisher.publish(&build.artifacts, &message).map_err(|e| {
                tracing::warn!(error = %e, "publishing failed; exported artifacts are unaffected");
                e.context("metrics were exported, but publishing failed")
            })?;
            match outcome {
                PublishOutcome::NoChanges => println!("  No changes in artifacts, nothing to publish"),
                PublishOutcome::NothingCommitted => println!("  Nothing committed, skipped push"),
                PublishOutcome::Pushed => println!("  Pushed: {}", message),
            }
            Some(outcome)
        }
    };

    println!("\nPipeline complete.");
    Ok(PipelineReport {
        import,
        build,
        publish,
    })
}
