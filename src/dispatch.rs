// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing and command dispatch.

use crate::{commands, config, db, logging, publish, query};
use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: Utf8PathBuf,

    /// Path to the SQLite database file (overrides the configuration)
    #[arg(short, long, global = true)]
    database: Option<Utf8PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Create the database and its schema
    Init,

    /// Import new lessons from a keybr JSON export
    Import {
        /// JSON export to read (overrides the configuration)
        #[arg(short, long)]
        input: Option<Utf8PathBuf>,

        /// Clear the raw tables and import every lesson in the export
        #[arg(long)]
        reset: bool,
    },

    /// Rebuild derived metrics and export them as CSV
    Build {
        /// Output directory for CSV files (overrides the configuration)
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Import, rebuild metrics, and optionally publish the CSV files
    Run {
        /// Commit and push the CSV files with git
        #[arg(long)]
        publish: bool,

        /// Skip importing and only rebuild from the store
        #[arg(long)]
        skip_import: bool,
    },

    /// Query typing statistics
    Query {
        #[command(subcommand)]
        query_type: QueryType,
    },
}

#[derive(Parser, Debug)]
enum QueryType {
    /// Show the most recent daily metrics
    Daily {
        /// Number of days to show
        #[arg(short = 'n', long, default_value = "14")]
        limit: usize,
    },

    /// Show per-key metrics, most practiced first
    Keys {
        /// Number of keys to show
        #[arg(short = 'n', long, default_value = "30")]
        limit: usize,
    },

    /// Show the weakest keys
    Weak {
        /// Number of keys to show (default: from configuration)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Minimum attempts for a key to be ranked (default: from configuration)
        #[arg(long)]
        min_attempts: Option<i64>,
    },

    /// Show a summary of the store
    Latest,
}

/// Parse arguments and dispatch to the appropriate command.
pub fn dispatch() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut config =
        config::Config::load_or_default(&args.config).context("failed to load configuration")?;
    if let Some(database) = args.database {
        config.paths.database = database;
    }

    match args.command {
        Command::Init => commands::run_init(&config)?,
        Command::Import { input, reset } => {
            if let Some(input) = input {
                config.paths.input = input;
            }
            commands::run_import(&config, reset)?;
        }
        Command::Build { output } => {
            if let Some(output) = output {
                config.paths.output_dir = output;
            }
            commands::run_build(&config)?;
        }
        Command::Run {
            publish: publish_flag,
            skip_import,
        } => {
            let git = publish::GitPublisher::new(config.publish.repo_root.clone());
            let publisher = (publish_flag || config.publish.enabled)
                .then_some(&git as &dyn publish::Publisher);
            commands::run_pipeline(&config, skip_import, publisher)?;
        }
        Command::Query { query_type } => {
            let conn = db::init_db(&config.paths.database).context("failed to open database")?;
            let query_kind = match query_type {
                QueryType::Daily { limit } => query::QueryKind::Daily { limit },
                QueryType::Keys { limit } => query::QueryKind::Keys { limit },
                QueryType::Weak {
                    limit,
                    min_attempts,
                } => query::QueryKind::Weak {
                    limit: limit.unwrap_or(config.weak_keys.top_n),
                    min_attempts: min_attempts.unwrap_or(config.weak_keys.min_attempts),
                },
                QueryType::Latest => query::QueryKind::Latest,
            };
            query::run_query(&conn, query_kind)?;
        }
    }

    Ok(())
}
