// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for import and derived-table writes.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Structural failures while loading a typing export.
///
/// All variants are fatal to a run. Raw tables are append-only, so a failed
/// import can simply be retried once the input is fixed.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The JSON export does not exist.
    #[error("input file not found: {0}")]
    NotFound(Utf8PathBuf),

    /// The JSON export exists but is not a list of lesson objects.
    #[error("invalid input format in {path}: {message}")]
    InvalidFormat { path: Utf8PathBuf, message: String },

    /// Any other failure reading the export.
    #[error("failed to read input file {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Violations of a derived table's contract, detected before writing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{table}: empty primary key at row {row}")]
    EmptyKey { table: &'static str, row: usize },

    #[error("{table}: duplicate primary key '{key}'")]
    DuplicateKey { table: &'static str, key: String },
}
