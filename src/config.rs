// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for typing statistics collection.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub weak_keys: WeakKeysConfig,
    pub publish: PublishConfig,
}

/// Locations of the store, the JSON export and the CSV artifacts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub database: Utf8PathBuf,
    pub input: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct WeakKeysConfig {
    /// Keys with fewer attempts are left out of the weak-key report.
    pub min_attempts: i64,
    /// Maximum number of keys in the report.
    pub top_n: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Publish after every `run`, without needing `--publish`.
    pub enabled: bool,
    /// Git working tree the artifacts are committed in.
    pub repo_root: Utf8PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            database: Utf8PathBuf::from("db/keybr.db"),
            input: Utf8PathBuf::from("raw/typing-data.json"),
            output_dir: Utf8PathBuf::from("output"),
        }
    }
}

impl Default for WeakKeysConfig {
    fn default() -> Self {
        Self {
            min_attempts: 200,
            top_n: 20,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo_root: Utf8PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path.as_std_path())
            .with_context(|| format!("failed to read config file at {}", path))?;

        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file at {}", path))
    }

    /// Load configuration, falling back to defaults if the file doesn't exist.
    pub fn load_or_default(path: &Utf8Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(%path, "config file not found, using defaults");
            Ok(Self::default())
        }
    }
}
