// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Publishing of exported artifacts.
//!
//! Publishing runs after the CSV files are written and only ever reads them,
//! so a failure here leaves local artifacts as they are.

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::NaiveDate;
use std::process::{Command, Output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// None of the artifacts differ from what is committed.
    NoChanges,
    /// `git commit` declined (for example nothing staged), so nothing was pushed.
    NothingCommitted,
    Pushed,
}

/// Something that can publish a set of artifact files.
pub trait Publisher {
    fn publish(&self, artifacts: &[Utf8PathBuf], message: &str) -> Result<PublishOutcome>;
}

/// Commit message for artifacts produced on `date`.
pub fn commit_message(date: NaiveDate) -> String {
    format!("Update metrics from {}", date.format("%Y-%m-%d"))
}

/// Commits and pushes artifacts with the `git` CLI.
pub struct GitPublisher {
    repo_root: Utf8PathBuf,
}

impl GitPublisher {
    pub fn new(repo_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn git(&self, args: &[&str]) -> Result<Output> {
        tracing::debug!(repo = %self.repo_root, ?args, "running git");
        Command::new("git")
            .args(args)
            .current_dir(self.repo_root.as_std_path())
            .output()
            .with_context(|| format!("failed to run git {}", args.join(" ")))
    }

    fn git_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.git(args)?;
        if !output.status.success() {
            anyhow::bail!(
                "git {} failed with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output)
    }
}

/// Absolute paths of the artifacts that exist. git accepts absolute
/// pathspecs inside the work tree, whatever the current directory is.
fn existing_paths(artifacts: &[Utf8PathBuf]) -> Vec<String> {
    artifacts
        .iter()
        .filter_map(|p| p.canonicalize_utf8().ok())
        .map(Utf8PathBuf::into_string)
        .collect()
}

impl Publisher for GitPublisher {
    fn publish(&self, artifacts: &[Utf8PathBuf], message: &str) -> Result<PublishOutcome> {
        let paths = existing_paths(artifacts);
        if paths.is_empty() {
            return Ok(PublishOutcome::NoChanges);
        }
        let path_args: Vec<&str> = paths.iter().map(String::as_str).collect();

        // Porcelain status also reports untracked files, unlike `git diff`.
        let mut status_args = vec!["status", "--porcelain", "--"];
        status_args.extend(&path_args);
        let status = self.git_checked(&status_args)?;
        if status.stdout.iter().all(u8::is_ascii_whitespace) {
            return Ok(PublishOutcome::NoChanges);
        }

        let mut add_args = vec!["add", "--"];
        add_args.extend(&path_args);
        self.git_checked(&add_args)?;

        let commit = self.git(&["commit", "-m", message])?;
        if !commit.status.success() {
            tracing::warn!(
                status = %commit.status,
                "git commit returned non-zero, skipping push"
            );
            return Ok(PublishOutcome::NothingCommitted);
        }

        self.git_checked(&["push"])?;
        Ok(PublishOutcome::Pushed)
    }
}
