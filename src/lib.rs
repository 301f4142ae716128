// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typing practice statistics collector: imports keybr lesson exports into
//! SQLite and derives daily and per-key metrics.

pub mod aggregate;
pub mod commands;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod import;
pub mod keys;
pub mod logging;
pub mod publish;
pub mod query;
