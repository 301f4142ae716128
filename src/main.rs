// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typing practice statistics collector.

fn main() -> anyhow::Result<()> {
    typing_stats_collector::dispatch::dispatch()
}
