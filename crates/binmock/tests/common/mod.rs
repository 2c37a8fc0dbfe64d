// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for the end-to-end mock tests.

#![allow(dead_code)]

use tracing_subscriber::EnvFilter;

/// Route library debug events through the test harness; `RUST_LOG=debug`
/// shows the full call lifecycle on failure.
pub fn setup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
