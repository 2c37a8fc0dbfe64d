// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Materializes the client binary a mock places on disk.
//!
//! The client source ships embedded in this crate and is compiled per mock
//! by `rustc` — no cargo involved, which is why the client depends only on
//! std. The server URL and proxy ID are baked into the binary by setting
//! them in the compiler's environment; the client source reads them with
//! `env!`.

use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::debug;

const CLIENT_SOURCE: &str = include_str!("client/main.rs");

// Names must match the `env!` invocations in src/client/main.rs.
const SERVER_URL_ENV: &str = "BINMOCK_SERVER_URL";
const PROXY_ID_ENV: &str = "BINMOCK_PROXY_ID";

/// Errors placing a mock binary on disk.
#[derive(Debug, Error)]
pub enum CompileError {
    /// The process-wide control server could not be started.
    #[error("failed to start control server: {0}")]
    Server(#[source] io::Error),

    /// Temp directories or the staged client source could not be created.
    #[error("failed to stage client build: {0}")]
    Workspace(#[source] io::Error),

    /// The compiler binary could not be launched at all.
    #[error("failed to run {compiler}: {source}")]
    Spawn {
        compiler: String,
        #[source]
        source: io::Error,
    },

    /// The compiler ran and rejected the client build.
    #[error("{compiler} exited with {status}:\n{stderr}")]
    Build {
        compiler: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Compile the embedded client to `output`, with `server_url` and `proxy_id`
/// baked in.
pub(crate) fn compile_client(
    output: &Path,
    server_url: &str,
    proxy_id: &str,
) -> Result<(), CompileError> {
    let staging = tempfile::Builder::new()
        .prefix("binmock-build")
        .tempdir()
        .map_err(CompileError::Workspace)?;
    let source = staging.path().join("client.rs");
    fs::write(&source, CLIENT_SOURCE).map_err(CompileError::Workspace)?;

    let compiler = compiler_binary();
    debug!(%compiler, output = %output.display(), proxy = proxy_id, "compiling client");
    let built = Command::new(&compiler)
        .arg("--edition=2021")
        .arg("--crate-name")
        .arg("binmock_client")
        .arg(&source)
        .arg("-o")
        .arg(output)
        .env(SERVER_URL_ENV, server_url)
        .env(PROXY_ID_ENV, proxy_id)
        .output()
        .map_err(|source| CompileError::Spawn {
            compiler: compiler.clone(),
            source,
        })?;

    if !built.status.success() {
        return Err(CompileError::Build {
            compiler,
            status: built.status,
            stderr: String::from_utf8_lossy(&built.stderr).into_owned(),
        });
    }
    Ok(())
}

/// `rustc`, unless `BINMOCK_RUSTC` names another toolchain binary.
fn compiler_binary() -> String {
    std::env::var("BINMOCK_RUSTC").unwrap_or_else(|_| "rustc".to_string())
}
