// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Per-mock call intake: a compiled, placed client plus the channel its
//! invocations arrive on.

use crate::call::Call;
use crate::compile::{self, CompileError};
use crate::server::{self, ProxyState, Server};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// A placed client binary whose invocations arrive as [`Call`]s.
///
/// [`Mock`](crate::Mock) wraps a proxy with expectation matching; using a
/// proxy directly gives a raw stream of calls to script by hand.
pub struct Proxy {
    path: PathBuf,
    state: Arc<ProxyState>,
    server: Arc<Server>,
    calls: Option<mpsc::Receiver<Call>>,
    temp_dir: Option<TempDir>,
}

impl Proxy {
    /// Compile and place a client at `path`.
    ///
    /// A bare name is placed inside a fresh temp directory (removed on
    /// [`close`](Proxy::close)); an absolute path is used as given and never
    /// cleaned up. The platform executable suffix is appended where the
    /// platform requires one. Starts the process-wide control server on
    /// first use.
    pub fn compile(path: impl AsRef<Path>) -> Result<Self, CompileError> {
        let requested = path.as_ref();
        let (path, temp_dir) = if requested.is_absolute() {
            (requested.to_path_buf(), None)
        } else {
            let dir = tempfile::Builder::new()
                .prefix("binmock-")
                .tempdir()
                .map_err(CompileError::Workspace)?;
            (dir.path().join(requested), Some(dir))
        };
        let path = with_exe_suffix(path);

        let server = server::global().map_err(CompileError::Server)?;
        let (state, calls) = server.register_proxy();
        if let Err(err) = compile::compile_client(&path, server.base_url(), state.id()) {
            server.deregister_proxy(state.id());
            return Err(err);
        }
        Ok(Self {
            path,
            state,
            server,
            calls: Some(calls),
            temp_dir,
        })
    }

    /// Absolute location of the placed binary.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Server-scoped identifier embedded in the placed binary.
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Number of calls opened against this proxy, matched or not.
    pub fn call_count(&self) -> u64 {
        self.state.call_count()
    }

    /// Block until the next invocation arrives; `None` once the proxy is
    /// closed (or its call stream has been handed to a dispatcher).
    pub fn receive(&mut self) -> Option<Call> {
        self.calls.as_mut()?.blocking_recv()
    }

    pub(crate) fn take_calls(&mut self) -> Option<mpsc::Receiver<Call>> {
        self.calls.take()
    }

    /// Stop accepting invocations, deregister from the server, and remove
    /// the temp directory if one was created. The directory is removed even
    /// when deregistration has already happened.
    pub fn close(&mut self) -> io::Result<()> {
        self.state.shutdown();
        self.server.deregister_proxy(self.state.id());
        if let Some(dir) = self.temp_dir.take() {
            dir.close()?;
        }
        Ok(())
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.state.shutdown();
        self.server.deregister_proxy(self.state.id());
    }
}

fn with_exe_suffix(mut path: PathBuf) -> PathBuf {
    let suffix = std::env::consts::EXE_SUFFIX;
    if suffix.is_empty() {
        return path;
    }
    let already = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(suffix));
    if !already {
        if let Some(name) = path.file_name() {
            let mut name = name.to_os_string();
            name.push(suffix);
            path.set_file_name(name);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exe_suffix_applied_once() {
        let plain = with_exe_suffix(PathBuf::from("/tmp/mocks/git"));
        let again = with_exe_suffix(plain.clone());

        assert_eq!(plain, again);
        if std::env::consts::EXE_SUFFIX.is_empty() {
            assert_eq!(plain, PathBuf::from("/tmp/mocks/git"));
        } else {
            assert!(plain
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(std::env::consts::EXE_SUFFIX)));
        }
    }
}
