// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! One invocation of a placed binary, reified as an object the controller
//! scripts.

use bytes::{Buf, Bytes};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Chunks buffered per stream before a writer blocks on the client.
pub(crate) const STREAM_BUFFER: usize = 32;

/// Ceiling on the wait for the client to acknowledge the exit code, so a
/// vanished client cannot wedge the dispatcher.
const EXIT_ACK_TIMEOUT: Duration = Duration::from_secs(60);

/// A single invocation of the placed binary.
///
/// Carries the invocation's arguments (argv[0] already stripped by the
/// client), environment, working directory, and the three standard streams.
/// The controller scripts the response by writing `stdout`/`stderr`, reading
/// `stdin`, and finally calling [`exit`](Call::exit).
pub struct Call {
    id: u64,
    /// Arguments of the invocation, argv[1..].
    pub args: Vec<String>,
    /// Environment of the invocation, verbatim `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Working directory of the invocation.
    pub dir: PathBuf,
    /// What the invoking process wrote to the binary's stdin.
    pub stdin: CallStdin,
    /// Bytes written here appear on the binary's stdout.
    pub stdout: CallOutput,
    /// Bytes written here appear on the binary's stderr.
    pub stderr: CallOutput,
    exit: Option<oneshot::Sender<i32>>,
    done: Option<std_mpsc::Receiver<()>>,
}

/// The server-side ends of a call's channels, claimed one endpoint at a time.
pub(crate) struct ServerEnds {
    pub(crate) stdin: Option<mpsc::Sender<Bytes>>,
    pub(crate) stdout: Option<mpsc::Receiver<Bytes>>,
    pub(crate) stderr: Option<mpsc::Receiver<Bytes>>,
    pub(crate) exit: Option<oneshot::Receiver<i32>>,
    pub(crate) done: Option<std_mpsc::Sender<()>>,
}

/// Construct a call and the matching server-side channel ends.
pub(crate) fn open(id: u64, args: Vec<String>, env: Vec<String>, dir: String) -> (Call, ServerEnds) {
    let (stdin_tx, stdin_rx) = mpsc::channel(STREAM_BUFFER);
    let (stdout_tx, stdout_rx) = mpsc::channel(STREAM_BUFFER);
    let (stderr_tx, stderr_rx) = mpsc::channel(STREAM_BUFFER);
    let (exit_tx, exit_rx) = oneshot::channel();
    let (done_tx, done_rx) = std_mpsc::channel();

    let call = Call {
        id,
        args,
        env,
        dir: PathBuf::from(dir),
        stdin: CallStdin::new(stdin_rx),
        stdout: CallOutput::new(stdout_tx),
        stderr: CallOutput::new(stderr_tx),
        exit: Some(exit_tx),
        done: Some(done_rx),
    };
    let ends = ServerEnds {
        stdin: Some(stdin_tx),
        stdout: Some(stdout_rx),
        stderr: Some(stderr_rx),
        exit: Some(exit_rx),
        done: Some(done_tx),
    };
    (call, ends)
}

impl Call {
    /// Per-proxy call ID; gap-free and monotonic.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether [`exit`](Call::exit) has already run.
    pub fn exited(&self) -> bool {
        self.exit.is_none()
    }

    /// Case-insensitive lookup over the invocation's environment.
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            let (name, value) = entry.split_once('=')?;
            name.eq_ignore_ascii_case(key).then_some(value)
        })
    }

    /// Finish the call: close both output streams, hand the exit code to the
    /// server, and wait until the client has received it.
    ///
    /// By the time this returns, the invoking process observes the code, so
    /// verification run after the child-process API reports exit is
    /// deterministic. Calling it a second time is absorbed.
    pub fn exit(&mut self, code: i32) {
        let Some(exit) = self.exit.take() else {
            return;
        };
        self.stdout.close();
        self.stderr.close();
        debug!(call = self.id, code, "sending exit code");
        let _ = exit.send(code);
        if let Some(done) = self.done.take() {
            if done.recv_timeout(EXIT_ACK_TIMEOUT).is_err() {
                debug!(call = self.id, "client never acknowledged the exit code");
            }
        }
    }

    /// Run `path` with this call's arguments, environment, and working
    /// directory, the call's streams wired through, then exit with the
    /// child's status.
    ///
    /// A child that cannot be launched exits the call with code 1; the error
    /// is returned so the mock can record it as a verification failure.
    pub fn passthrough(&mut self, path: &Path) -> io::Result<()> {
        debug!(call = self.id, path = %path.display(), args = ?self.args, "passing call through");
        match self.run_child(path) {
            Ok(status) => {
                self.exit(exit_code(status));
                Ok(())
            }
            Err(err) => {
                let _ = writeln!(self.stderr, "failed to run {}: {}", path.display(), err);
                self.exit(1);
                Err(err)
            }
        }
    }

    fn run_child(&mut self, path: &Path) -> io::Result<ExitStatus> {
        let mut command = Command::new(path);
        command
            .args(&self.args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for entry in &self.env {
            if let Some((key, value)) = entry.split_once('=') {
                command.env(key, value);
            }
        }
        if !self.dir.as_os_str().is_empty() {
            command.current_dir(&self.dir);
        }
        let mut child = command.spawn()?;

        if let Some(mut sink) = child.stdin.take() {
            let mut source = std::mem::replace(&mut self.stdin, CallStdin::closed());
            // Detached: ends when the client's stdin reaches EOF or the
            // child closes its end. The child's exit must not wait on it.
            thread::spawn(move || {
                let _ = io::copy(&mut source, &mut sink);
            });
        }

        let mut child_stdout = child.stdout.take();
        let mut child_stderr = child.stderr.take();
        let stdout = &mut self.stdout;
        let stderr = &mut self.stderr;
        thread::scope(|scope| {
            scope.spawn(move || {
                if let Some(source) = child_stdout.as_mut() {
                    let _ = io::copy(source, stdout);
                }
            });
            scope.spawn(move || {
                if let Some(source) = child_stderr.as_mut() {
                    let _ = io::copy(source, stderr);
                }
            });
            child.wait()
        })
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

/// Readable end of the invocation's stdin.
///
/// Reads block until the client uploads more bytes; EOF on the client's
/// stdin surfaces as EOF here.
pub struct CallStdin {
    rx: Option<mpsc::Receiver<Bytes>>,
    buffer: Bytes,
}

impl CallStdin {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx: Some(rx),
            buffer: Bytes::new(),
        }
    }

    pub(crate) fn closed() -> Self {
        Self {
            rx: None,
            buffer: Bytes::new(),
        }
    }

    /// Stop reading; subsequent reads return EOF. Absorbs repeat closes.
    pub fn close(&mut self) {
        self.rx = None;
        self.buffer = Bytes::new();
    }
}

impl Read for CallStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.buffer.is_empty() {
            let Some(rx) = self.rx.as_mut() else {
                return Ok(0);
            };
            match rx.blocking_recv() {
                Some(chunk) => self.buffer = chunk,
                None => {
                    self.rx = None;
                    return Ok(0);
                }
            }
        }
        let n = buf.len().min(self.buffer.len());
        buf[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        Ok(n)
    }
}

/// Writable end of one of the invocation's output streams.
pub struct CallOutput {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl CallOutput {
    fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Close the stream; the client sees EOF. Absorbs repeat closes.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

impl Write for CallOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"));
        };
        tx.blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[path = "call_tests.rs"]
mod tests;
