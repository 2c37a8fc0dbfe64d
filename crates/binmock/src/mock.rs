// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! A disk-resident fake executable bound to controller-side expectations.

use crate::args::Arguments;
use crate::call::Call;
use crate::compile::CompileError;
use crate::expectation::{Action, Expectation, ExpectationHandle, Terminal};
use crate::proxy::Proxy;
use crate::reporter::Reporter;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// A compiled, placed executable whose behavior the test scripts.
///
/// Declare expectations with [`expect`](Mock::expect) before the program
/// under test runs the binary, then verify with [`check`](Mock::check).
/// [`close`](Mock::close) (or drop) tears the placement down.
pub struct Mock {
    shared: Arc<MockShared>,
    proxy: Proxy,
    dispatcher: Option<thread::JoinHandle<()>>,
}

struct MockShared {
    name: String,
    expected: Mutex<Vec<Expectation>>,
    unexpected: Mutex<Vec<Vec<String>>>,
    failures: Mutex<Vec<String>>,
    passthrough: Mutex<Option<PathBuf>>,
}

impl Mock {
    /// Compile and place a mock named `name`, and start its dispatcher.
    ///
    /// The binary lands in a fresh temp directory under `name` (plus the
    /// platform executable suffix); nothing of the failed setup is retained
    /// on error.
    pub fn new(name: &str) -> Result<Self, CompileError> {
        let mut proxy = Proxy::compile(name)?;
        let shared = Arc::new(MockShared {
            name: name.to_string(),
            expected: Mutex::new(Vec::new()),
            unexpected: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            passthrough: Mutex::new(None),
        });
        let dispatcher = proxy.take_calls().map(|mut calls| {
            let shared = shared.clone();
            thread::spawn(move || {
                while let Some(call) = calls.blocking_recv() {
                    dispatch(&shared, call);
                }
            })
        });
        Ok(Self {
            shared,
            proxy,
            dispatcher,
        })
    }

    /// Absolute path of the placed binary.
    pub fn path(&self) -> &Path {
        self.proxy.path()
    }

    /// The mock's logical name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Number of invocations opened against this mock, matched or not.
    pub fn call_count(&self) -> u64 {
        self.proxy.call_count()
    }

    /// Declare an expectation for an invocation whose arguments match
    /// `args`, one slot per positional argument ([`match_any`](crate::match_any)
    /// slots accept anything). Returns a fluent handle for scripting the
    /// response; by default the invocation exits 0 after matching once.
    pub fn expect<I>(&self, args: I) -> ExpectationHandle<'_>
    where
        I: IntoIterator,
        I::Item: Into<crate::args::ExpectedArg>,
    {
        let arguments = Arguments::new(args);
        debug!(mock = %self.shared.name, %arguments, "expectation declared");
        let mut expected = self.shared.expected.lock();
        expected.push(Expectation::new(arguments));
        let index = expected.len() - 1;
        drop(expected);
        ExpectationHandle::new(&self.shared.expected, index)
    }

    /// Delegate matched invocations to the real binary of this mock's name
    /// on the host search path.
    ///
    /// Expectations still gate admission and advance their counts; an
    /// expectation without an explicit terminal passes through, and an
    /// invocation matching no expectation passes through instead of being
    /// recorded as unexpected.
    pub fn passthrough_to_local_command(&self) -> &Self {
        let path =
            find_in_path(&self.shared.name).unwrap_or_else(|| PathBuf::from(&self.shared.name));
        debug!(mock = %self.shared.name, path = %path.display(), "passthrough enabled");
        *self.shared.passthrough.lock() = Some(path);
        self
    }

    /// Verify the mock: every expectation's observed count satisfies its
    /// constraint and nothing unexpected was recorded. Failures go to
    /// `reporter.errorf`, informational detail to `reporter.logf`. Never
    /// panics.
    pub fn check(&self, reporter: &mut dyn Reporter) -> bool {
        verify(&self.shared, reporter)
    }

    /// Tear the mock down: stop accepting invocations, deregister from the
    /// server, join the dispatcher, and remove the temp directory.
    pub fn close(mut self) -> io::Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        let result = self.proxy.close();
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.join();
        }
        result
    }
}

impl Drop for Mock {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn dispatch(shared: &MockShared, mut call: Call) {
    debug!(mock = %shared.name, call = call.id(), args = ?call.args, "dispatching call");
    let mut expected = shared.expected.lock();
    let Some(expectation) = expected
        .iter_mut()
        .find(|e| !e.saturated() && e.arguments.matches(&call.args))
    else {
        drop(expected);
        unmatched(shared, call);
        return;
    };

    expectation.observed_calls += 1;
    debug!(
        mock = %shared.name,
        call = call.id(),
        pattern = %expectation.arguments,
        observed = expectation.observed_calls,
        "matched expectation"
    );
    for action in &expectation.actions {
        match action {
            Action::WriteStdout(bytes) => {
                if let Err(err) = call.stdout.write_all(bytes) {
                    debug!(mock = %shared.name, call = call.id(), %err, "stdout write dropped");
                }
            }
            Action::WriteStderr(bytes) => {
                if let Err(err) = call.stderr.write_all(bytes) {
                    debug!(mock = %shared.name, call = call.id(), %err, "stderr write dropped");
                }
            }
            Action::CallFunc(func) => func(&mut call),
        }
    }
    let terminal = expectation.terminal.clone();
    drop(expected);

    // A callback may have finished the call itself.
    if call.exited() {
        return;
    }
    match terminal.unwrap_or_else(|| default_terminal(shared)) {
        Terminal::Exit(code) => call.exit(code),
        Terminal::Passthrough(path) => run_passthrough(shared, &mut call, &path),
    }
}

fn unmatched(shared: &MockShared, mut call: Call) {
    if let Some(path) = shared.passthrough.lock().clone() {
        run_passthrough(shared, &mut call, &path);
        return;
    }
    debug!(mock = %shared.name, call = call.id(), args = ?call.args, "unexpected invocation");
    shared.unexpected.lock().push(call.args.clone());
    let _ = writeln!(
        call.stderr,
        "unexpected call to {} {}",
        shared.name,
        call.args.join(" ")
    );
    call.exit(1);
}

fn default_terminal(shared: &MockShared) -> Terminal {
    match shared.passthrough.lock().clone() {
        Some(path) => Terminal::Passthrough(path),
        None => Terminal::Exit(0),
    }
}

fn run_passthrough(shared: &MockShared, call: &mut Call, path: &Path) {
    if let Err(err) = call.passthrough(path) {
        shared
            .failures
            .lock()
            .push(format!("passthrough to {} failed: {err}", path.display()));
    }
}

fn verify(shared: &MockShared, reporter: &mut dyn Reporter) -> bool {
    let expected = shared.expected.lock();
    let unexpected = shared.unexpected.lock();
    let failures = shared.failures.lock();
    let mut ok = true;

    for expectation in expected.iter() {
        if expectation.satisfied() {
            reporter.logf(format_args!(
                "{} {} was called {} times",
                shared.name, expectation.arguments, expectation.observed_calls
            ));
        } else {
            reporter.errorf(format_args!(
                "expected {} {} to be called {} times, got {}",
                shared.name,
                expectation.arguments,
                expectation.expected_calls,
                expectation.observed_calls
            ));
            ok = false;
        }
    }

    // An unexpected invocation only fails verification when expectations
    // were declared; a mock with none still rejects calls but checks clean.
    if !expected.is_empty() {
        for args in unexpected.iter() {
            reporter.errorf(format_args!(
                "unexpected call to {} {}",
                shared.name,
                args.join(" ")
            ));
            ok = false;
        }
    }

    for failure in failures.iter() {
        reporter.errorf(format_args!("{failure}"));
        ok = false;
    }

    ok
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    let suffix = std::env::consts::EXE_SUFFIX;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !suffix.is_empty() {
            let candidate = dir.join(format!("{name}{suffix}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    })
}

#[cfg(test)]
#[path = "mock_tests.rs"]
mod tests;
