// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Declared argument patterns with scripted responses and call-count
//! constraints.

use crate::args::Arguments;
use crate::call::Call;
use parking_lot::Mutex;
use std::path::PathBuf;

/// Sentinel for [`times`](ExpectationHandle::times): the expectation may be
/// matched any number of times and is always satisfied.
pub const INFINITE_TIMES: i32 = -1;

/// One scripted action, executed in declaration order on match.
pub(crate) enum Action {
    WriteStdout(Vec<u8>),
    WriteStderr(Vec<u8>),
    CallFunc(Box<dyn Fn(&mut Call) + Send>),
}

/// How a matched call finishes once the actions have run.
#[derive(Clone, Debug)]
pub(crate) enum Terminal {
    Exit(i32),
    Passthrough(PathBuf),
}

/// A declared pattern plus its scripted response and bookkeeping.
pub(crate) struct Expectation {
    pub(crate) arguments: Arguments,
    pub(crate) actions: Vec<Action>,
    /// Explicitly declared terminal; `None` falls back to the mock's
    /// passthrough, or exit 0.
    pub(crate) terminal: Option<Terminal>,
    pub(crate) expected_calls: i32,
    pub(crate) observed_calls: u32,
}

impl Expectation {
    pub(crate) fn new(arguments: Arguments) -> Self {
        Self {
            arguments,
            actions: Vec::new(),
            terminal: None,
            expected_calls: 1,
            observed_calls: 0,
        }
    }

    /// A saturated expectation no longer participates in matching.
    pub(crate) fn saturated(&self) -> bool {
        self.expected_calls != INFINITE_TIMES && self.observed_calls >= self.expected_calls as u32
    }

    /// Whether the observed count satisfies the declared constraint.
    pub(crate) fn satisfied(&self) -> bool {
        self.expected_calls == INFINITE_TIMES || self.observed_calls == self.expected_calls as u32
    }
}

/// Fluent handle onto an expectation declared with
/// [`Mock::expect`](crate::Mock::expect). All methods return the handle so
/// declarations chain.
pub struct ExpectationHandle<'a> {
    list: &'a Mutex<Vec<Expectation>>,
    index: usize,
}

impl<'a> ExpectationHandle<'a> {
    pub(crate) fn new(list: &'a Mutex<Vec<Expectation>>, index: usize) -> Self {
        Self { list, index }
    }

    fn with(self, mutate: impl FnOnce(&mut Expectation)) -> Self {
        mutate(&mut self.list.lock()[self.index]);
        self
    }

    /// Append an action writing `bytes` to the invocation's stdout.
    pub fn and_write_to_stdout(self, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        self.with(|expectation| expectation.actions.push(Action::WriteStdout(bytes)))
    }

    /// Append an action writing `bytes` to the invocation's stderr.
    pub fn and_write_to_stderr(self, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        self.with(|expectation| expectation.actions.push(Action::WriteStderr(bytes)))
    }

    /// Append a callback receiving the [`Call`]. The callback runs on the
    /// mock's dispatcher thread and is free to read stdin, write both output
    /// streams, and call [`Call::exit`] itself.
    pub fn and_call_func(self, func: impl Fn(&mut Call) + Send + 'static) -> Self {
        self.with(|expectation| expectation.actions.push(Action::CallFunc(Box::new(func))))
    }

    /// Exit the matched call with `code` once the actions have run. Without
    /// this the call exits 0. Overrides an earlier passthrough declaration.
    pub fn and_exit_with(self, code: i32) -> Self {
        self.with(|expectation| expectation.terminal = Some(Terminal::Exit(code)))
    }

    /// Delegate the matched call to the binary at `path`, wiring the call's
    /// streams through and propagating its exit status. Overrides an earlier
    /// `and_exit_with`.
    pub fn and_passthrough_to_local_command(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.with(|expectation| expectation.terminal = Some(Terminal::Passthrough(path)))
    }

    /// Require the expectation to match exactly `n` invocations, or any
    /// number with [`INFINITE_TIMES`]. Defaults to exactly one.
    pub fn times(self, n: i32) -> Self {
        let n = if n < 0 { INFINITE_TIMES } else { n };
        self.with(|expectation| expectation.expected_calls = n)
    }
}

#[cfg(test)]
#[path = "expectation_tests.rs"]
mod tests;
