// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable fake executables for integration testing.
//!
//! `binmock` materializes a real binary on disk whose behavior is scripted
//! entirely from the test process: the arguments it accepts, the bytes it
//! writes to stdout and stderr, its side effects, and the exit code it
//! returns. When the program under test invokes the placed binary (directly,
//! through a child-process API, or by finding it on `PATH`), the binary
//! forwards the invocation to an in-process control server, which matches it
//! against declared expectations and dictates the response. After the test,
//! [`Mock::check`] verifies that every expectation was satisfied.
//!
//! ```no_run
//! use binmock::{Mock, Recording};
//! use std::process::Command;
//!
//! # fn main() -> Result<(), binmock::CompileError> {
//! let mock = Mock::new("git")?;
//! mock.expect(["fetch", "origin"])
//!     .and_write_to_stdout("Fetching origin\n")
//!     .and_exit_with(0);
//!
//! let output = Command::new(mock.path()).args(["fetch", "origin"]).output().unwrap();
//! assert!(output.status.success());
//!
//! let mut report = Recording::new();
//! assert!(mock.check(&mut report));
//! # Ok(())
//! # }
//! ```
//!
//! Compiling the placed binary requires a `rustc` on `PATH` (or named by the
//! `BINMOCK_RUSTC` environment variable).

pub mod args;
pub mod call;
mod compile;
pub mod expectation;
pub mod mock;
pub mod proxy;
pub mod reporter;
mod server;

pub use args::{match_any, Arguments, ExpectedArg};
pub use call::Call;
pub use compile::CompileError;
pub use expectation::{ExpectationHandle, INFINITE_TIMES};
pub use mock::Mock;
pub use proxy::Proxy;
pub use reporter::{Recording, Reporter};
