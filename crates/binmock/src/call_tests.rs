// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn fixture(args: &[&str], env: &[&str]) -> (Call, ServerEnds) {
    open(
        1,
        args.iter().map(|s| s.to_string()).collect(),
        env.iter().map(|s| s.to_string()).collect(),
        "/tmp".to_string(),
    )
}

/// Simulates the server side of an exit: receive the code, acknowledge it.
/// Keeps the remaining channel ends alive until the acknowledgement.
fn acknowledge_exit(mut ends: ServerEnds) -> thread::JoinHandle<Option<i32>> {
    let exit = ends.exit.take().expect("exit receiver");
    let done = ends.done.take().expect("done sender");
    thread::spawn(move || {
        let code = exit.blocking_recv().ok();
        let _ = done.send(());
        drop(ends);
        code
    })
}

#[test]
fn test_env_var_is_case_insensitive() {
    let (call, _ends) = fixture(&[], &["LLAMAS=rock", "Path=/usr/bin"]);

    assert_eq!(call.env_var("llamas"), Some("rock"));
    assert_eq!(call.env_var("LLAMAS"), Some("rock"));
    assert_eq!(call.env_var("PATH"), Some("/usr/bin"));
    assert_eq!(call.env_var("ALPACAS"), None);
}

#[test]
fn test_env_var_keeps_value_with_equals() {
    let (call, _ends) = fixture(&[], &["FLAGS=--output=json"]);

    assert_eq!(call.env_var("flags"), Some("--output=json"));
}

#[test]
fn test_exit_delivers_code_and_closes_streams() {
    let (mut call, ends) = fixture(&["blargh"], &[]);
    let server = acknowledge_exit(ends);

    call.stdout.write_all(b"llamas").unwrap();
    call.exit(24);

    assert!(call.exited());
    assert_eq!(server.join().unwrap(), Some(24));
    // Streams are closed once exit has run.
    assert!(call.stdout.write_all(b"more").is_err());
    assert!(call.stderr.write_all(b"more").is_err());
}

#[test]
fn test_exit_twice_is_absorbed() {
    let (mut call, ends) = fixture(&[], &[]);
    let server = acknowledge_exit(ends);

    call.exit(0);
    call.exit(7);

    assert_eq!(server.join().unwrap(), Some(0));
}

#[test]
fn test_stdout_bytes_reach_the_server_end() {
    let (mut call, mut ends) = fixture(&[], &[]);
    let mut rx = ends.stdout.take().expect("stdout receiver");

    call.stdout.write_all(b"hello ").unwrap();
    call.stdout.write_all(b"world").unwrap();
    call.stdout.close();

    assert_eq!(rx.blocking_recv().as_deref(), Some(b"hello ".as_ref()));
    assert_eq!(rx.blocking_recv().as_deref(), Some(b"world".as_ref()));
    assert_eq!(rx.blocking_recv(), None);
}

#[test]
fn test_stdin_reads_chunks_then_eof() {
    let (mut call, mut ends) = fixture(&[], &[]);
    let tx = ends.stdin.take().expect("stdin sender");

    tx.blocking_send(Bytes::from_static(b"first ")).unwrap();
    tx.blocking_send(Bytes::from_static(b"second")).unwrap();
    drop(tx);

    let mut read = String::new();
    call.stdin.read_to_string(&mut read).unwrap();
    assert_eq!(read, "first second");

    // EOF is sticky.
    let mut buf = [0u8; 8];
    assert_eq!(call.stdin.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_output_close_is_idempotent() {
    let (mut call, _ends) = fixture(&[], &[]);

    call.stdout.close();
    call.stdout.close();
    assert!(call.stdout.write_all(b"x").is_err());
}

#[test]
fn test_stdin_close_yields_eof() {
    let (mut call, mut ends) = fixture(&[], &[]);
    let tx = ends.stdin.take().expect("stdin sender");
    tx.blocking_send(Bytes::from_static(b"pending")).unwrap();

    call.stdin.close();
    call.stdin.close();

    let mut buf = [0u8; 8];
    assert_eq!(call.stdin.read(&mut buf).unwrap(), 0);
}
