// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn open_request(args: &[&str]) -> OpenCallRequest {
    OpenCallRequest {
        args: args.iter().map(|s| s.to_string()).collect(),
        env: vec!["HOME=/home/llama".to_string()],
        dir: "/tmp".to_string(),
    }
}

#[test]
fn test_global_server_is_shared() {
    let first = global().expect("server starts");
    let second = global().expect("server is reused");

    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.base_url().starts_with("http://127.0.0.1:"));
}

#[test]
fn test_register_assigns_unique_ids() {
    let server = global().expect("server starts");
    let (first, _calls_a) = server.register_proxy();
    let (second, _calls_b) = server.register_proxy();

    assert_ne!(first.id(), second.id());

    server.deregister_proxy(first.id());
    server.deregister_proxy(second.id());
}

#[test]
fn test_deregister_removes_from_registry() {
    let server = global().expect("server starts");
    let (proxy, _calls) = server.register_proxy();
    let id = proxy.id().to_string();

    assert!(lookup(&server.inner, &id).is_some());
    server.deregister_proxy(&id);
    assert!(lookup(&server.inner, &id).is_none());

    // Deregistering twice is harmless.
    server.deregister_proxy(&id);
}

#[test]
fn test_call_ids_are_gap_free() {
    let server = global().expect("server starts");
    let (proxy, _calls) = server.register_proxy();

    let (first, _ends_a) = proxy.next_call(vec![], vec![], String::new());
    let (second, _ends_b) = proxy.next_call(vec![], vec![], String::new());

    assert_eq!(first.id(), 1);
    assert_eq!(second.id(), 2);
    assert_eq!(proxy.call_count(), 2);

    server.deregister_proxy(proxy.id());
}

#[tokio::test]
async fn test_open_call_against_unknown_proxy_is_404() {
    let inner = Arc::new(ServerInner::default());

    let result = open_call(
        Path("nope".to_string()),
        State(inner),
        Json(open_request(&["blargh"])),
    )
    .await;

    assert!(matches!(result, Err(StatusCode::NOT_FOUND)));
}

#[tokio::test]
async fn test_open_call_against_closed_proxy_is_410() {
    let server = global().expect("server starts");
    let (proxy, _calls) = server.register_proxy();
    proxy.shutdown();

    let result = open_call(
        Path(proxy.id().to_string()),
        State(server.inner.clone()),
        Json(open_request(&["blargh"])),
    )
    .await;

    assert!(matches!(result, Err(StatusCode::GONE)));
    server.deregister_proxy(proxy.id());
}

#[tokio::test]
async fn test_stream_ends_are_claimed_once() {
    let server = global().expect("server starts");
    let (proxy, mut calls) = server.register_proxy();
    let id = proxy.id().to_string();

    let opened = open_call(
        Path(id.clone()),
        State(server.inner.clone()),
        Json(open_request(&["blargh"])),
    )
    .await
    .expect("call opens");
    let cid = opened.0.id;
    let _call = calls.recv().await.expect("call delivered");

    assert!(claim(&server.inner, &id, cid, |ends| ends.stdout.take()).is_ok());
    let second = claim(&server.inner, &id, cid, |ends| ends.stdout.take());
    assert!(matches!(second, Err(StatusCode::CONFLICT)));

    let missing = claim(&server.inner, &id, 999, |ends| ends.stdout.take());
    assert!(matches!(missing, Err(StatusCode::NOT_FOUND)));

    server.deregister_proxy(&id);
}

#[test]
fn test_wire_shapes() {
    let request: OpenCallRequest =
        serde_json::from_str(r#"{"args":["blargh"],"env":["A=b"],"dir":"/x"}"#).unwrap();
    assert_eq!(request.args, vec!["blargh"]);
    assert_eq!(request.env, vec!["A=b"]);
    assert_eq!(request.dir, "/x");

    assert_eq!(
        serde_json::to_string(&OpenCallResponse { id: 7 }).unwrap(),
        r#"{"id":7}"#
    );
    assert_eq!(
        serde_json::to_string(&ExitCodeResponse { code: 24 }).unwrap(),
        r#"{"code":24}"#
    );
}
