// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide control endpoint the placed binaries call home to.
//!
//! One server per process, lazily started on the first compile and kept for
//! the life of the process. It owns a dedicated tokio runtime and an axum
//! router on an ephemeral loopback port; proxies register and deregister
//! explicitly in its table.

use crate::call::{self, Call, ServerEnds};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error};

static GLOBAL: Mutex<Option<Arc<Server>>> = Mutex::new(None);

/// The process-wide server, started on first use.
pub(crate) fn global() -> io::Result<Arc<Server>> {
    let mut instance = GLOBAL.lock();
    if let Some(server) = instance.as_ref() {
        return Ok(server.clone());
    }
    let server = Arc::new(Server::start()?);
    *instance = Some(server.clone());
    Ok(server)
}

pub(crate) struct Server {
    base_url: String,
    inner: Arc<ServerInner>,
    // Keeps the worker threads alive for the life of the process.
    _runtime: tokio::runtime::Runtime,
}

#[derive(Default)]
struct ServerInner {
    registry: Mutex<HashMap<String, Arc<ProxyState>>>,
    next_proxy: AtomicU64,
}

/// Server-side record of one registered proxy.
pub(crate) struct ProxyState {
    id: String,
    call_count: AtomicU64,
    deliver: Mutex<Option<mpsc::Sender<Call>>>,
    pending: Mutex<HashMap<u64, ServerEnds>>,
}

impl Server {
    fn start() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("binmock-server")
            .enable_all()
            .build()?;
        // Bound synchronously so starting the server never blocks inside an
        // async caller; the runtime adopts the listener on its own threads.
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let inner = Arc::new(ServerInner::default());
        let app = router(inner.clone());
        runtime.spawn(async move {
            let listener = match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(err) => {
                    error!(%err, "control server failed to adopt its listener");
                    return;
                }
            };
            if let Err(err) = axum::serve(listener, app).await {
                error!(%err, "control server terminated");
            }
        });
        debug!(%addr, "control server listening");
        Ok(Self {
            base_url: format!("http://{addr}"),
            inner,
            _runtime: runtime,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register a fresh proxy; returns its state and the receiver the
    /// dispatcher drains. Delivery is effectively unbuffered: a second
    /// invocation blocks in its open-call request until the dispatcher picks
    /// up the first.
    pub(crate) fn register_proxy(&self) -> (Arc<ProxyState>, mpsc::Receiver<Call>) {
        let (deliver, calls) = mpsc::channel(1);
        let id = format!("proxy-{}", self.inner.next_proxy.fetch_add(1, Ordering::Relaxed) + 1);
        let state = Arc::new(ProxyState {
            id: id.clone(),
            call_count: AtomicU64::new(0),
            deliver: Mutex::new(Some(deliver)),
            pending: Mutex::new(HashMap::new()),
        });
        self.inner.registry.lock().insert(id.clone(), state.clone());
        debug!(proxy = %id, "proxy registered");
        (state, calls)
    }

    pub(crate) fn deregister_proxy(&self, id: &str) {
        self.inner.registry.lock().remove(id);
        debug!(proxy = %id, "proxy deregistered");
    }
}

impl ProxyState {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    /// Number of calls opened against this proxy, matched or not.
    pub(crate) fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Stop accepting calls; the dispatcher's receiver sees the channel
    /// close once in-flight deliveries finish.
    pub(crate) fn shutdown(&self) {
        self.deliver.lock().take();
    }

    fn next_call(&self, args: Vec<String>, env: Vec<String>, dir: String) -> (Call, ServerEnds) {
        let id = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        call::open(id, args, env, dir)
    }
}

fn router(inner: Arc<ServerInner>) -> Router {
    Router::new()
        .route("/{id}/calls", post(open_call))
        .route("/{id}/calls/{cid}/stdin", put(upload_stdin))
        .route("/{id}/calls/{cid}/stdout", get(download_stdout))
        .route("/{id}/calls/{cid}/stderr", get(download_stderr))
        .route("/{id}/calls/{cid}/exitcode", get(await_exit_code))
        .with_state(inner)
}

#[derive(Debug, Deserialize, Serialize)]
struct OpenCallRequest {
    args: Vec<String>,
    env: Vec<String>,
    dir: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct OpenCallResponse {
    id: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct ExitCodeResponse {
    code: i32,
}

fn lookup(inner: &ServerInner, id: &str) -> Option<Arc<ProxyState>> {
    inner.registry.lock().get(id).cloned()
}

async fn open_call(
    Path(id): Path<String>,
    State(inner): State<Arc<ServerInner>>,
    Json(request): Json<OpenCallRequest>,
) -> Result<Json<OpenCallResponse>, StatusCode> {
    let proxy = lookup(&inner, &id).ok_or(StatusCode::NOT_FOUND)?;
    let (call, ends) = proxy.next_call(request.args, request.env, request.dir);
    let cid = call.id();
    proxy.pending.lock().insert(cid, ends);

    let deliver = proxy.deliver.lock().clone();
    let Some(deliver) = deliver else {
        proxy.pending.lock().remove(&cid);
        return Err(StatusCode::GONE);
    };
    if deliver.send(call).await.is_err() {
        proxy.pending.lock().remove(&cid);
        return Err(StatusCode::GONE);
    }
    debug!(proxy = %id, call = cid, "call opened");
    Ok(Json(OpenCallResponse { id: cid }))
}

/// Take one channel end out of the pending table. Each end is claimed by
/// exactly one request; a second claim answers 409.
fn claim<T>(
    inner: &ServerInner,
    id: &str,
    cid: u64,
    take: impl FnOnce(&mut ServerEnds) -> Option<T>,
) -> Result<T, StatusCode> {
    let proxy = lookup(inner, id).ok_or(StatusCode::NOT_FOUND)?;
    let mut pending = proxy.pending.lock();
    let ends = pending.get_mut(&cid).ok_or(StatusCode::NOT_FOUND)?;
    take(ends).ok_or(StatusCode::CONFLICT)
}

async fn upload_stdin(
    Path((id, cid)): Path<(String, u64)>,
    State(inner): State<Arc<ServerInner>>,
    body: Body,
) -> Result<StatusCode, StatusCode> {
    let stdin = claim(&inner, &id, cid, |ends| ends.stdin.take())?;
    let mut chunks = body.into_data_stream();
    while let Some(chunk) = chunks.next().await {
        let Ok(bytes) = chunk else {
            break;
        };
        if bytes.is_empty() {
            continue;
        }
        if stdin.send(bytes).await.is_err() {
            // Controller closed its reading end; drain silently.
            break;
        }
    }
    // Dropping the sender is what surfaces EOF to the controller.
    Ok(StatusCode::OK)
}

async fn download_stdout(
    Path((id, cid)): Path<(String, u64)>,
    State(inner): State<Arc<ServerInner>>,
) -> Result<Response, StatusCode> {
    let stdout = claim(&inner, &id, cid, |ends| ends.stdout.take())?;
    Ok(stream_response(stdout))
}

async fn download_stderr(
    Path((id, cid)): Path<(String, u64)>,
    State(inner): State<Arc<ServerInner>>,
) -> Result<Response, StatusCode> {
    let stderr = claim(&inner, &id, cid, |ends| ends.stderr.take())?;
    Ok(stream_response(stderr))
}

fn stream_response(rx: mpsc::Receiver<Bytes>) -> Response {
    let stream = ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>);
    Response::new(Body::from_stream(stream))
}

async fn await_exit_code(
    Path((id, cid)): Path<(String, u64)>,
    State(inner): State<Arc<ServerInner>>,
) -> Result<Json<ExitCodeResponse>, StatusCode> {
    let (exit, done) = claim(&inner, &id, cid, |ends| {
        let exit = ends.exit.take()?;
        Some((exit, ends.done.take()))
    })?;
    // Blocks until the controller invokes exit. A call abandoned without an
    // exit (dispatcher gone) reads as a failure code so the client still
    // terminates.
    let code = exit.await.unwrap_or(1);
    if let Some(done) = done {
        let _ = done.send(());
    }
    debug!(proxy = %id, call = cid, code, "exit code delivered");
    Ok(Json(ExitCodeResponse { code }))
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
