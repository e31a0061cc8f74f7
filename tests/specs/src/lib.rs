// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session tests.
//!
//! Serves an in-process identity service over real HTTP and runs the
//! `tenure` binary against it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use tenure::identity::ensure_crypto;

/// Resolve the path to the compiled `tenure` binary.
pub fn tenure_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tenure")
}

/// Run the `tenure` binary against `url` with state kept in `state_dir`.
pub fn run_tenure(url: &str, state_dir: &Path, args: &[&str]) -> anyhow::Result<Output> {
    let binary = tenure_binary();
    anyhow::ensure!(binary.exists(), "tenure binary not found at {}", binary.display());
    let output = Command::new(&binary)
        .args(["--url", url, "--log-level", "warn"])
        .arg("--state-dir")
        .arg(state_dir)
        .args(args)
        .env_remove("TENURE_CREDENTIAL")
        .output()?;
    Ok(output)
}

#[derive(Default)]
struct Directory {
    /// identifier → credential
    principals: Mutex<HashMap<String, String>>,
    live_tokens: Mutex<HashSet<String>>,
    issued: AtomicU32,
    login_calls: AtomicU32,
    refresh_calls: AtomicU32,
    status_calls: AtomicU32,
    refresh_latency: Mutex<Duration>,
    reject_refresh: AtomicBool,
}

impl Directory {
    fn issue(&self) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("tok-{n}");
        self.live_tokens.lock().insert(token.clone());
        token
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody {
    identifier: String,
    credential: String,
    secondary_factor: String,
}

/// Identity service double speaking the HTTP contract of
/// [`tenure::HttpIdentityService`].
pub struct MockIdentityServer {
    addr: SocketAddr,
    directory: Arc<Directory>,
    task: JoinHandle<()>,
}

impl MockIdentityServer {
    pub async fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let directory = Arc::new(Directory::default());
        let app = Router::new()
            .route("/auth/login", post(login))
            .route("/auth/register", post(register))
            .route("/auth/refresh", post(refresh))
            .route("/auth/registration-status", get(registration_status))
            .with_state(Arc::clone(&directory));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, directory, task })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Add a principal that can log in.
    pub fn add_principal(&self, identifier: &str, credential: &str) {
        self.directory.principals.lock().insert(identifier.to_owned(), credential.to_owned());
    }

    /// Mint a live token without a login round trip.
    pub fn mint_token(&self) -> String {
        self.directory.issue()
    }

    pub fn set_refresh_latency(&self, latency: Duration) {
        *self.directory.refresh_latency.lock() = latency;
    }

    /// Answer every refresh with 401.
    pub fn reject_refresh(&self) {
        self.directory.reject_refresh.store(true, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> u32 {
        self.directory.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.directory.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.directory.status_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockIdentityServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "message": message })))
}

async fn login(
    State(dir): State<Arc<Directory>>,
    Json(body): Json<LoginBody>,
) -> (StatusCode, Json<Value>) {
    dir.login_calls.fetch_add(1, Ordering::SeqCst);
    if body.secondary_factor.is_empty() {
        return error(StatusCode::BAD_REQUEST, "secondary factor is required");
    }
    let known = dir.principals.lock().get(&body.identifier).cloned();
    if known.as_deref() != Some(body.credential.as_str()) {
        return error(StatusCode::UNAUTHORIZED, "invalid credentials");
    }
    let token = dir.issue();
    (StatusCode::OK, Json(json!({ "token": token, "user": { "username": body.identifier } })))
}

async fn register(
    State(dir): State<Arc<Directory>>,
    Json(body): Json<LoginBody>,
) -> (StatusCode, Json<Value>) {
    {
        let mut principals = dir.principals.lock();
        if principals.contains_key(&body.identifier) {
            return error(StatusCode::CONFLICT, "identifier already registered");
        }
        principals.insert(body.identifier.clone(), body.credential);
    }
    let token = dir.issue();
    (StatusCode::OK, Json(json!({ "accessToken": token, "principal": { "email": body.identifier } })))
}

async fn refresh(
    State(dir): State<Arc<Directory>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    dir.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let latency = *dir.refresh_latency.lock();
    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }

    let presented = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_owned();
    let live = dir.live_tokens.lock().remove(&presented);
    if !live || dir.reject_refresh.load(Ordering::SeqCst) {
        return error(StatusCode::UNAUTHORIZED, "token expired");
    }
    let token = dir.issue();
    (StatusCode::OK, Json(json!({ "access_token": token })))
}

async fn registration_status(State(dir): State<Arc<Directory>>) -> Json<Value> {
    dir.status_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "hasUsers": !dir.principals.lock().is_empty() }))
}
