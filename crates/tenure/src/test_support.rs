// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted identity service, failing storage,
//! and policy/session builders.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::SessionPolicy;
use crate::error::IdentityError;
use crate::identity::{
    AuthGrant, IdentityFuture, IdentityService, LoginCredentials, RefreshGrant, RegistrationForm,
};
use crate::session::{epoch_ms, Credential, SessionPatch, Subject};
use crate::storage::SessionStorage;
use crate::store::CredentialStore;

/// In-process [`IdentityService`] with scripted responses.
///
/// Each operation pops its next scripted response; an empty script falls back
/// to a success. Call counters record every invocation, including ones that
/// are still waiting on latency or the refresh gate.
#[derive(Default)]
pub struct MockIdentity {
    login_script: Mutex<VecDeque<Result<AuthGrant, IdentityError>>>,
    register_script: Mutex<VecDeque<Result<AuthGrant, IdentityError>>>,
    refresh_script: Mutex<VecDeque<Result<RefreshGrant, IdentityError>>>,
    status_script: Mutex<VecDeque<Result<bool, IdentityError>>>,
    latency: Mutex<Duration>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    refreshed_with: Mutex<Vec<String>>,
    pub login_calls: AtomicU32,
    pub register_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
    pub status_calls: AtomicU32,
}

impl MockIdentity {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay every response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn push_login(&self, result: Result<AuthGrant, IdentityError>) {
        self.login_script.lock().push_back(result);
    }

    pub fn push_register(&self, result: Result<AuthGrant, IdentityError>) {
        self.register_script.lock().push_back(result);
    }

    pub fn push_refresh(&self, result: Result<RefreshGrant, IdentityError>) {
        self.refresh_script.lock().push_back(result);
    }

    pub fn push_status(&self, result: Result<bool, IdentityError>) {
        self.status_script.lock().push_back(result);
    }

    /// Hold refresh calls until the returned handle is notified.
    pub fn gate_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Bearer tokens presented to `refresh`, in call order.
    pub fn refreshed_with(&self) -> Vec<String> {
        self.refreshed_with.lock().clone()
    }

    pub fn total_calls(&self) -> u32 {
        self.login_calls.load(Ordering::SeqCst)
            + self.register_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst)
            + self.status_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

/// A successful grant for `identifier`.
pub fn grant(token: &str, identifier: &str) -> AuthGrant {
    AuthGrant { token: token.to_owned(), subject: Some(Subject::from_identifier(identifier)) }
}

impl IdentityService for MockIdentity {
    fn login<'a>(&'a self, credentials: &'a LoginCredentials) -> IdentityFuture<'a, AuthGrant> {
        Box::pin(async move {
            let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.delay().await;
            let next = self.login_script.lock().pop_front();
            next.unwrap_or_else(|| Ok(grant(&format!("login-{n}"), &credentials.identifier)))
        })
    }

    fn register<'a>(&'a self, form: &'a RegistrationForm) -> IdentityFuture<'a, AuthGrant> {
        Box::pin(async move {
            let n = self.register_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.delay().await;
            let next = self.register_script.lock().pop_front();
            next.unwrap_or_else(|| Ok(grant(&format!("register-{n}"), &form.identifier)))
        })
    }

    fn refresh<'a>(&'a self, credential: &'a Credential) -> IdentityFuture<'a, RefreshGrant> {
        Box::pin(async move {
            let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.refreshed_with.lock().push(credential.expose().to_owned());
            let gate = self.refresh_gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.delay().await;
            let next = self.refresh_script.lock().pop_front();
            next.unwrap_or_else(|| Ok(RefreshGrant { token: format!("renewed-{n}") }))
        })
    }

    fn registration_status(&self) -> IdentityFuture<'_, bool> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.delay().await;
            let next = self.status_script.lock().pop_front();
            next.unwrap_or(Ok(true))
        })
    }
}

/// Storage whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingStorage;

impl SessionStorage for FailingStorage {
    fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        anyhow::bail!("storage unavailable")
    }

    fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("storage unavailable")
    }

    fn remove(&self, _key: &str) -> anyhow::Result<()> {
        anyhow::bail!("storage unavailable")
    }
}

/// Default policy with millisecond-scale timers for tests.
pub fn fast_policy() -> SessionPolicy {
    SessionPolicy {
        monitor_interval_ms: 20,
        refresh_timeout_ms: 500,
        request_timeout_ms: 500,
        registration_timeout_ms: 500,
        reconnect_settle_ms: 10,
        restore_refresh_delay_ms: 10,
        ..SessionPolicy::default()
    }
}

/// Establish a session for `identifier` holding `token` that expires in
/// `expires_in` and was last active `idle_for` ago.
pub fn establish(
    store: &CredentialStore,
    identifier: &str,
    token: &str,
    expires_in: Duration,
    idle_for: Duration,
) -> anyhow::Result<()> {
    let now = epoch_ms();
    let credential =
        Credential::new(token).ok_or_else(|| anyhow::anyhow!("empty token: {token:?}"))?;
    let mut patch = SessionPatch::established(
        Subject::from_identifier(identifier),
        credential,
        now,
        now + expires_in.as_millis() as u64,
    );
    patch.last_activity_at_ms = Some(now.saturating_sub(idle_for.as_millis() as u64));
    store.set(patch)?;
    Ok(())
}
