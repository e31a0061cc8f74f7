// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle facade: startup restore, login, register, logout, and
//! the background tasks that keep a session alive.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionPolicy;
use crate::error::{IdentityError, SessionError};
use crate::identity::{AuthGrant, IdentityService, LoginCredentials, RegistrationForm};
use crate::monitor::SessionMonitor;
use crate::network::{spawn_network_watcher, spawn_reachability_probe, ConnectivityEvent};
use crate::refresh::{RefreshCoordinator, RefreshResult};
use crate::registration::{RegistrationCheck, RegistrationProbe};
use crate::session::{
    epoch_ms, Activity, Credential, RegistrationState, Session, SessionPatch, Subject,
};
use crate::storage::SessionStorage;
use crate::store::CredentialStore;
use crate::validate::{validate_login, validate_registration};

/// Result of [`SessionManager::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// A persisted session was adopted. `refresh_scheduled` is set when it
    /// was already inside the renewal-due window.
    Restored { refresh_scheduled: bool },
    /// A persisted session existed but had expired; it was removed.
    Discarded,
    /// Nothing was persisted.
    Empty,
    /// `initialize` already ran in this process.
    AlreadyInitialized,
}

pub struct SessionManager {
    store: Arc<CredentialStore>,
    identity: Arc<dyn IdentityService>,
    refresh: Arc<RefreshCoordinator>,
    monitor: Arc<SessionMonitor>,
    registration: Arc<RegistrationProbe>,
    policy: SessionPolicy,
    initialized: AtomicBool,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        storage: Arc<dyn SessionStorage>,
        policy: SessionPolicy,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let store = Arc::new(CredentialStore::new(storage));
        let refresh = Arc::new(RefreshCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            policy.clone(),
        ));
        let monitor = Arc::new(SessionMonitor::new(
            Arc::clone(&store),
            Arc::clone(&refresh),
            policy.clone(),
            shutdown.clone(),
        ));
        let registration = Arc::new(RegistrationProbe::new(
            Arc::clone(&store),
            Arc::clone(&identity),
            policy.registration_timeout(),
        ));
        Self {
            store,
            identity,
            refresh,
            monitor,
            registration,
            policy,
            initialized: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Restore a persisted session once per process.
    ///
    /// Never waits on the network: a due renewal and the registration lookup
    /// run in the background. Must be called inside a tokio runtime.
    pub fn initialize(&self) -> InitOutcome {
        if self.initialized.swap(true, Ordering::AcqRel) {
            debug!("already initialized");
            return InitOutcome::AlreadyInitialized;
        }

        let outcome = {
            let _initializing = self.store.activity(Activity::Initializing);
            self.restore()
        };
        if matches!(outcome, InitOutcome::Restored { .. }) {
            self.monitor.start();
        }

        let probe = Arc::clone(&self.registration);
        tokio::spawn(async move {
            probe.check().await;
        });
        outcome
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn restore(&self) -> InitOutcome {
        let Some(persisted) = self.store.load_persisted() else {
            return InitOutcome::Empty;
        };
        let now = epoch_ms();
        if persisted.expires_at <= now {
            info!(expires_at_ms = persisted.expires_at, "persisted session expired, discarding");
            self.store.discard_persisted();
            return InitOutcome::Discarded;
        }

        let remaining = persisted.expires_at - now;
        if let Err(e) = self.store.set(SessionPatch::restored(persisted, now)) {
            warn!(err = %e, "persisted session rejected, discarding");
            self.store.discard_persisted();
            return InitOutcome::Discarded;
        }

        let due = remaining < self.policy.renewal_threshold().as_millis() as u64;
        info!(expires_in_ms = remaining, renewal_due = due, "restored persisted session");
        if due {
            self.schedule_refresh(self.policy.restore_refresh_delay());
        }
        InitOutcome::Restored { refresh_scheduled: due }
    }

    fn schedule_refresh(&self, delay: Duration) {
        let refresh = Arc::clone(&self.refresh);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Err(failure) = refresh.request_refresh().await {
                warn!(reason = failure.as_str(), "renewal of restored session failed");
            }
        });
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<Session, SessionError> {
        validate_login(credentials)?;
        {
            let _authenticating = self.store.activity(Activity::Authenticating);
            let grant = self.call(self.identity.login(credentials)).await.map_err(|e| {
                warn!(identifier = %credentials.identifier, err = %e, "login failed");
                SessionError::from(e)
            })?;
            self.establish(grant, &credentials.identifier, None)?;
        }
        info!(identifier = %credentials.identifier, "logged in");
        Ok(self.store.get())
    }

    pub async fn register(&self, form: &RegistrationForm) -> Result<Session, SessionError> {
        validate_registration(form)?;
        {
            let _authenticating = self.store.activity(Activity::Authenticating);
            let grant = self.call(self.identity.register(form)).await.map_err(|e| {
                warn!(identifier = %form.identifier, err = %e, "registration failed");
                SessionError::from(e)
            })?;
            self.establish(grant, &form.identifier, Some(RegistrationState::Registered))?;
        }
        info!(identifier = %form.identifier, "registered");
        Ok(self.store.get())
    }

    /// Clear the session and its persisted copy. Safe to call repeatedly.
    pub fn logout(&self) {
        self.monitor.stop();
        self.refresh.detach();
        let held = self.store.get().is_authenticated();
        self.store.clear();
        if held {
            info!("logged out");
        }
    }

    /// Manual renewal; see [`RefreshCoordinator::request_refresh`].
    pub async fn request_refresh(&self) -> RefreshResult {
        self.refresh.request_refresh().await
    }

    pub async fn check_registration_status(&self) -> RegistrationCheck {
        self.registration.check().await
    }

    /// Mark the user as active now. No-op without a session.
    pub fn record_activity(&self) -> bool {
        if !self.store.get().is_authenticated() {
            return false;
        }
        match self.store.set(SessionPatch::activity(epoch_ms())) {
            Ok(_) => true,
            Err(e) => {
                warn!(err = %e, "failed to record activity");
                false
            }
        }
    }

    pub fn snapshot(&self) -> Session {
        self.store.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.store.subscribe()
    }

    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Feed connectivity transitions to the reconnect watcher.
    pub fn watch_connectivity(&self, events: mpsc::Receiver<ConnectivityEvent>) -> JoinHandle<()> {
        spawn_network_watcher(
            Arc::clone(&self.store),
            Arc::clone(&self.refresh),
            self.policy.reconnect_settle(),
            events,
            self.shutdown.child_token(),
        )
    }

    /// Probe `base_url` every `interval` and feed the results to the
    /// reconnect watcher.
    pub fn watch_reachability(
        &self,
        base_url: &str,
        interval: Duration,
    ) -> anyhow::Result<JoinHandle<()>> {
        let (tx, rx) = mpsc::channel(8);
        spawn_reachability_probe(base_url, interval, tx, self.shutdown.child_token())?;
        Ok(self.watch_connectivity(rx))
    }

    /// Stop every background task. The session itself is kept.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.monitor.stop();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    async fn call<T>(
        &self,
        request: impl Future<Output = Result<T, IdentityError>>,
    ) -> Result<T, IdentityError> {
        tokio::time::timeout(self.policy.request_timeout(), request)
            .await
            .unwrap_or(Err(IdentityError::Timeout))
    }

    fn establish(
        &self,
        grant: AuthGrant,
        identifier: &str,
        registration: Option<RegistrationState>,
    ) -> Result<(), SessionError> {
        let Some(credential) = Credential::new(grant.token) else {
            return Err(SessionError::Server("identity service returned an empty credential".into()));
        };
        let subject = grant.subject.unwrap_or_else(|| Subject::from_identifier(identifier));
        let now = epoch_ms();
        let expires_at = now + self.policy.session_lifetime().as_millis() as u64;

        let mut patch = SessionPatch::established(subject, credential, now, expires_at);
        patch.registration = registration;
        self.store.set(patch).map_err(|e| SessionError::Server(e.to_string()))?;

        self.refresh.detach();
        self.monitor.start();
        Ok(())
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
