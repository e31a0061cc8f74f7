// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic session check: hard expiry, inactivity, and renewal-due window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionPolicy;
use crate::error::RefreshFailure;
use crate::refresh::RefreshCoordinator;
use crate::session::{epoch_ms, Session};
use crate::store::CredentialStore;

/// What a tick should do with the current session. Conditions are checked
/// in declaration order; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    NoSession,
    /// `now > expires_at`.
    Expire,
    /// No activity for longer than the inactivity timeout.
    Inactive,
    /// Expiry falls inside the renewal-due window.
    Renew,
    Nothing,
}

pub fn evaluate(session: &Session, policy: &SessionPolicy, now_ms: u64) -> TickAction {
    let Some(expires_at) = session.expires_at_ms else {
        return TickAction::NoSession;
    };
    if session.credential.is_none() {
        return TickAction::NoSession;
    }
    if now_ms > expires_at {
        return TickAction::Expire;
    }
    let inactivity = policy.inactivity_timeout().as_millis() as u64;
    if session.last_activity_at_ms.is_some_and(|last| now_ms.saturating_sub(last) > inactivity) {
        return TickAction::Inactive;
    }
    let threshold = policy.renewal_threshold().as_millis() as u64;
    if expires_at - now_ms < threshold {
        return TickAction::Renew;
    }
    TickAction::Nothing
}

/// Result of one monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    NoSession,
    Healthy,
    Expired,
    Inactive,
    Renewed,
    RenewalFailed { failure: RefreshFailure, logged_out: bool },
    /// The session was replaced while the tick ran; nothing was cleared.
    Replaced,
}

impl TickOutcome {
    /// Whether the session is gone after this tick.
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            Self::NoSession
                | Self::Expired
                | Self::Inactive
                | Self::RenewalFailed { logged_out: true, .. }
        )
    }
}

struct Running {
    id: u64,
    cancel: CancellationToken,
}

pub struct SessionMonitor {
    store: Arc<CredentialStore>,
    refresh: Arc<RefreshCoordinator>,
    policy: SessionPolicy,
    shutdown: CancellationToken,
    running: Mutex<Option<Running>>,
    next_id: AtomicU64,
}

impl SessionMonitor {
    pub fn new(
        store: Arc<CredentialStore>,
        refresh: Arc<RefreshCoordinator>,
        policy: SessionPolicy,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            refresh,
            policy,
            shutdown,
            running: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start the periodic check for the current session.
    ///
    /// Returns `false` if no session is held or the monitor is already
    /// running. The loop stops on its own once the session ends.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock();
        if running.is_some() || self.shutdown.is_cancelled() {
            return false;
        }
        let mut rx = self.store.subscribe();
        if !rx.borrow_and_update().is_authenticated() {
            return false;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();
        *running = Some(Running { id, cancel: cancel.clone() });

        let this = Arc::clone(self);
        let interval = self.policy.monitor_interval();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(interval_ms = interval.as_millis() as u64, "session monitor started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() || !rx.borrow_and_update().is_authenticated() {
                            break;
                        }
                    }
                    _ = timer.tick() => {
                        if this.tick().await.ends_session() {
                            break;
                        }
                    }
                }
            }

            let released = {
                let mut running = this.running.lock();
                let ours = running.as_ref().is_some_and(|r| r.id == id);
                if ours {
                    *running = None;
                }
                ours
            };
            debug!("session monitor stopped");

            // A login that landed while this loop was exiting could not start its own.
            if released && !cancel.is_cancelled() && this.store.get().is_authenticated() {
                this.start();
            }
        });
        true
    }

    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Evaluate the current session once and act on it.
    pub async fn tick(&self) -> TickOutcome {
        let session = self.store.get();
        let now = epoch_ms();
        match evaluate(&session, &self.policy, now) {
            TickAction::NoSession => TickOutcome::NoSession,
            TickAction::Nothing => TickOutcome::Healthy,
            TickAction::Expire => {
                if !self.invalidate(session.generation) {
                    return TickOutcome::Replaced;
                }
                info!(expires_at_ms = session.expires_at_ms, "session expired, logged out");
                TickOutcome::Expired
            }
            TickAction::Inactive => {
                if !self.invalidate(session.generation) {
                    return TickOutcome::Replaced;
                }
                info!(
                    last_activity_at_ms = session.last_activity_at_ms,
                    "session inactive, logged out"
                );
                TickOutcome::Inactive
            }
            TickAction::Renew => {
                debug!(expires_in_ms = session.expires_in_ms(now), "renewal due");
                match self.refresh.request_refresh().await {
                    Ok(()) => TickOutcome::Renewed,
                    Err(failure) => self.renewal_failed(failure, session.generation),
                }
            }
        }
    }

    fn renewal_failed(&self, failure: RefreshFailure, generation: u64) -> TickOutcome {
        let keep = match failure {
            RefreshFailure::Superseded | RefreshFailure::NothingToRefresh => true,
            f if f.is_transient() => self.policy.retry_transient_renewal,
            _ => false,
        };
        if keep {
            warn!(reason = failure.as_str(), "scheduled renewal failed, retrying next tick");
            return TickOutcome::RenewalFailed { failure, logged_out: false };
        }
        let logged_out = self.invalidate(generation);
        if logged_out {
            warn!(reason = failure.as_str(), "scheduled renewal failed, logged out");
        } else {
            debug!(reason = failure.as_str(), "renewal failed for a replaced session");
        }
        TickOutcome::RenewalFailed { failure, logged_out }
    }

    /// Clear the session held at `generation`. Returns whether the session
    /// is gone; `false` means a new session replaced it.
    fn invalidate(&self, generation: u64) -> bool {
        if self.store.clear_if_generation(generation) {
            self.refresh.detach();
            return true;
        }
        !self.store.get().is_authenticated()
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
