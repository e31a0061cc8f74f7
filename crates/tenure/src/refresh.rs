// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! At most one renewal runs at a time. Callers that arrive while one is in
//! flight attach to it and receive the same outcome. The renewal itself runs
//! on its own task, so a caller dropping its future never abandons the
//! in-flight marker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SessionPolicy;
use crate::error::RefreshFailure;
use crate::identity::IdentityService;
use crate::session::{epoch_ms, Activity, Credential, SessionPatch};
use crate::store::CredentialStore;

pub type RefreshResult = Result<(), RefreshFailure>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
    id: u64,
    task: SharedRefresh,
}

pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    identity: Arc<dyn IdentityService>,
    policy: SessionPolicy,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        identity: Arc<dyn IdentityService>,
        policy: SessionPolicy,
    ) -> Self {
        Self { store, identity, policy, in_flight: Mutex::new(None), next_id: AtomicU64::new(1) }
    }

    /// Renew the current credential, or attach to the renewal in flight.
    pub async fn request_refresh(self: &Arc<Self>) -> RefreshResult {
        let task = {
            let mut slot = self.in_flight.lock();
            if let Some(ref running) = *slot {
                debug!(id = running.id, "attaching to in-flight renewal");
                running.task.clone()
            } else {
                let session = self.store.get();
                let Some(credential) = session.credential else {
                    return Err(RefreshFailure::NothingToRefresh);
                };
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.store.begin(Activity::Refreshing);

                let this = Arc::clone(self);
                let generation = session.generation;
                let handle = tokio::spawn(async move {
                    let result = this.renew(credential, generation).await;
                    this.finish(id);
                    result
                });
                let task = async move {
                    handle.await.unwrap_or_else(|e| {
                        warn!(err = %e, "renewal task failed");
                        Err(RefreshFailure::Network)
                    })
                }
                .boxed()
                .shared();
                *slot = Some(InFlight { id, task: task.clone() });
                task
            }
        };
        task.await
    }

    /// Whether a renewal is currently in flight for the session.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Detach the session from any in-flight renewal. The network call keeps
    /// running; its result is discarded by the generation check.
    pub fn detach(&self) {
        if let Some(running) = self.in_flight.lock().take() {
            debug!(id = running.id, "detached in-flight renewal");
            self.store.end(Activity::Refreshing);
        }
    }

    fn finish(&self, id: u64) {
        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|running| running.id == id) {
            *slot = None;
            self.store.end(Activity::Refreshing);
        }
    }

    async fn renew(&self, credential: Credential, generation: u64) -> RefreshResult {
        let outcome =
            tokio::time::timeout(self.policy.refresh_timeout(), self.identity.refresh(&credential))
                .await;

        let grant = match outcome {
            Ok(Ok(grant)) => grant,
            Ok(Err(e)) if e.is_unauthorized() => {
                warn!(err = %e, "renewal unauthorized, ending session");
                self.store.clear_if_generation(generation);
                return Err(RefreshFailure::Rejected);
            }
            Ok(Err(e)) => {
                let failure = RefreshFailure::from(&e);
                warn!(err = %e, reason = failure.as_str(), "renewal failed");
                return Err(failure);
            }
            Err(_) => {
                warn!(timeout_ms = self.policy.refresh_timeout_ms, "renewal timed out");
                return Err(RefreshFailure::Timeout);
            }
        };

        let Some(renewed) = Credential::new(grant.token) else {
            warn!("renewal returned an empty credential");
            return Err(RefreshFailure::Malformed);
        };
        let now = epoch_ms();
        let expires_at = now + self.policy.session_lifetime().as_millis() as u64;
        match self.store.set_if_generation(generation, SessionPatch::renewed(renewed, now, expires_at))
        {
            Ok(Some(_)) => {
                info!(expires_at_ms = expires_at, "credential renewed");
                Ok(())
            }
            Ok(None) => {
                debug!("session changed during renewal, discarding result");
                Err(RefreshFailure::Superseded)
            }
            Err(e) => {
                warn!(err = %e, "renewed credential not applied");
                Err(RefreshFailure::Malformed)
            }
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
